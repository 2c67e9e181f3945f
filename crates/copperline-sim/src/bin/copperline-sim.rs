//! Runs the SRA controller against a simulated VDSL2 line.
//!
//! Usage: copperline-sim [CONFIG.toml] [--ticks N] [--quiet]
//!
//! Prints a JSON line summary (predicted bitrate, loading coil and bridged
//! tap checks), then one JSON object per tick. Ctrl-C stops after the
//! current tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use copperline_sim::{SimConfig, Simulation};
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut config_path = None;
    let mut ticks = None;
    let mut quiet = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ticks" => {
                let value = args.next().context("Missing --ticks value")?;
                ticks = Some(value.parse::<u64>().context("--ticks must be an integer")?);
            }
            "--quiet" => quiet = true,
            "-h" | "--help" => {
                println!("usage: copperline-sim [CONFIG.toml] [--ticks N] [--quiet]");
                return Ok(());
            }
            other if other.starts_with('-') => bail!("Unknown option: {}", other),
            path => config_path = Some(path.to_string()),
        }
    }

    let mut config = match &config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {path}"))?;
            SimConfig::from_toml_str(&raw).with_context(|| format!("loading config {path}"))?
        }
        None => SimConfig::default(),
    };
    if let Some(n) = ticks {
        config.ticks = n;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        handler_cancel.store(true, Ordering::Relaxed);
    })
    .context("installing Ctrl-C handler")?;

    let mut sim = Simulation::new(&config)?;
    let summary = sim.summary()?;
    info!(
        profile = summary.profile,
        cable = summary.cable,
        distance_m = summary.distance_m,
        predicted_mbps = summary.predicted_bitrate_mbps,
        "line model ready"
    );
    println!("{}", serde_json::to_string(&summary)?);

    let steps = sim.run(config.ticks, &cancel);
    if !quiet {
        for step in &steps {
            println!("{}", serde_json::to_string(step)?);
        }
    }

    let c = sim.controller();
    info!(
        ticks = steps.len(),
        state = %c.state(),
        disconnects = c.disconnect_events(),
        power_boost_db = c.power_boost_db(),
        latency = %c.latency_profile(),
        "simulation finished"
    );
    Ok(())
}
