use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info};

use crate::controller::SraController;
use crate::error::SraError;
use crate::report::TickReport;

/// Control messages sent to the worker (infrequent).
enum ControlMessage {
    TickNow,
    Shutdown,
}

/// Thread-safe handle to a controller ticking on its own thread.
///
/// The worker ticks once per monitoring interval, keeps the latest
/// [`TickReport`] for polling and offers every report on a bounded channel.
/// Reports that do not fit are dropped rather than stalling the loop.
///
/// Dropping the runtime triggers a graceful shutdown of the worker thread.
pub struct SraRuntime {
    control_tx: Sender<ControlMessage>,
    reports_rx: Receiver<TickReport>,
    shutdown: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<TickReport>>>,
    handle: Option<thread::JoinHandle<SraController>>,
}

impl SraRuntime {
    /// Moves `controller` onto a worker thread. `report_capacity` bounds
    /// the report channel.
    pub fn spawn(controller: SraController, report_capacity: usize) -> Result<Self, SraError> {
        let (control_tx, control_rx) = bounded(64);
        let (reports_tx, reports_rx) = bounded(report_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(None));

        let worker_shutdown = shutdown.clone();
        let worker_latest = latest.clone();
        let handle = thread::Builder::new()
            .name("copperline-sra".into())
            .spawn(move || {
                runtime_worker(controller, control_rx, reports_tx, worker_latest, worker_shutdown)
            })
            .map_err(SraError::Spawn)?;

        Ok(Self {
            control_tx,
            reports_rx,
            shutdown,
            latest,
            handle: Some(handle),
        })
    }

    /// Runs a tick immediately instead of waiting out the interval.
    pub fn tick_now(&self) -> bool {
        self.control_tx.try_send(ControlMessage::TickNow).is_ok()
    }

    /// The most recent tick report, if any tick has completed.
    pub fn latest_report(&self) -> Option<TickReport> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stream of tick reports.
    pub fn reports(&self) -> Receiver<TickReport> {
        self.reports_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the worker and hands the controller back. Idempotent; later
    /// calls return `None`.
    pub fn shutdown(&mut self) -> Option<SraController> {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.control_tx.try_send(ControlMessage::Shutdown);
        self.handle.take().and_then(|h| h.join().ok())
    }
}

impl Drop for SraRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn runtime_worker(
    mut controller: SraController,
    control_rx: Receiver<ControlMessage>,
    reports_tx: Sender<TickReport>,
    latest: Arc<Mutex<Option<TickReport>>>,
    shutdown: Arc<AtomicBool>,
) -> SraController {
    let interval = controller.config().monitoring_interval;
    info!(?interval, "SRA worker started");

    while !shutdown.load(Ordering::Relaxed) {
        let report = controller.tick();
        *latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        match reports_tx.try_send(report) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(report)) => {
                debug!(tick = report.tick, "report channel full, dropping report");
            }
        }

        match control_rx.recv_timeout(interval) {
            Ok(ControlMessage::TickNow) | Err(RecvTimeoutError::Timeout) => {}
            Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(ticks = controller.ticks(), "SRA worker stopped");
    controller
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SraConfig;
    use crate::error::HalError;
    use crate::hal::{DslHal, LineStats};
    use crate::state::LatencyProfile;

    struct QuietLine;

    impl DslHal for QuietLine {
        fn get_line_stats(&self) -> Result<LineStats, HalError> {
            Ok(LineStats::default())
        }
        fn get_link_status(&self) -> Result<String, HalError> {
            Ok("up".into())
        }
        fn get_snr_margin(&self) -> Result<Option<f64>, HalError> {
            Ok(Some(10.0))
        }
        fn set_snr_margin(&self, _tenths_db: i32) -> Result<bool, HalError> {
            Ok(true)
        }
        fn set_latency_profile(&self, _profile: LatencyProfile) -> Result<bool, HalError> {
            Ok(true)
        }
    }

    fn controller(interval: Duration) -> SraController {
        let config = SraConfig {
            monitoring_interval: interval,
            ..SraConfig::default()
        };
        SraController::new(Arc::new(QuietLine), config)
    }

    #[test]
    fn ticks_and_returns_controller_on_shutdown() {
        let mut rt = SraRuntime::spawn(controller(Duration::from_millis(5)), 16).unwrap();
        let reports = rt.reports();
        let first = reports.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.tick, 1);
        reports.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(rt.latest_report().is_some());

        let c = rt.shutdown().unwrap();
        assert!(c.ticks() >= 2);
        assert!(rt.shutdown().is_none());
        assert!(!rt.is_running());
    }

    #[test]
    fn tick_now_skips_the_wait() {
        let mut rt = SraRuntime::spawn(controller(Duration::from_secs(3600)), 4).unwrap();
        let reports = rt.reports();
        reports.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(rt.tick_now());
        let second = reports.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(second.tick, 2);
        // Shutdown must not wait out the hour-long interval.
        assert_eq!(rt.shutdown().unwrap().ticks(), 2);
    }

    #[test]
    fn full_report_channel_does_not_stall() {
        let rt = SraRuntime::spawn(controller(Duration::from_millis(1)), 1).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while rt.latest_report().map_or(0, |r| r.tick) < 5 {
            assert!(std::time::Instant::now() < deadline, "worker stalled");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(rt.reports().len(), 1);
    }
}
