//! Local-maximum search with prominence and half-prominence width, used to
//! locate the attenuation spikes a bridged tap leaves in an Hlog curve.

/// A local maximum that passed the prominence and width filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Sample index of the peak (middle of a flat top).
    pub index: usize,
    /// Height above the higher of the two surrounding bases.
    pub prominence: f64,
    /// Width in samples at half the prominence.
    pub width: f64,
}

/// Finds peaks with at least `min_prominence` and `min_width` samples of
/// width at half prominence.
pub fn find_peaks(values: &[f64], min_prominence: f64, min_width: f64) -> Vec<Peak> {
    local_maxima(values)
        .into_iter()
        .filter_map(|index| {
            let (prominence, left_base, right_base) = prominence(values, index);
            if prominence < min_prominence {
                return None;
            }
            let width = width_at_half(values, index, prominence, left_base, right_base);
            (width >= min_width).then_some(Peak {
                index,
                prominence,
                width,
            })
        })
        .collect()
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Prominence plus the indices of the left and right bases.
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    for i in (0..=peak).rev() {
        if x[i] > height {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
    }

    let mut right_min = height;
    let mut right_base = peak;
    for (i, &v) in x.iter().enumerate().skip(peak) {
        if v > height {
            break;
        }
        if v < right_min {
            right_min = v;
            right_base = i;
        }
    }

    (height - left_min.max(right_min), left_base, right_base)
}

fn width_at_half(x: &[f64], peak: usize, prominence: f64, left_base: usize, right_base: usize) -> f64 {
    let line = x[peak] - prominence / 2.0;

    let mut i = peak;
    while left_base < i && line < x[i] {
        i -= 1;
    }
    let mut left = i as f64;
    if x[i] < line && i < peak {
        left += (line - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && line < x[i] {
        i += 1;
    }
    let mut right = i as f64;
    if x[i] < line && i > peak {
        right -= (line - x[i]) / (x[i - 1] - x[i]);
    }

    right - left
}
