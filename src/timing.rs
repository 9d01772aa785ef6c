//! Timing summaries for `timeit`

use std::time::Duration;

/// Scale a duration in seconds to a fixed-width reading
///
/// `1.5` reads `  1.50  s`, `0.0001` reads `100.00 µs`.
pub fn natural_time(seconds: f64) -> String {
    const UNITS: [(&str, f64); 4] = [("mi", 60.0), (" s", 1.0), ("ms", 1e-3), ("µs", 1e-6)];

    let absolute = seconds.abs();
    for (label, size) in UNITS {
        if absolute > size {
            return format!("{:6.2} {}", seconds / size, label);
        }
    }
    format!("{:6.2} ns", seconds / 1e-9)
}

/// Mean and sample standard deviation; the deviation of one reading is zero
pub fn mean_stddev(readings: &[f64]) -> (f64, f64) {
    if readings.is_empty() {
        return (0.0, 0.0);
    }
    let n = readings.len() as f64;
    let mean = readings.iter().sum::<f64>() / n;
    if readings.len() < 2 {
        return (mean, 0.0);
    }
    let variance = readings.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// `mean ± stddev`, or just the reading when there is only one
pub fn format_stddev(timings: &[Duration]) -> String {
    let readings: Vec<f64> = timings.iter().map(Duration::as_secs_f64).collect();
    let (mean, stddev) = mean_stddev(&readings);
    if readings.len() > 1 {
        format!("{} \u{00b1} {}", natural_time(mean), natural_time(stddev))
    } else {
        natural_time(mean)
    }
}
