/// Windowed exponential moving average of migration throughput, plus the
/// remaining-time estimate derived from it.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    alpha: f64,
    bytes_per_sec: Option<f64>,
}

impl ThroughputMeter {
    const DEFAULT_ALPHA: f64 = 0.3;

    pub fn new() -> Self {
        Self {
            alpha: Self::DEFAULT_ALPHA,
            bytes_per_sec: None,
        }
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            bytes_per_sec: None,
        }
    }

    /// Folds one observation (bytes moved over elapsed seconds) into the
    /// average. Zero or negative windows are ignored.
    pub fn record(&mut self, bytes: u64, elapsed_secs: f64) {
        if elapsed_secs <= 0.0 {
            return;
        }
        let sample = bytes as f64 / elapsed_secs;
        self.bytes_per_sec = Some(match self.bytes_per_sec {
            Some(current) => self.alpha * sample + (1.0 - self.alpha) * current,
            None => sample,
        });
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.bytes_per_sec.unwrap_or(0.0)
    }

    /// `(total - processed) * avg_file_bytes / ema`, floored. Zero until a
    /// rate is known.
    pub fn remaining_seconds(&self, remaining_files: i64, avg_file_bytes: f64) -> i64 {
        let Some(rate) = self.bytes_per_sec else {
            return 0;
        };
        if rate <= 0.0 || remaining_files <= 0 {
            return 0;
        }
        ((remaining_files as f64 * avg_file_bytes) / rate).floor() as i64
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Percent complete, safe for `total == 0`.
pub fn percent_done(processed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 100.0;
    }
    (processed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}
