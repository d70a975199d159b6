//! Linear on-demand price model.
//!
//! Cost is `bytes / 2^40 * price_per_tib`, rounded half-to-even to a whole
//! currency unit. It is a rough estimate, not a reconciliation against the
//! billing export.

/// Bytes in one tebibyte.
pub const BYTES_PER_TIB: f64 = 1_099_511_627_776.0;

/// Bytes in one mebibyte.
pub const BYTES_PER_MIB: f64 = 1_048_576.0;

/// Default on-demand price per tebibyte processed.
pub const DEFAULT_PRICE_PER_TIB: u32 = 5;

/// Converts processed bytes into an estimated cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostEstimator {
    price_per_tib: u32,
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_PRICE_PER_TIB)
    }
}

impl CostEstimator {
    pub fn new(price_per_tib: u32) -> Self {
        Self { price_per_tib }
    }

    pub fn price_per_tib(&self) -> u32 {
        self.price_per_tib
    }

    /// Estimated cost of `bytes` processed. Missing or negative counts cost 0.
    pub fn estimate(&self, bytes: Option<i64>) -> i64 {
        match bytes {
            Some(bytes) if bytes > 0 => {
                (bytes as f64 / BYTES_PER_TIB * f64::from(self.price_per_tib)).round_ties_even() as i64
            }
            _ => 0,
        }
    }
}

/// Bytes expressed in whole mebibytes, rounded half-to-even.
pub fn megabytes(bytes: i64) -> i64 {
    (bytes.max(0) as f64 / BYTES_PER_MIB).round_ties_even() as i64
}
