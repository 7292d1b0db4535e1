//! Cardinality sketch for unbounded distinct counting.
//!
//! Unwindowed `cardinality` aggregation tracks distinct values over an
//! unbounded stream, so it uses a HyperLogLog estimate instead of an exact
//! set. Windowed cardinality stays exact (see the streaming-aggregation
//! operator) because eviction needs per-value reference counts anyway.

use std::hash::{DefaultHasher, Hash, Hasher};

/// A fixed-precision HyperLogLog over string values.
#[derive(Debug, Clone)]
pub struct HyperLogLog {
    registers: Vec<u8>,
    precision: u8,
}

const DEFAULT_PRECISION: u8 = 14;

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

impl HyperLogLog {
    /// `precision` bits address `2^precision` one-byte registers. Clamped to
    /// the usable 4..=18 range.
    pub fn new(precision: u8) -> Self {
        let precision = precision.clamp(4, 18);
        Self {
            registers: vec![0; 1 << precision],
            precision,
        }
    }

    pub fn add_str(&mut self, value: &str) {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        let hash = hasher.finish();

        let bucket = (hash >> (64 - self.precision)) as usize;
        let rest = hash << self.precision;
        let max_zeros = 64 - u32::from(self.precision);
        let rho = rest.leading_zeros().min(max_zeros) as u8 + 1;
        if rho > self.registers[bucket] {
            self.registers[bucket] = rho;
        }
    }

    /// Estimated number of distinct values added so far.
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let indicator: f64 = self
            .registers
            .iter()
            .map(|&r| 2.0_f64.powi(-i32::from(r)))
            .sum();
        let alpha = match self.precision {
            4 => 0.673,
            5 => 0.697,
            6 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };
        let raw = alpha * m * m / indicator;

        let corrected = if raw <= 2.5 * m {
            let zeros = self.registers.iter().filter(|&&r| r == 0).count() as f64;
            if zeros > 0.0 { m * (m / zeros).ln() } else { raw }
        } else {
            raw
        };
        corrected.round() as u64
    }
}
