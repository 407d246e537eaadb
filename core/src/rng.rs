//! Deterministic random number generation.
//!
//! RULE: no component may call a platform RNG or share a generator.
//! All randomness flows through AnalyzerRng instances derived from the
//! run's `random_seed`.
//!
//! Each analyzer gets its own stream, seeded from
//! (random_seed XOR slot_index * golden-ratio constant). So:
//!   - Analyzers running concurrently never contend for a generator.
//!   - Adding an analyzer never shifts another analyzer's stream.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single analyzer.
#[derive(Clone, Debug)]
pub struct AnalyzerRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl AnalyzerRng {
    /// Derive a stream from the run seed and a stable slot index.
    pub fn new(master_seed: u64, slot_index: u64) -> Self {
        let derived_seed = master_seed ^ (slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Split off an independent child stream, e.g. one per contract type.
    pub fn fork(&mut self, salt: u64) -> AnalyzerRng {
        let seed = self.inner.next_u64() ^ salt.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        AnalyzerRng {
            name: self.name,
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll an index in [0, n). Returns 0 when n is 0.
    pub fn index_below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.inner.next_u64() % n as u64) as usize
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick an index with probability proportional to `weights`.
    /// Falls back to a uniform pick when all weights are zero.
    pub fn weighted_index(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
        if total <= 0.0 {
            return self.index_below(weights.len());
        }
        let mut target = self.next_f64() * total;
        for (i, w) in weights.iter().enumerate() {
            if !(w.is_finite() && *w > 0.0) {
                continue;
            }
            if target < *w {
                return i;
            }
            target -= w;
        }
        weights
            .iter()
            .rposition(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(0)
    }
}

/// Lets library code that takes `R: Rng` (e.g. linfa's k-means
/// initializer) draw from an analyzer stream directly.
impl RngCore for AnalyzerRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

/// All analyzer RNGs for a single run, indexed by stable slot.
#[derive(Debug, Clone, Copy)]
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_analyzer(&self, slot: AnalyzerSlot) -> AnalyzerRng {
        AnalyzerRng::new(self.master_seed, slot as u64).with_name(slot.name())
    }
}

/// Stable analyzer slot assignments.
/// NEVER reorder or remove entries, only append.
/// Reordering changes every analyzer's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum AnalyzerSlot {
    Cohort = 0,
    Churn = 1,
    Ltv = 2,
    Segmentation = 3,
    TimeSeries = 4,
    Association = 5,
}

impl AnalyzerSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cohort       => "cohort_retention",
            Self::Churn        => "churn_scores",
            Self::Ltv          => "ltv",
            Self::Segmentation => "segmentation",
            Self::TimeSeries   => "time_series",
            Self::Association  => "association_rules",
        }
    }
}
