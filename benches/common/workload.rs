//! Weighted trace generators for replay benchmarks.
//!
//! Keys follow the chosen distribution; each key has a fixed weight derived
//! from the key itself, so a key is always the same size across a trace.

use evictsim::event::AccessEvent;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
pub enum Workload {
    /// Uniform random keys in `[0, universe)`.
    Uniform,
    /// Sequential scan in `[0, universe)`.
    Scan,
    /// Zipfian distribution; `theta` 0.0 is uniform, 0.99 is highly skewed.
    Zipfian { theta: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct TraceSpec {
    pub universe: u64,
    pub workload: Workload,
    /// Weights are drawn from `[1, max_weight]`.
    pub max_weight: u32,
    pub seed: u64,
}

impl TraceSpec {
    pub fn generate(self, len: usize) -> Vec<AccessEvent> {
        let universe = self.universe.max(1);
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let zipfian = match self.workload {
            Workload::Zipfian { theta } => Some(ZipfianState::new(universe, theta)),
            _ => None,
        };

        (0..len as u64)
            .map(|position| {
                let key = match (self.workload, &zipfian) {
                    (Workload::Uniform, _) => rng.random_range(0..universe),
                    (Workload::Scan, _) => position % universe,
                    (Workload::Zipfian { .. }, Some(zipf)) => zipf.sample(rng.random::<f64>()),
                    (Workload::Zipfian { .. }, None) => 0,
                };
                AccessEvent::new(key, weight_of(key, self.max_weight))
            })
            .collect()
    }
}

/// Stable per-key weight in `[1, max_weight]`.
fn weight_of(key: u64, max_weight: u32) -> u32 {
    let mixed = key.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17);
    1 + (mixed % u64::from(max_weight.max(1))) as u32
}

/// Zipfian inverse-CDF sampler (YCSB).
#[derive(Debug, Clone)]
struct ZipfianState {
    n: u64,
    theta: f64,
    zeta_n: f64,
    alpha: f64,
    eta: f64,
}

impl ZipfianState {
    fn new(n: u64, theta: f64) -> Self {
        let theta = theta.clamp(0.0, 0.9999);
        let zeta_2 = Self::zeta(2, theta);
        let zeta_n = Self::zeta(n, theta);
        let alpha = 1.0 / (1.0 - theta);
        let eta = (1.0 - (2.0 / n as f64).powf(1.0 - theta)) / (1.0 - zeta_2 / zeta_n);

        Self {
            n,
            theta,
            zeta_n,
            alpha,
            eta,
        }
    }

    fn zeta(n: u64, theta: f64) -> f64 {
        (1..=n).map(|i| 1.0 / (i as f64).powf(theta)).sum()
    }

    fn sample(&self, u: f64) -> u64 {
        let uz = u * self.zeta_n;
        if uz < 1.0 {
            return 0;
        }
        if uz < 1.0 + 0.5_f64.powf(self.theta) {
            return 1;
        }
        let spread = (self.n as f64) * (self.eta * u - self.eta + 1.0).powf(self.alpha);
        (spread as u64).min(self.n - 1)
    }
}
