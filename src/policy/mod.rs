//! Simulated admission and eviction policies.
//!
//! | Module             | Policies                                              |
//! |--------------------|-------------------------------------------------------|
//! | `window_tinylfu`   | weighted W-TinyLFU: single / sum / ristretto victims, |
//! |                    | optional hill-climbed window                          |
//! | `sampled_tinylfu`  | weighted W-TinyLFU with a sampled, unordered main     |
//! | `gdsf`             | Greedy-Dual-Size-Frequency and its admission variants |
//! | `multilevel`       | tiered cascade with per-tier eviction + admittor      |
//! | `promote`          | tiered LRU with probabilistic upward promotion        |
//! | `bidi_tinylfu`     | two-level W-TinyLFU with a veterans region            |
//!
//! The TinyLFU-based policies share [`AdmissionRule`], the frequency
//! comparison between a candidate and the victim(s) it would displace.

pub mod bidi_tinylfu;
pub mod climber;
pub mod gdsf;
pub mod multilevel;
pub mod promote;
pub mod sampled_tinylfu;
pub mod window_tinylfu;

/// How a candidate's frequency is weighed against its victims'.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRule {
    /// Frequency per byte: `cf * vw > vf * cw`.
    Scaled,
    /// `cf > vf`; ties keep the resident.
    Greater,
    /// `cf >= vf`; ties admit the candidate.
    GreaterOrEqual,
}

impl AdmissionRule {
    /// Scaled when `scaled` is set, `unscaled` otherwise.
    pub fn select(scaled: bool, unscaled: AdmissionRule) -> Self {
        if scaled { AdmissionRule::Scaled } else { unscaled }
    }

    pub fn is_scaled(self) -> bool {
        self == AdmissionRule::Scaled
    }

    /// Returns `true` if the candidate beats the victim(s).
    #[inline]
    pub fn admits(
        self,
        candidate_freq: u64,
        candidate_weight: u64,
        victim_freq: u64,
        victim_weight: u64,
    ) -> bool {
        match self {
            AdmissionRule::Scaled => {
                u128::from(candidate_freq) * u128::from(victim_weight)
                    > u128::from(victim_freq) * u128::from(candidate_weight)
            },
            AdmissionRule::Greater => candidate_freq > victim_freq,
            AdmissionRule::GreaterOrEqual => candidate_freq >= victim_freq,
        }
    }
}
