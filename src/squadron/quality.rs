//! Post-response quality checks.
//!
//! Stateless scoring over a response text, with a tier-dependent bar: boss
//! tier responses must clear a higher length threshold than worker tier.
//! A rejection is a soft failure; the fallback executor uses it to escalate
//! from a worker provider to a boss provider when one remains in the chain.

use crate::squadron::config::Tier;

/// Refusal markers that, at the head of a response, indicate the model
/// dodged the task.
const REFUSAL_MARKERS: &[&str] = &["i cannot", "i don't know", "unable to", "[error]"];

/// How far into the response the refusal scan looks.
const HEAD_WINDOW: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected { reason: String },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Tier-aware response validator.
///
/// The length thresholds are heuristics, so they are fields rather than
/// constants; the defaults are 50 characters for worker-grade tiers and 200
/// for boss.
#[derive(Debug, Clone)]
pub struct QualityValidator {
    pub worker_min_chars: usize,
    pub boss_min_chars: usize,
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self {
            worker_min_chars: 50,
            boss_min_chars: 200,
        }
    }
}

impl QualityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn min_chars(&self, tier: Tier) -> usize {
        match tier {
            Tier::Boss => self.boss_min_chars,
            Tier::Worker | Tier::Creative | Tier::Fallback => self.worker_min_chars,
        }
    }

    /// Score `content` against the bar for `tier`.
    pub fn validate(&self, content: &str, tier: Tier) -> Verdict {
        let min_chars = self.min_chars(tier);
        if content.chars().count() < min_chars {
            return Verdict::Rejected {
                reason: format!(
                    "response too short ({} chars, tier minimum {})",
                    content.chars().count(),
                    min_chars
                ),
            };
        }

        let head: String = content
            .trim_start()
            .chars()
            .take(HEAD_WINDOW)
            .collect::<String>()
            .to_lowercase();
        for marker in REFUSAL_MARKERS {
            if head.contains(marker) {
                return Verdict::Rejected {
                    reason: format!("refusal marker '{}' at response head", marker),
                };
            }
        }

        if content
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Verdict::Rejected {
                reason: "control-character corruption".to_string(),
            };
        }

        Verdict::Accepted
    }
}
