//! Bounds enforcement for policy weights.
//!
//! Every weight ends up in `[MIN_WEIGHT, MAX_WEIGHT]` and the weights sum to
//! one. The input may be anything an aggressive mutation produces, including
//! negative, oversized or non-finite values. Weights that already satisfy
//! the bounds come back unchanged, so `enforce(enforce(w)) == enforce(w)`.

use crate::weights::{Criterion, PolicyWeights, MAX_WEIGHT, MIN_WEIGHT};

const CONVERGENCE_EPSILON: f64 = 1e-12;

pub fn enforce(raw: PolicyWeights) -> PolicyWeights {
    if raw.is_valid() {
        return raw;
    }
    let mut weights = raw.map(clamp_weight);

    // Each round either lands on the target or pins at least one more weight
    // to a bound, so one round per criterion plus a final check suffices.
    for _ in 0..=Criterion::ALL.len() {
        let diff = 1.0 - weights.sum();
        if diff.abs() < CONVERGENCE_EPSILON {
            break;
        }

        let adjustable = Criterion::ALL
            .into_iter()
            .filter(|c| {
                let w = weights.get(*c);
                if diff > 0.0 {
                    w < MAX_WEIGHT
                } else {
                    w > MIN_WEIGHT
                }
            })
            .collect::<Vec<_>>();
        if adjustable.is_empty() {
            break;
        }

        let adjustment = diff / adjustable.len() as f64;
        for criterion in adjustable {
            weights.set(criterion, clamp_weight(weights.get(criterion) + adjustment));
        }
    }

    let total = weights.sum();
    weights.map(|w| clamp_weight(w / total))
}

fn clamp_weight(w: f64) -> f64 {
    if w.is_nan() {
        MIN_WEIGHT
    } else {
        w.clamp(MIN_WEIGHT, MAX_WEIGHT)
    }
}
