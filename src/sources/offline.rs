//! Deterministic synthetic data generation for `OFFLINE_MODE`.
//!
//! Every real connector delegates here when offline mode is set instead
//! of touching the network — this path is also what the deterministic
//! forecast testing mode (spec.md §4.6) and the CI/air-gapped test suite
//! rely on. Seeded from `hash(source_id, region_id)` so the same request
//! always yields the same series (spec.md §4.1's "offline mode... MUST
//! never hit the network" + "deterministic series").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::series::DailySeries;

pub fn seed_from(parts: &[&str]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.hash(&mut hasher);
    }
    hasher.finish()
}

/// Generates a bounded random-walk series per feature, seeded so the
/// result is stable across repeated calls for the same
/// `(source_id, region_id)` pair. `features` gives each feature's
/// plausible `(min, max)` band.
pub fn synthetic_series(
    source_id: &str,
    region_id: &str,
    features: &[(&str, (f64, f64))],
    window_days: u32,
) -> DailySeries {
    let seed = seed_from(&[source_id, region_id]);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut series = DailySeries::empty();

    let end_date = Utc::now().date_naive();
    let start_date = end_date - ChronoDuration::days(window_days.max(1) as i64 - 1);

    let mut levels: Vec<f64> = features
        .iter()
        .map(|(_, (lo, hi))| rng.gen_range(*lo..=*hi))
        .collect();

    for day_offset in 0..window_days {
        let date = start_date + ChronoDuration::days(day_offset as i64);
        for (index, (name, (lo, hi))) in features.iter().enumerate() {
            let span = hi - lo;
            let drift = rng.gen_range(-0.04..0.04) * span;
            levels[index] = (levels[index] + drift).clamp(*lo, *hi);
            series.set(date, *name, levels[index]);
        }
    }

    series
}

/// Returns `true` roughly `probability` of the time, deterministically,
/// for deciding whether a synthetic source should simulate an empty
/// result (used sparingly; most offline connectors always succeed so
/// tests are stable).
pub fn deterministic_bool(source_id: &str, region_id: &str, probability: f64) -> bool {
    let seed = seed_from(&[source_id, region_id, "present"]);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.gen_bool(probability.clamp(0.0, 1.0))
}
