//! Randomized pacing that approximates a human reader.
//!
//! Dwell times follow a bounded log-normal distribution; the order in which
//! result links are visited follows an exponential distribution over their
//! position, approximating how likely a user is to click the nth result.

use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Exp, LogNormal};

use super::constants::{HUMAN_SELECTION_LAMBDA, RANDOM_SAMPLE_ATTEMPTS};

/// Sample an index below `length` from an exponential distribution.
///
/// Returns 0 (the mode) when every attempt lands beyond the list or when the
/// list has a single element.
pub fn random_exponential_index<R: Rng + ?Sized>(
    rng: &mut R,
    lambda: f64,
    length: usize,
    attempts: usize,
) -> usize {
    if length < 2 {
        return 0;
    }
    let Ok(exponential) = Exp::new(lambda) else {
        return 0;
    };
    for _ in 0..attempts {
        let value = exponential.sample(rng);
        if value < length as f64 {
            return value.floor() as usize;
        }
    }
    0
}

/// Reorder values in place by repeatedly drawing an exponential index among
/// the not-yet-selected prefix and moving the pick to the end.
pub fn human_selection_shuffle<T, R: Rng + ?Sized>(rng: &mut R, values: &mut Vec<T>) {
    human_selection_shuffle_with(rng, values, HUMAN_SELECTION_LAMBDA);
}

pub fn human_selection_shuffle_with<T, R: Rng + ?Sized>(
    rng: &mut R,
    values: &mut Vec<T>,
    lambda: f64,
) {
    if values.len() < 2 {
        return;
    }
    let mut remaining = values.len();
    while remaining > 0 {
        let selected = random_exponential_index(rng, lambda, remaining, RANDOM_SAMPLE_ATTEMPTS);
        let value = values.remove(selected);
        values.push(value);
        remaining -= 1;
    }
}

/// Sample a log-normal value inside `[minimum, maximum]`, falling back to the
/// mode `exp(mu - sigma^2)` after `attempts` misses.
pub fn random_lognormal<R: Rng + ?Sized>(
    rng: &mut R,
    mu: f64,
    sigma: f64,
    minimum: f64,
    maximum: Option<f64>,
    attempts: usize,
) -> f64 {
    let mode = (mu - sigma * sigma).exp();
    let Ok(lognormal) = LogNormal::new(mu, sigma) else {
        return mode;
    };
    let maximum = maximum.unwrap_or(f64::INFINITY);
    for _ in 0..attempts {
        let value = lognormal.sample(rng);
        if (minimum..=maximum).contains(&value) {
            return value;
        }
    }
    mode
}

/// Parameters of a bounded log-normal dwell time, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumanDwellTime {
    pub mu: f64,
    pub sigma: f64,
    pub base: f64,
    pub multiplier: f64,
    pub minimum: f64,
    pub maximum: Option<f64>,
}

impl Default for HumanDwellTime {
    fn default() -> Self {
        Self {
            mu: 0.0,
            sigma: 0.5,
            base: 1.0,
            multiplier: 1.0,
            minimum: 1.0,
            maximum: Some(3.0),
        }
    }
}

impl HumanDwellTime {
    /// Parameter names accepted in configuration
    pub const ARGUMENTS: [&'static str; 6] =
        ["mu", "sigma", "base", "multiplier", "minimum", "maximum"];

    /// `base + lognormal * multiplier`, bounded to `[minimum, maximum]`
    pub fn sample_seconds<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let multiplier = if self.multiplier == 0.0 { 1.0 } else { self.multiplier };
        let lognormal_min = (self.minimum - self.base) / multiplier;
        let lognormal_max = self.maximum.map(|m| (m - self.base) / multiplier);
        let value = random_lognormal(
            rng,
            self.mu,
            self.sigma,
            lognormal_min,
            lognormal_max,
            RANDOM_SAMPLE_ATTEMPTS,
        );
        self.base + value * multiplier
    }

    /// Fresh random delay using the thread-local generator
    #[must_use]
    pub fn random_delay(&self) -> Duration {
        let seconds = self.sample_seconds(&mut rand::rng());
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn exponential_index_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for length in 1..20 {
            for _ in 0..100 {
                let index = random_exponential_index(&mut rng, HUMAN_SELECTION_LAMBDA, length, 10);
                assert!(index < length);
            }
        }
    }

    #[test]
    fn exponential_index_favours_the_front() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0usize; 10];
        for _ in 0..5_000 {
            counts[random_exponential_index(&mut rng, HUMAN_SELECTION_LAMBDA, 10, 10)] += 1;
        }
        assert!(counts[0] > counts[5]);
        assert!(counts[1] > counts[8]);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut values: Vec<u32> = (0..25).collect();
        human_selection_shuffle(&mut rng, &mut values);
        let mut sorted = values.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_leaves_short_lists_alone() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut values = vec!["only"];
        human_selection_shuffle(&mut rng, &mut values);
        assert_eq!(values, vec!["only"]);
    }

    #[test]
    fn dwell_time_respects_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let dwell = HumanDwellTime::default();
        for _ in 0..1_000 {
            let seconds = dwell.sample_seconds(&mut rng);
            assert!((1.0..=3.0).contains(&seconds), "{seconds} out of range");
        }
    }

    #[test]
    fn lognormal_falls_back_to_mode() {
        let mut rng = StdRng::seed_from_u64(1);
        // An impossible window forces the fallback
        let value = random_lognormal(&mut rng, 0.0, 0.5, 100.0, Some(101.0), 10);
        assert!((value - (-0.25f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn invalid_parameters_fall_back() {
        let mut rng = StdRng::seed_from_u64(5);
        let value = random_lognormal(&mut rng, 0.0, -1.0, 0.0, None, 10);
        assert!((value - (-1.0f64).exp()).abs() < 1e-12);
        assert_eq!(random_exponential_index(&mut rng, -1.0, 10, 10), 0);
    }
}
