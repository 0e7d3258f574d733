//! Backoff exponentiel avec gigue pour les nouvelles tentatives d'envoi.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Politique de nouvelles tentatives après un échec temporaire
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Échecs temporaires consécutifs avant de passer en `failed`
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Gigue maximale, en fraction de `initial_delay` (bornée à 0.99)
    pub jitter: f64,
}

impl RetryPolicy {
    /// Délai avant la tentative suivant le `failures`-ième échec, sans gigue
    ///
    /// `initial * multiplier^(failures - 1)`, plafonné à `max_delay`.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Borne supérieure de la gigue ajoutée au délai de base
    ///
    /// Toujours inférieure à `initial_delay` : tant que le plafond n'est pas
    /// atteint et que `multiplier >= 1 + jitter`, chaque délai dépasse
    /// strictement le précédent.
    pub fn max_jitter(&self) -> Duration {
        self.initial_delay.mul_f64(self.jitter.clamp(0.0, 0.99))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

/// Générateur de délais pour une [`RetryPolicy`]
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Gigue reproductible, pour les tests
    pub fn seeded(policy: RetryPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Délai à attendre après le `failures`-ième échec consécutif
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.policy.base_delay(failures);
        let max_jitter_us = self.policy.max_jitter().as_micros() as u64;
        if max_jitter_us == 0 {
            return base;
        }

        let jitter_us = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .random_range(0..max_jitter_us);
        base + Duration::from_micros(jitter_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    #[test]
    fn base_delay_doubles_then_caps() {
        let policy = policy();
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        assert_eq!(policy.base_delay(6), Duration::from_secs(2));
        assert_eq!(policy.base_delay(60), Duration::from_secs(2));
    }

    #[test]
    fn jittered_delays_keep_growing_until_the_cap() {
        for seed in 0..50 {
            let backoff = Backoff::seeded(policy(), seed);
            let delays: Vec<_> = (1..=5).map(|n| backoff.delay(n)).collect();
            for pair in delays.windows(2) {
                assert!(pair[1] > pair[0], "seed {}: {:?}", seed, delays);
            }
            for (n, delay) in delays.iter().enumerate() {
                let base = policy().base_delay(n as u32 + 1);
                assert!(*delay >= base && *delay < base + Duration::from_millis(50));
            }
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let backoff = Backoff::new(RetryPolicy {
            jitter: 0.0,
            ..policy()
        });
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
    }
}
