//! Horloges injectables.
//!
//! Tous les horodatages du moteur (accès au cache, `last_modified` des
//! enregistrements, échéances de backoff) passent par un [`Clock`]. En
//! production on utilise [`SystemClock`] ; les tests pilotent le temps avec
//! [`ManualClock`] sans jamais attendre l'horloge murale.

use chrono::{DateTime, Duration, Utc};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

/// Source de temps partagée entre les composants.
pub trait Clock: Send + Sync + Debug {
    /// Instant courant (UTC).
    fn now(&self) -> DateTime<Utc>;
}

/// Horloge partagée, telle que la reçoivent les constructeurs.
pub type SharedClock = Arc<dyn Clock>;

/// Horloge système.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Retourne une horloge système prête à être injectée.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Horloge pilotée à la main.
///
/// Le temps n'avance que sur appel explicite à [`ManualClock::advance`] ou
/// [`ManualClock::set`].
///
/// # Exemple
///
/// ```
/// use chrono::Duration;
/// use sereinutils::{Clock, ManualClock};
///
/// let clock = ManualClock::default();
/// let t0 = clock.now();
/// clock.advance(Duration::seconds(5));
/// assert_eq!(clock.now() - t0, Duration::seconds(5));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Fait avancer l'horloge de `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    /// Positionne l'horloge sur un instant précis.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Default for ManualClock {
    /// Démarre au 1er janvier 2025 à minuit, pour des tests reproductibles.
    fn default() -> Self {
        let start = DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_else(Utc::now);
        Self::new(start)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
