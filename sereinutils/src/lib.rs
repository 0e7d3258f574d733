/// Utilitaires partagés par les crates Serein.
///
/// - [`Clock`] / [`SystemClock`] / [`ManualClock`] : horloges injectables
/// - [`format_bytes`] : affichage lisible des tailles dans les logs
mod clock;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

/// Formate une taille en octets avec l'unité binaire la plus adaptée.
///
/// # Exemples
///
/// ```
/// use sereinutils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.5 KiB");
/// assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}
