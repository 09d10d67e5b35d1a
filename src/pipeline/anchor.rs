//! Anchor strings: literal text markers an e-signature service searches for
//! to place its signature and date fields.
//!
//! The signature anchor is fresh per augmented document. The date anchor is a
//! fixed literal because the signing service's template matches it verbatim
//! across every document.

use std::sync::atomic::{AtomicU64, Ordering};

/// The date-field sentinel. Never regenerate or localise this.
pub const DATE_ANCHOR: &str = "##DATE_HERE##";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a signature anchor unique within this process.
///
/// Format: `##SIGN_HERE_<unix-millis>_<sequence>_<random>##`. The sequence
/// number alone guarantees in-process uniqueness; the millisecond stamp and
/// the random fragment keep concurrent processes apart.
pub fn sign_anchor() -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("##SIGN_HERE_{}_{}_{}##", millis, seq, &random[..8])
}

/// The fixed date anchor.
pub fn date_anchor() -> &'static str {
    DATE_ANCHOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sign_anchors_are_unique() {
        let anchors: HashSet<String> = (0..1000).map(|_| sign_anchor()).collect();
        assert_eq!(anchors.len(), 1000);
    }

    #[test]
    fn sign_anchor_shape() {
        let a = sign_anchor();
        assert!(a.starts_with("##SIGN_HERE_"), "got: {a}");
        assert!(a.ends_with("##"), "got: {a}");
        assert!(a.is_ascii());
        assert!(!a.contains(['(', ')', '\\', ' ']));
    }

    #[test]
    fn date_anchor_is_fixed() {
        assert_eq!(date_anchor(), date_anchor());
        assert_eq!(date_anchor(), "##DATE_HERE##");
    }

    #[test]
    fn unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| sign_anchor()).collect::<Vec<_>>()))
            .collect();
        let mut all = HashSet::new();
        for h in handles {
            for a in h.join().unwrap() {
                assert!(all.insert(a));
            }
        }
        assert_eq!(all.len(), 1000);
    }
}
