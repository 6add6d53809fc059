use sha2::{Digest, Sha256};

/// SHA-256 of the canonical text as 64 lowercase hex characters
///
/// Only used to detect unchanged input; never treat it as an identity.
pub fn fingerprint(canonical_text: &str) -> String {
    hex::encode(Sha256::digest(canonical_text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::{compose, ProfileSignal};

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let signal = ProfileSignal::new(vec!["a".into()], Some("b".into()), vec!["c".into()]);
        let first = fingerprint(&compose(&signal));
        let second = fingerprint(&compose(&signal));
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_single_tag_change_changes_fingerprint() {
        let base = ProfileSignal::new(vec!["hiking".into(), "coffee".into()], None, Vec::new());
        let changed = ProfileSignal::new(vec!["hiking".into(), "tea".into()], None, Vec::new());
        assert_ne!(fingerprint(&compose(&base)), fingerprint(&compose(&changed)));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
