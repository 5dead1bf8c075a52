use sha2::{Digest, Sha256};

/// Content address for a logical attachment key: SHA-256 of the key bytes,
/// lowercase hex. Stable across runs, so files written by a previous process
/// can be rediscovered by name alone.
pub fn fingerprint(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        assert_eq!(fingerprint("album-1/photo-2"), fingerprint("album-1/photo-2"));
    }

    #[test]
    fn known_digest() {
        // sha256("") is a fixed vector; guards against accidental salting.
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn distinct_keys_distinct_digests() {
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }
}
