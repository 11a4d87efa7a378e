//! Content fingerprinting.
//!
//! SHA-256 over the UTF-8 bytes of the input, rendered as lowercase hex.
//! The digest carries no salt, so it is stable across process restarts and
//! serves as the idempotence key for pages (`content_hash`) and whole
//! documents (`file_hash`).

use sha2::{Digest, Sha256};

/// Hash a piece of text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash a whole document: the concatenation of its kept page texts, in order.
pub fn file_hash<'a, I>(pages: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for page in pages {
        hasher.update(page.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn empty_input_is_the_empty_digest() {
        assert_eq!(content_hash(""), EMPTY_SHA256);
        assert_eq!(file_hash(std::iter::empty()), EMPTY_SHA256);
    }

    #[test]
    fn deterministic() {
        assert_eq!(content_hash("The sky is blue."), content_hash("The sky is blue."));
        assert_ne!(content_hash("The sky is blue."), content_hash("The sky is blue"));
    }

    #[test]
    fn file_hash_equals_hash_of_concatenation() {
        let pages = ["first page\n", "second page\n"];
        assert_eq!(file_hash(pages), content_hash("first page\nsecond page\n"));
    }
}
