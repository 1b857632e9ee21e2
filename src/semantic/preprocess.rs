//! Content preprocessing and addressing for embedding input.
//!
//! A bet's embedding text is its trimmed title, followed by the trimmed
//! description after a blank line when the description is non-empty. The
//! content hash is the SHA-256 hex digest of that text and is the key of the
//! embedding cache.

use sha2::{Digest, Sha256};

/// Separator between title and description.
const SEPARATOR: &str = "\n\n";

/// Build the normalized text that gets embedded.
pub fn text_for_embedding(title: &str, description: Option<&str>) -> String {
    let title = title.trim();
    let description = description.map(str::trim).unwrap_or_default();

    if description.is_empty() {
        title.to_string()
    } else {
        format!("{title}{SEPARATOR}{description}")
    }
}

/// SHA-256 of the UTF-8 bytes of `text`, lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
