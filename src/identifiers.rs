use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Pure tokenizer applied to host-supplied identifiers before they leave
/// the device. The algorithm is a configuration parameter, not core logic.
pub type IdentifierHasher = fn(&str) -> String;

/// Length of the default truncated hex token.
pub const DEFAULT_TOKEN_LEN: usize = 16;

/// Default hasher: hex-encoded SHA-256, truncated to [`DEFAULT_TOKEN_LEN`]
/// characters.
pub fn truncated_sha256(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(DEFAULT_TOKEN_LEN);
    token
}

/// Applies `hasher` to every value in `pairs`, keyed by the identifier name.
pub fn hash_identifiers<'a, I>(hasher: IdentifierHasher, pairs: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), hasher(value)))
        .collect()
}
