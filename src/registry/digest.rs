//! Content-address digests (`sha256:<64-hex>`).

use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

const PREFIX: &str = "sha256:";
const HEX_LEN: usize = 64;

/// A content-address digest: `sha256:` followed by 64 lowercase hex chars.
/// Never truncated when used in storage paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

/// An error parsing a [`Digest`] from a string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestParseError {
    /// The string did not start with `sha256:`.
    #[error("unsupported digest algorithm (only sha256 is supported): {0}")]
    UnsupportedAlgorithm(String),
    /// The hex portion was not exactly 64 characters.
    #[error("wrong digest length, expected {HEX_LEN} hex chars")]
    WrongLength,
    /// The hex portion contained non-hex characters or uppercase letters.
    #[error("digest is not lowercase hex")]
    NotLowercaseHex,
}

impl Digest {
    /// Computes the digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let hash = Sha256::digest(bytes);
        Digest(format!("{PREFIX}{}", hex::encode(hash)))
    }

    /// The full `sha256:<hex>` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Just the hex portion, e.g. for building storage paths.
    pub fn hex(&self) -> &str {
        &self.0[PREFIX.len()..]
    }

    /// The first two hex characters, used as a storage shard directory.
    pub fn shard(&self) -> &str {
        &self.hex()[..2]
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let hex_part = raw
            .strip_prefix(PREFIX)
            .ok_or_else(|| DigestParseError::UnsupportedAlgorithm(raw.to_string()))?;

        if hex_part.len() != HEX_LEN {
            return Err(DigestParseError::WrongLength);
        }

        if !hex_part
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DigestParseError::NotLowercaseHex);
        }

        Ok(Digest(raw.to_string()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// A rolling SHA-256 hasher used to verify upload sessions incrementally.
#[derive(Default, Clone)]
pub struct RollingHash(Sha256);

impl RollingHash {
    /// Creates a fresh, empty rolling hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds another chunk of bytes into the hash.
    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    /// Finalizes the hash into a [`Digest`], consuming the hasher.
    pub fn finalize(self) -> Digest {
        let hash = self.0.finalize();
        Digest(format!("{PREFIX}{}", hex::encode(hash)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let digest = Digest::of(b"hello world");
        let parsed: Digest = digest.to_string().parse().unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_eq!(
            "sha512:abc".parse::<Digest>(),
            Err(DigestParseError::UnsupportedAlgorithm("sha512:abc".into()))
        );
    }

    #[test]
    fn rejects_wrong_length() {
        let short = format!("{PREFIX}abcd");
        assert_eq!(short.parse::<Digest>(), Err(DigestParseError::WrongLength));
    }

    #[test]
    fn rejects_uppercase_hex() {
        let upper = format!("{PREFIX}{}", "A".repeat(HEX_LEN));
        assert_eq!(
            upper.parse::<Digest>(),
            Err(DigestParseError::NotLowercaseHex)
        );
    }

    #[test]
    fn rolling_hash_matches_one_shot_digest() {
        let mut rolling = RollingHash::new();
        rolling.update(b"hello ");
        rolling.update(b"world");
        assert_eq!(rolling.finalize(), Digest::of(b"hello world"));
    }

    #[test]
    fn shard_is_first_two_hex_chars() {
        let digest = Digest::of(b"shard me");
        assert_eq!(digest.shard(), &digest.hex()[..2]);
        assert_eq!(digest.shard().len(), 2);
    }
}
