//! Named one-way hash functions selectable from configuration.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha512};

use crate::error::Error;

/// A named digest function. Both parties must configure the same
/// `first_hash`/`second_hash` pair; a mismatch silently yields an empty
/// intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// 16-byte digests.
    Md5,
    /// 28-byte digests.
    Sha224,
    /// 32-byte digests.
    Sha256,
    /// 64-byte digests.
    Sha512,
}

impl HashKind {
    /// Digests `data` with the selected function.
    #[must_use]
    pub fn sum(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5 => Md5::digest(data).to_vec(),
            Self::Sha224 => Sha224::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Output length in bytes.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// The configuration name of this function.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(Self::Md5),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::Decode(format!("unknown hash function: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(HashKind::Md5)]
    #[test_case(HashKind::Sha224)]
    #[test_case(HashKind::Sha256)]
    #[test_case(HashKind::Sha512)]
    fn test_digest_len(kind: HashKind) {
        assert_eq!(kind.sum(b"ppgi").len(), kind.digest_len());
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            hex::encode(HashKind::Md5.sum(b"abc")),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            hex::encode(HashKind::Sha256.sum(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_round_trip() {
        for name in ["md5", "sha224", "sha256", "sha512"] {
            let kind: HashKind = name.parse().expect("known name");
            assert_eq!(kind.as_str(), name);
        }
        assert!("sha1".parse::<HashKind>().is_err());
    }
}
