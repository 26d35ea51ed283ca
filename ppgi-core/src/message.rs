//! Typed wire records for the intersection protocol.
//!
//! Messages are JSON on the wire; byte fields travel as base64 strings and
//! unused fields are present but empty/zero, so both parties can share one
//! framing schema.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The only algorithm tag currently spoken.
pub const ALGORITHM_RSA: &str = "rsa";

/// Protocol step tags. `Unknown` captures unrecognised tags on receive; such
/// messages are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Host publishes `(n, e)`.
    HostSendPubKey,
    /// Client acknowledges the public key.
    ClientRcvPubKey,
    /// Host publishes its offline digests `ta`.
    HostHash,
    /// Client publishes a blinded batch `yb`.
    ClientBlind,
    /// Host returns blind signatures `zb`.
    HostBlindSign,
    /// Client publishes unblinded digests `tb`.
    ClientUnblind,
    /// Either side ships a matched subgraph bundle.
    ExchangeData,
    /// Fatal sentinel; the receiver exits.
    Shutdown,
    /// Anything else found on the wire.
    Unknown(String),
}

impl Step {
    /// The wire spelling of this tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::HostSendPubKey => "HostSendPubKey",
            Self::ClientRcvPubKey => "ClientRcvPubKey",
            Self::HostHash => "HostHash",
            Self::ClientBlind => "ClientBlind",
            Self::HostBlindSign => "HostBlindSign",
            Self::ClientUnblind => "ClientUnblind",
            Self::ExchangeData => "ExchangeData",
            Self::Shutdown => "Shutdown",
            Self::Unknown(tag) => tag,
        }
    }

    fn from_wire(tag: &str) -> Self {
        match tag {
            "HostSendPubKey" => Self::HostSendPubKey,
            "ClientRcvPubKey" => Self::ClientRcvPubKey,
            "HostHash" => Self::HostHash,
            "ClientBlind" => Self::ClientBlind,
            "HostBlindSign" => Self::HostBlindSign,
            "ClientUnblind" => Self::ClientUnblind,
            "ExchangeData" => Self::ExchangeData,
            "Shutdown" => Self::Shutdown,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Step {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&tag))
    }
}

/// The public half of the host keypair as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireKey {
    /// Modulus, big-endian minimal-length bytes. Empty when unused.
    #[serde(with = "base64_bytes")]
    pub n: Vec<u8>,
    /// Public exponent. Zero when unused.
    pub e: i64,
}

/// One protocol message. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Algorithm tag; always `rsa` for now.
    pub algorithm: String,
    /// Step tag.
    pub step: Step,
    /// Correlation handle for the round this message belongs to.
    pub session_key: String,
    /// Step-dependent byte payloads (digests, blinded values, JSON blobs).
    #[serde(with = "base64_list")]
    pub data: Vec<Vec<u8>>,
    /// Public key; meaningful only for `HostSendPubKey`.
    #[serde(default)]
    pub key: WireKey,
}

impl Message {
    /// A payload-carrying message for `step` in the round `session_key`.
    #[must_use]
    pub fn with_data(step: Step, session_key: String, data: Vec<Vec<u8>>) -> Self {
        Self {
            algorithm: ALGORITHM_RSA.to_owned(),
            step,
            session_key,
            data,
            key: WireKey::default(),
        }
    }

    /// The host's `HostSendPubKey` announcement.
    #[must_use]
    pub fn public_key(session_key: String, n: Vec<u8>, e: i64) -> Self {
        Self {
            algorithm: ALGORITHM_RSA.to_owned(),
            step: Step::HostSendPubKey,
            session_key,
            data: Vec::new(),
            key: WireKey { n, e },
        }
    }

    /// A bare acknowledgement or sentinel for `step`, echoing `session_key`.
    #[must_use]
    pub fn ack(step: Step, session_key: String) -> Self {
        Self::with_data(step, session_key, Vec::new())
    }
}

/// Derives an opaque correlation tag for a new protocol round:
/// `base64(sha256("{algorithm}-{step}-{wallclock}"))`. Collisions are
/// harmless; mismatched responses are dropped.
#[must_use]
pub fn generate_session_key(step: &Step) -> String {
    let seed = format!("{ALGORITHM_RSA}-{step}-{}", Utc::now().to_rfc3339());
    BASE64.encode(Sha256::digest(seed.as_bytes()))
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Engine, BASE64};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_list {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Engine, BASE64};

    pub fn serialize<S: Serializer>(data: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(data.len()))?;
        for item in data {
            seq.serialize_element(&BASE64.encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|item| BASE64.decode(item).map_err(serde::de::Error::custom))
            .collect()
    }
}
