//! Error types shared across the intersection runtime and its collaborators.

use thiserror::Error;

/// Result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the PSI engine, the collaborator seams and the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// RSA key generation failed (platform RNG or prime search).
    #[error("key generation failed: {0}")]
    KeyGen(String),

    /// The platform random source failed while drawing blinding factors.
    #[error("random source failed: {0}")]
    Rng(String),

    /// A blinding or signing operation was attempted before key exchange.
    #[error("public key not set")]
    MissingPublicKey,

    /// A host-side operation was attempted without private key material.
    #[error("private key not available")]
    MissingPrivateKey,

    /// A drawn blinding factor shares a factor with the modulus. With
    /// realistic key sizes this is practically unreachable.
    #[error("blinding factor is not invertible modulo n")]
    NonInvertibleBlindingFactor,

    /// Signature and blinding-factor batches must pair up one-to-one.
    #[error("mismatched batch lengths: {signatures} signatures, {factors} blinding factors")]
    BatchLengthMismatch {
        /// Number of blind signatures received.
        signatures: usize,
        /// Number of stored blinding factors for the session.
        factors: usize,
    },

    /// KV store operation failed. Transient for the runtime.
    #[error("kv store: {0}")]
    Kv(String),

    /// Message send/receive failed. Transient for the runtime when sending.
    #[error("transport: {0}")]
    Transport(String),

    /// The receive side of the transport terminated.
    #[error("transport closed")]
    TransportClosed,

    /// Graph database operation failed. Transient for the runtime.
    #[error("graph store: {0}")]
    Graph(String),

    /// The graph-definition file could not be read or parsed.
    #[error("invalid graph definition: {0}")]
    GraphDefinition(String),

    /// An inbound payload could not be decoded. The message is dropped.
    #[error("decode: {0}")]
    Decode(String),

    /// The client never acknowledged the public key within `conn_timeout`.
    #[error("handshake timed out after {0}s")]
    HandshakeTimeout(u64),

    /// The peer sent the `Shutdown` sentinel.
    #[error("shutdown requested by peer")]
    ShutdownReceived,

    /// A role string other than `host` or `client` was supplied.
    #[error("unsupported role: {0}")]
    UnsupportedRole(String),
}

impl Error {
    /// Whether the runtime must exit on this error instead of skipping the
    /// current iteration and retrying on the next tick.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::KeyGen(_)
                | Self::GraphDefinition(_)
                | Self::HandshakeTimeout(_)
                | Self::ShutdownReceived
                | Self::TransportClosed
                | Self::UnsupportedRole(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
