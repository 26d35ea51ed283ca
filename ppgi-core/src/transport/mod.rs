//! Message transport seam.
//!
//! Each party publishes on one channel and consumes the other; the runtime's
//! receive pump owns the [`Consumer`] and the main loop owns the
//! [`Producer`]. The deployment target is a broker (pulsar) with JSON-schema
//! framing; that driver lives behind these traits. In-tree implementations:
//! [`channel`] for in-process pairs and [`tcp`] for a direct peer link.

use std::future::Future;

use crate::error::Result;
use crate::message::Message;

pub mod channel;
pub mod tcp;

/// Sending half of the transport.
pub trait Producer: Send + 'static {
    /// Ships one message, resolving once the transport acknowledged it.
    fn send(&mut self, message: &Message) -> impl Future<Output = Result<()>> + Send;

    /// Human-readable peer description for logs.
    fn connection_info(&self) -> String;
}

/// Receiving half of the transport.
pub trait Consumer: Send + 'static {
    /// Waits for the next framed, schema-valid message.
    ///
    /// Implementations return [`crate::Error::Decode`] for frames that fail
    /// to parse (the pump drops those) and [`crate::Error::TransportClosed`]
    /// when the peer or broker is gone.
    fn receive(&mut self) -> impl Future<Output = Result<Message>> + Send;
}
