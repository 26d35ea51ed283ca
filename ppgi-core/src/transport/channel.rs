//! In-process transport over unbounded channels, for tests and loopback
//! wiring of a host/client pair inside one process.

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::Message;

use super::{Consumer, Producer};

/// Sending half of an in-process link.
#[derive(Debug)]
pub struct ChannelProducer {
    tx: mpsc::UnboundedSender<Message>,
    label: String,
}

/// Receiving half of an in-process link.
#[derive(Debug)]
pub struct ChannelConsumer {
    rx: mpsc::UnboundedReceiver<Message>,
}

/// Both halves of one party's transport.
pub type ChannelEndpoint = (ChannelProducer, ChannelConsumer);

/// Creates a connected pair of endpoints; what the first sends, the second
/// receives, and vice versa.
#[must_use]
pub fn pair() -> (ChannelEndpoint, ChannelEndpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        (
            ChannelProducer { tx: a_tx, label: "channel:a->b".to_owned() },
            ChannelConsumer { rx: a_rx },
        ),
        (
            ChannelProducer { tx: b_tx, label: "channel:b->a".to_owned() },
            ChannelConsumer { rx: b_rx },
        ),
    )
}

impl Producer for ChannelProducer {
    async fn send(&mut self, message: &Message) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| Error::TransportClosed)
    }

    fn connection_info(&self) -> String {
        self.label.clone()
    }
}

impl Consumer for ChannelConsumer {
    async fn receive(&mut self) -> Result<Message> {
        self.rx.recv().await.ok_or(Error::TransportClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Step;

    #[tokio::test]
    async fn test_pair_round_trip_in_order() {
        let ((mut a_tx, _a_rx), (_b_tx, mut b_rx)) = pair();
        for i in 0..10 {
            a_tx.send(&Message::ack(Step::HostHash, format!("s{i}")))
                .await
                .unwrap();
        }
        for i in 0..10 {
            let received = b_rx.receive().await.unwrap();
            assert_eq!(received.session_key, format!("s{i}"));
        }
    }

    #[tokio::test]
    async fn test_closed_pair_reports_transport_closed() {
        let ((a_tx, a_rx), (_b_tx, mut b_rx)) = pair();
        drop(a_tx);
        drop(a_rx);
        assert!(matches!(
            b_rx.receive().await,
            Err(Error::TransportClosed)
        ));
    }
}
