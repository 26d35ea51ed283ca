//! The intersection runtime: drives the PSI state machine for one role over
//! the transport, KV and graph seams.
//!
//! Concurrency model: a background pump forwards `Consumer::receive()` into
//! an unbounded in-process channel; the main loop selects between that
//! channel and a periodic harvest ticker. Handlers run to completion before
//! the next event is taken, so message handlers and tick handlers never
//! overlap and messages are processed in arrival order.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::bigint;
use crate::blind::RsaBlindEngine;
use crate::error::{Error, Result};
use crate::graph::{EdgeData, GraphGateway, GraphSchema, VertexData};
use crate::kv::KvStore;
use crate::message::{generate_session_key, Message, Step, ALGORITHM_RSA};
use crate::session::SessionStore;
use crate::transport::{Consumer, Producer};

/// Which side of the protocol this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the keypair; signs blinded batches.
    Host,
    /// Blinds and unblinds against the host's public key.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Client => "client",
        })
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" => Ok(Self::Host),
            "client" => Ok(Self::Client),
            other => Err(Error::UnsupportedRole(other.to_owned())),
        }
    }
}

/// Runtime timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Role to run.
    pub role: Role,
    /// Period of the identifier-harvest ticker.
    pub fetch_interval: Duration,
    /// Hard limit on the host's wait for the public-key acknowledgement.
    pub conn_timeout: Duration,
}

/// The protocol engine. Owns the engine, the producer, the session store and
/// the graph gateway exclusively; the consumer is handed to the receive pump
/// when [`run`](Self::run) starts.
pub struct IntersectionRuntime<P, K, G> {
    role: Role,
    engine: RsaBlindEngine,
    producer: P,
    sessions: SessionStore<K>,
    graph: G,
    schema: GraphSchema,
    fetch_interval: Duration,
    conn_timeout: Duration,
    last_fetch: Option<i64>,
}

impl<P, K, G> IntersectionRuntime<P, K, G>
where
    P: Producer,
    K: KvStore,
    G: GraphGateway,
{
    /// Assembles a runtime from its collaborators.
    pub fn new(
        options: RuntimeOptions,
        engine: RsaBlindEngine,
        producer: P,
        kv: K,
        graph: G,
        schema: GraphSchema,
    ) -> Self {
        Self {
            role: options.role,
            engine,
            producer,
            sessions: SessionStore::new(kv),
            graph,
            schema,
            fetch_interval: options.fetch_interval,
            conn_timeout: options.conn_timeout,
            last_fetch: None,
        }
    }

    /// Runs the state machine for this role until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop: handshake timeout, a
    /// received `Shutdown` sentinel, or a terminated transport. Transient
    /// failures (KV, graph, broker send) are logged and retried on the next
    /// tick.
    pub async fn run<C: Consumer>(mut self, consumer: C) -> Result<()> {
        info!(role = %self.role, peer = %self.producer.connection_info(), "intersection runtime starting");
        let mut inbox = spawn_receive_pump(consumer);
        match self.role {
            Role::Host => self.run_host(&mut inbox).await,
            Role::Client => self.run_client(&mut inbox).await,
        }
    }

    async fn run_host(&mut self, inbox: &mut UnboundedReceiver<Message>) -> Result<()> {
        self.exchange_public_key(inbox).await?;

        let mut ticker = harvest_ticker(self.fetch_interval);
        loop {
            tokio::select! {
                received = inbox.recv() => {
                    let message = received.ok_or(Error::TransportClosed)?;
                    if let Err(e) = self.handle_host_message(message).await {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        warn!(error = %e, "handler failed, message skipped");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.host_tick().await {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        warn!(error = %e, "harvest iteration failed, retrying next tick");
                    }
                }
            }
        }
    }

    async fn run_client(&mut self, inbox: &mut UnboundedReceiver<Message>) -> Result<()> {
        let mut ticker = harvest_ticker(self.fetch_interval);
        loop {
            tokio::select! {
                received = inbox.recv() => {
                    let message = received.ok_or(Error::TransportClosed)?;
                    if let Err(e) = self.handle_client_message(message).await {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        warn!(error = %e, "handler failed, message skipped");
                    }
                }
                _ = ticker.tick() => {
                    if !self.engine.has_public_key() {
                        debug!("public key not received yet, skipping harvest");
                        continue;
                    }
                    if let Err(e) = self.client_tick().await {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        warn!(error = %e, "harvest iteration failed, retrying next tick");
                    }
                }
            }
        }
    }

    /// Host bootstrap: announce `(n, e)`, then block until the client echoes
    /// the session key, up to `conn_timeout`.
    async fn exchange_public_key(
        &mut self,
        inbox: &mut UnboundedReceiver<Message>,
    ) -> Result<()> {
        let session_key = generate_session_key(&Step::HostSendPubKey);
        let (n, e) = self.engine.public_key()?;
        self.producer
            .send(&Message::public_key(session_key.clone(), n, e))
            .await?;
        info!(session_key = %session_key, "public key announced, waiting for acknowledgement");

        let wait_for_ack = async {
            while let Some(message) = inbox.recv().await {
                if message.step == Step::ClientRcvPubKey && message.session_key == session_key {
                    return Ok(());
                }
                warn!(step = %message.step, session_key = %message.session_key,
                    "unexpected message during key exchange, dropping");
            }
            Err(Error::TransportClosed)
        };
        match time::timeout(self.conn_timeout, wait_for_ack).await {
            Ok(result) => {
                info!("key exchange completed");
                result
            }
            Err(_) => Err(Error::HandshakeTimeout(self.conn_timeout.as_secs())),
        }
    }

    async fn handle_host_message(&mut self, message: Message) -> Result<()> {
        if message.algorithm != ALGORITHM_RSA {
            warn!(algorithm = %message.algorithm, "unsupported algorithm, dropping");
            return Ok(());
        }
        match &message.step {
            Step::ClientBlind => {
                let blinded = bigint::from_bytes_list(&message.data);
                let signatures = self.engine.host_blind_signing(&blinded)?;
                self.producer
                    .send(&Message::with_data(
                        Step::HostBlindSign,
                        message.session_key.clone(),
                        bigint::to_bytes_list(&signatures),
                    ))
                    .await?;
                debug!(session_key = %message.session_key, count = blinded.len(),
                    "signed blinded batch");
                Ok(())
            }
            Step::ClientUnblind => self.match_and_exchange(&message).await,
            Step::ExchangeData => self.ingest_subgraph(&message),
            Step::ClientRcvPubKey => {
                debug!(session_key = %message.session_key,
                    "duplicate public-key acknowledgement, ignoring");
                Ok(())
            }
            Step::Shutdown => {
                error!(session_key = %message.session_key, "peer requested shutdown");
                Err(Error::ShutdownReceived)
            }
            other => {
                warn!(step = %other, session_key = %message.session_key,
                    "unexpected step, dropping");
                Ok(())
            }
        }
    }

    async fn handle_client_message(&mut self, message: Message) -> Result<()> {
        if message.algorithm != ALGORITHM_RSA {
            warn!(algorithm = %message.algorithm, "unsupported algorithm, dropping");
            return Ok(());
        }
        match &message.step {
            Step::HostSendPubKey => self.accept_public_key(&message).await,
            Step::HostBlindSign => self.unblind_signatures(&message).await,
            Step::HostHash => self.match_and_exchange(&message).await,
            Step::ExchangeData => self.ingest_subgraph(&message),
            Step::Shutdown => {
                error!(session_key = %message.session_key, "peer requested shutdown");
                Err(Error::ShutdownReceived)
            }
            other => {
                warn!(step = %other, session_key = %message.session_key,
                    "unexpected step, dropping");
                Ok(())
            }
        }
    }

    /// Client side of the key exchange. A zero-length modulus or non-positive
    /// exponent is answered with the `Shutdown` sentinel and never installed.
    async fn accept_public_key(&mut self, message: &Message) -> Result<()> {
        if self.engine.has_public_key() {
            warn!(session_key = %message.session_key,
                "public key already installed, dropping announcement");
            return Ok(());
        }
        if message.key.n.is_empty() || message.key.e <= 0 {
            error!(session_key = %message.session_key,
                "invalid public key received, requesting shutdown");
            self.producer
                .send(&Message::ack(Step::Shutdown, message.session_key.clone()))
                .await?;
            return Ok(());
        }
        #[allow(clippy::cast_sign_loss)]
        self.engine
            .set_public_key(&message.key.n, message.key.e as u64);
        self.producer
            .send(&Message::ack(
                Step::ClientRcvPubKey,
                message.session_key.clone(),
            ))
            .await?;
        info!(session_key = %message.session_key, "public key installed");
        Ok(())
    }

    /// Host tick: harvest fresh identifiers, publish their offline digests
    /// and remember the digest → identifier mapping.
    async fn host_tick(&mut self) -> Result<()> {
        let end = Utc::now().timestamp();
        let ids = self.harvest(end)?;
        if ids.is_empty() {
            debug!("no new identifiers in this window");
            self.last_fetch = Some(end);
            return Ok(());
        }
        let digests = self.engine.host_offline_hash(&ids)?;
        self.sessions.record_hash_ids(&digests, &ids)?;
        let session_key = generate_session_key(&Step::HostHash);
        self.producer
            .send(&Message::with_data(
                Step::HostHash,
                session_key.clone(),
                digests,
            ))
            .await?;
        info!(session_key = %session_key, count = ids.len(), "offline digests published");
        self.last_fetch = Some(end);
        Ok(())
    }

    /// Client tick: harvest fresh identifiers, publish the blinded batch and
    /// persist the session's factors and origin list.
    async fn client_tick(&mut self) -> Result<()> {
        let end = Utc::now().timestamp();
        let ids = self.harvest(end)?;
        if ids.is_empty() {
            debug!("no new identifiers in this window");
            self.last_fetch = Some(end);
            return Ok(());
        }
        let (blinded, factors) = self.engine.client_blinding(&ids)?;
        let session_key = generate_session_key(&Step::ClientBlind);
        self.producer
            .send(&Message::with_data(
                Step::ClientBlind,
                session_key.clone(),
                bigint::to_bytes_list(&blinded),
            ))
            .await?;
        self.sessions.store_origin_ids(&session_key, &ids)?;
        self.sessions.store_blinding_factors(&session_key, &factors)?;
        info!(session_key = %session_key, count = ids.len(), "blinded batch published");
        self.last_fetch = Some(end);
        Ok(())
    }

    /// Client handler for blind signatures: unblind, publish the final
    /// digests, extend the digest → identifier map and release the session's
    /// blinding factors.
    async fn unblind_signatures(&mut self, message: &Message) -> Result<()> {
        let Some(factors) = self.sessions.blinding_factors(&message.session_key)? else {
            warn!(session_key = %message.session_key,
                "no pending blinding factors for session, dropping");
            return Ok(());
        };
        let signatures = bigint::from_bytes_list(&message.data);
        let digests = self.engine.client_unblinding(&signatures, &factors)?;
        self.producer
            .send(&Message::with_data(
                Step::ClientUnblind,
                message.session_key.clone(),
                digests.clone(),
            ))
            .await?;

        match self.sessions.origin_ids(&message.session_key)? {
            Some(ids) if ids.len() == digests.len() => {
                self.sessions.record_hash_ids(&digests, &ids)?;
            }
            Some(ids) => {
                warn!(session_key = %message.session_key, digests = digests.len(),
                    ids = ids.len(), "digest batch does not match origin list, dropping");
            }
            None => {
                warn!(session_key = %message.session_key,
                    "no origin identifiers for session, dropping");
            }
        }
        self.sessions.delete_blinding_factors(&message.session_key)?;
        debug!(session_key = %message.session_key, "unblinded digests published");
        Ok(())
    }

    /// Shared by the host's `ClientUnblind` and the client's `HostHash`
    /// handlers: look the peer's digests up in the local map, record the
    /// matches and answer with the induced subgraph.
    async fn match_and_exchange(&mut self, message: &Message) -> Result<()> {
        let matched = self.matched_ids(&message.data)?;
        if matched.is_empty() {
            debug!(session_key = %message.session_key, "no intersection in this batch");
            return Ok(());
        }
        self.sessions.record_matched(&matched)?;
        info!(session_key = %message.session_key, matched = matched.len(),
            "intersection found");
        let bundle = self.build_subgraph(&matched)?;
        self.producer
            .send(&Message::with_data(
                Step::ExchangeData,
                message.session_key.clone(),
                bundle,
            ))
            .await?;
        Ok(())
    }

    /// Identifiers behind the peer's digests, deduplicated, input order.
    fn matched_ids(&self, digests: &[Vec<u8>]) -> Result<Vec<String>> {
        let found = self.sessions.ids_for_digests(digests)?;
        let mut seen = HashSet::new();
        Ok(found
            .into_iter()
            .flatten()
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    /// Packages the neighbourhood of the matched identifiers. Edges survive
    /// only when both endpoints are confirmed matches, so no link to an
    /// unmatched vertex leaves this side.
    fn build_subgraph(&self, matched: &[String]) -> Result<Vec<Vec<u8>>> {
        let vertices = self.graph.neighbor_vertices(matched)?;
        let edges = self.graph.neighbor_edges(matched)?;

        let mut endpoints: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for edge in &edges {
            for vid in [&edge.source, &edge.destination] {
                if seen.insert(vid.clone()) {
                    endpoints.push(vid.clone());
                }
            }
        }
        let flags = self.sessions.check_matched(&endpoints)?;
        let allowed: HashSet<&str> = endpoints
            .iter()
            .zip(&flags)
            .filter_map(|(vid, ok)| ok.then_some(vid.as_str()))
            .collect();
        let shared: Vec<&EdgeData> = edges
            .iter()
            .filter(|e| {
                allowed.contains(e.source.as_str()) && allowed.contains(e.destination.as_str())
            })
            .collect();

        Ok(vec![
            serde_json::to_vec(&self.schema)?,
            serde_json::to_vec(&vertices)?,
            serde_json::to_vec(&shared)?,
        ])
    }

    /// Receiver side of `ExchangeData`: re-materialise the three payloads and
    /// upsert them. Replays are harmless, the upserts are idempotent.
    fn ingest_subgraph(&self, message: &Message) -> Result<()> {
        if message.data.len() != 3 {
            return Err(Error::Decode(format!(
                "subgraph bundle has {} parts, expected 3",
                message.data.len()
            )));
        }
        let peer_schema: GraphSchema = serde_json::from_slice(&message.data[0])?;
        if peer_schema.node_types() != self.schema.node_types() {
            warn!(session_key = %message.session_key,
                "peer graph definition differs, ingesting anyway");
        }
        let vertices: Vec<VertexData> = serde_json::from_slice(&message.data[1])?;
        let edges: Vec<EdgeData> = serde_json::from_slice(&message.data[2])?;
        self.graph.insert_vertices(&vertices)?;
        self.graph.insert_edges(&edges)?;
        info!(session_key = %message.session_key, vertices = vertices.len(),
            edges = edges.len(), "matched subgraph ingested");
        Ok(())
    }

    /// New identifiers across all principle node types for the window ending
    /// at `end`. The window only advances when the whole iteration succeeds.
    fn harvest(&self, end: i64) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        for node in &self.schema.nodes {
            for id in self.graph.lookup_ids(node, self.last_fetch, end)? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

/// First tick fires one full interval after startup, like a wall-clock
/// ticker.
fn harvest_ticker(period: Duration) -> time::Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    ticker
}

/// Forwards every received message into an in-process channel. Undecodable
/// frames are dropped; a dead transport ends the pump, which the main loop
/// observes as a closed channel.
fn spawn_receive_pump<C: Consumer>(mut consumer: C) -> UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match consumer.receive().await {
                Ok(message) => {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Err(Error::Decode(e)) => {
                    warn!(error = %e, "undecodable message, dropping");
                }
                Err(e) => {
                    warn!(error = %e, "receive pump terminating");
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::MemoryGraph;
    use crate::hash::HashKind;
    use crate::kv::MemoryKv;
    use crate::transport::channel;

    fn empty_schema() -> GraphSchema {
        GraphSchema {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    fn options(role: Role, conn_timeout: Duration) -> RuntimeOptions {
        RuntimeOptions {
            role,
            fetch_interval: Duration::from_secs(3600),
            conn_timeout,
        }
    }

    #[tokio::test]
    async fn test_pump_preserves_message_order() {
        let ((mut tx, _unused_rx), (_unused_tx, rx)) = channel::pair();
        let mut inbox = spawn_receive_pump(rx);
        for i in 0..3 {
            tx.send(&Message::ack(Step::HostHash, format!("m{i}")))
                .await
                .unwrap();
        }
        for i in 0..3 {
            assert_eq!(inbox.recv().await.unwrap().session_key, format!("m{i}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_handshake_timeout_is_fatal() {
        let ((host_tx, host_rx), (_client_tx, mut client_rx)) = channel::pair();

        let mut engine = RsaBlindEngine::new(HashKind::Sha256, HashKind::Md5);
        engine.generate_keypair(1024).expect("keygen");
        let runtime = IntersectionRuntime::new(
            options(Role::Host, Duration::from_secs(1)),
            engine,
            host_tx,
            MemoryKv::new(),
            MemoryGraph::new(1),
            empty_schema(),
        );

        let started = std::time::Instant::now();
        let result = runtime.run(host_rx).await;
        assert!(matches!(result, Err(Error::HandshakeTimeout(1))));
        assert!(started.elapsed() < Duration::from_secs(30), "timeout must not busy-wait");

        // the announcement itself must have gone out before the timeout
        let announced = client_rx.receive().await.unwrap();
        assert_eq!(announced.step, Step::HostSendPubKey);
        assert!(announced.key.e > 0);
    }

    #[tokio::test]
    async fn test_client_rejects_invalid_public_key_with_shutdown() {
        let ((mut host_tx, mut host_rx), (client_tx, client_rx)) = channel::pair();

        let runtime = IntersectionRuntime::new(
            options(Role::Client, Duration::from_secs(1)),
            RsaBlindEngine::new(HashKind::Sha256, HashKind::Md5),
            client_tx,
            MemoryKv::new(),
            MemoryGraph::new(1),
            empty_schema(),
        );
        let client = tokio::spawn(runtime.run(client_rx));

        host_tx
            .send(&Message::public_key("hs1".to_owned(), Vec::new(), 0))
            .await
            .unwrap();
        let reply = time::timeout(Duration::from_secs(5), host_rx.receive())
            .await
            .expect("client reply")
            .unwrap();
        assert_eq!(reply.step, Step::Shutdown);
        assert_eq!(reply.session_key, "hs1");

        // the invalid key was never installed: a valid announcement still
        // completes the exchange
        host_tx
            .send(&Message::public_key("hs2".to_owned(), vec![7], 3))
            .await
            .unwrap();
        let ack = time::timeout(Duration::from_secs(5), host_rx.receive())
            .await
            .expect("client ack")
            .unwrap();
        assert_eq!(ack.step, Step::ClientRcvPubKey);
        assert_eq!(ack.session_key, "hs2");

        client.abort();
    }

    #[tokio::test]
    async fn test_client_exits_on_shutdown_sentinel() {
        let ((mut host_tx, _host_rx), (client_tx, client_rx)) = channel::pair();
        let runtime = IntersectionRuntime::new(
            options(Role::Client, Duration::from_secs(1)),
            RsaBlindEngine::new(HashKind::Sha256, HashKind::Md5),
            client_tx,
            MemoryKv::new(),
            MemoryGraph::new(1),
            empty_schema(),
        );
        let client = tokio::spawn(runtime.run(client_rx));

        host_tx
            .send(&Message::ack(Step::Shutdown, "fatal".to_owned()))
            .await
            .unwrap();
        let result = time::timeout(Duration::from_secs(5), client)
            .await
            .expect("client exits")
            .expect("join");
        assert!(matches!(result, Err(Error::ShutdownReceived)));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("host".parse::<Role>().unwrap(), Role::Host);
        assert_eq!("client".parse::<Role>().unwrap(), Role::Client);
        assert!(matches!(
            "server".parse::<Role>(),
            Err(Error::UnsupportedRole(_))
        ));
    }
}
