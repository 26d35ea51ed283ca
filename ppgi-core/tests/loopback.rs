//! Full host/client round over in-process transports: key exchange, both
//! harvest/blind/sign/unblind paths, matching through the per-party KV, and
//! subgraph exchange with the matched-endpoints edge filter.

use std::time::Duration;

use chrono::Utc;
use ppgi_core::blind::RsaBlindEngine;
use ppgi_core::graph::memory::MemoryGraph;
use ppgi_core::graph::{EdgeData, GraphGateway, GraphSchema, VertexData};
use ppgi_core::hash::HashKind;
use ppgi_core::kv::MemoryKv;
use ppgi_core::runtime::{IntersectionRuntime, Role, RuntimeOptions};
use ppgi_core::session::SessionStore;
use ppgi_core::transport::channel;

const SCHEMA: &str = r"
nodes:
  - type: person
    related_edges: [knows, owns]
    props: [register_time]
    time_prop: register_time
edges:
  - type: knows
  - type: owns
";

fn person(vid: &str, register_time: i64) -> VertexData {
    VertexData {
        vid: vid.to_owned(),
        tag: "person".to_owned(),
        props: vec![[
            "register_time".to_owned(),
            "int".to_owned(),
            register_time.to_string(),
        ]],
    }
}

fn email(vid: &str, addr: &str) -> VertexData {
    VertexData {
        vid: vid.to_owned(),
        tag: "email".to_owned(),
        props: vec![["addr".to_owned(), "string".to_owned(), addr.to_owned()]],
    }
}

fn edge(source: &str, destination: &str, edge_type: &str) -> EdgeData {
    EdgeData {
        source: source.to_owned(),
        destination: destination.to_owned(),
        edge_type: edge_type.to_owned(),
        props: Vec::new(),
    }
}

/// The host ticks faster than the client so its digest map is guaranteed to
/// exist before the first `ClientUnblind` arrives.
fn options(role: Role) -> RuntimeOptions {
    RuntimeOptions {
        role,
        fetch_interval: match role {
            Role::Host => Duration::from_millis(300),
            Role::Client => Duration::from_millis(700),
        },
        conn_timeout: Duration::from_secs(10),
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn has_vertex(graph: &MemoryGraph, vid: &str) -> bool {
    graph
        .neighbor_vertices(&[vid.to_owned()])
        .unwrap()
        .iter()
        .any(|v| v.vid == vid)
}

#[tokio::test]
async fn test_host_client_loopback_round() {
    let _ = tracing_subscriber::fmt::try_init();
    let schema = GraphSchema::from_yaml_str(SCHEMA).unwrap();

    // Host holds {2102, 6401, 1732, 0184}; client holds {6401, 1732, 3728,
    // 5005}. Round one intersects on {6401, 1732} (matched on the host,
    // which sees the client digests). A second harvest later adds 5005 on
    // the host, which the client then matches from the fresh digest batch.
    let host_graph = MemoryGraph::new(1);
    host_graph
        .insert_vertices(&[
            person("2102", 100),
            person("6401", 200),
            person("1732", 300),
            person("0184", 400),
            email("mail-host-1", "a@host.example"),
        ])
        .unwrap();
    host_graph
        .insert_edges(&[
            edge("6401", "1732", "knows"),
            edge("6401", "2102", "knows"),
            edge("6401", "mail-host-1", "owns"),
        ])
        .unwrap();

    let client_graph = MemoryGraph::new(1);
    client_graph
        .insert_vertices(&[
            person("6401", 210),
            person("1732", 310),
            person("3728", 410),
            person("5005", 510),
            email("mail-client-1", "b@client.example"),
        ])
        .unwrap();
    client_graph
        .insert_edges(&[
            edge("5005", "3728", "knows"),
            edge("5005", "mail-client-1", "owns"),
        ])
        .unwrap();

    let host_kv = MemoryKv::new();
    let client_kv = MemoryKv::new();

    let mut host_engine = RsaBlindEngine::new(HashKind::Sha256, HashKind::Md5);
    host_engine.generate_keypair(1024).expect("keygen");
    let client_engine = RsaBlindEngine::new(HashKind::Sha256, HashKind::Md5);

    let (host_end, client_end) = channel::pair();
    let (host_tx, host_rx) = host_end;
    let (client_tx, client_rx) = client_end;

    let host = IntersectionRuntime::new(
        options(Role::Host),
        host_engine,
        host_tx,
        host_kv.clone(),
        host_graph.clone(),
        schema.clone(),
    );
    let client = IntersectionRuntime::new(
        options(Role::Client),
        client_engine,
        client_tx,
        client_kv.clone(),
        client_graph.clone(),
        schema,
    );

    let host_task = tokio::spawn(host.run(host_rx));
    let client_task = tokio::spawn(client.run(client_rx));

    // Round one: the host matches the overlap reported via ClientUnblind.
    let host_sessions = SessionStore::new(host_kv.clone());
    wait_until("host-side match of {6401, 1732}", || {
        host_sessions
            .check_matched(&["6401".to_owned(), "1732".to_owned()])
            .unwrap()
            == vec![true, true]
    })
    .await;

    // The host's bundle reaches the client graph: the shared neighbourhood
    // arrives, the edge between two matched vertices survives, the edge to
    // the unmatched 2102 does not.
    wait_until("host subgraph ingested by client", || {
        has_vertex(&client_graph, "mail-host-1")
            && !client_graph
                .neighbor_edges(&["6401".to_owned()])
                .unwrap()
                .is_empty()
    })
    .await;
    assert!(has_vertex(&client_graph, "2102"));
    let client_edges = client_graph
        .neighbor_edges(&["6401".to_owned(), "2102".to_owned()])
        .unwrap();
    assert_eq!(client_edges.len(), 1);
    assert_eq!(client_edges[0].source, "6401");
    assert_eq!(client_edges[0].destination, "1732");

    // Round two: a fresh host identifier that the client already blinded.
    host_graph
        .insert_vertices(&[person("5005", Utc::now().timestamp() + 1)])
        .unwrap();

    let client_sessions = SessionStore::new(client_kv.clone());
    wait_until("client-side match of 5005", || {
        client_sessions.check_matched(&["5005".to_owned()]).unwrap() == vec![true]
    })
    .await;
    assert_eq!(
        client_sessions
            .check_matched(&["3728".to_owned(), "6401".to_owned()])
            .unwrap(),
        vec![false, false],
        "only digests reported after the local map existed can match"
    );

    // The client's bundle reaches the host graph; every client edge touches
    // the unmatched 3728 or an email vertex, so none may cross.
    wait_until("client subgraph ingested by host", || {
        has_vertex(&host_graph, "mail-client-1")
    })
    .await;
    assert!(has_vertex(&host_graph, "3728"));
    assert!(host_graph
        .neighbor_edges(&["5005".to_owned(), "3728".to_owned()])
        .unwrap()
        .is_empty());

    assert!(!host_task.is_finished(), "host loop must keep running");
    assert!(!client_task.is_finished(), "client loop must keep running");
    host_task.abort();
    client_task.abort();
}
