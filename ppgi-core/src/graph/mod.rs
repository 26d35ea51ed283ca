//! Graph database seam: identifier harvesting, neighbourhood expansion and
//! idempotent subgraph upserts.
//!
//! The deployment target is a nebula-style property graph; that driver lives
//! behind [`GraphGateway`]. [`memory::MemoryGraph`] is the in-process
//! implementation used by tests and the `memory` configuration type.

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;
pub mod schema;

pub use schema::{EdgeSchema, GraphSchema, NodeSchema};

/// One vertex as it travels inside a subgraph bundle. Properties are
/// `[name, type, value]` string triples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexData {
    /// Vertex id.
    pub vid: String,
    /// Vertex tag.
    pub tag: String,
    /// Property triples.
    #[serde(default)]
    pub props: Vec<[String; 3]>,
}

/// One edge as it travels inside a subgraph bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    /// Source vertex id.
    pub source: String,
    /// Destination vertex id.
    pub destination: String,
    /// Edge type name.
    #[serde(rename = "type")]
    pub edge_type: String,
    /// Property triples.
    #[serde(default)]
    pub props: Vec<[String; 3]>,
}

/// Reads the value of property `name` from a triple list.
#[must_use]
pub fn prop_value<'a>(props: &'a [[String; 3]], name: &str) -> Option<&'a str> {
    props
        .iter()
        .find(|triple| triple[0] == name)
        .map(|triple| triple[2].as_str())
}

/// Property-graph capability set the runtime needs.
///
/// Query failures surface [`crate::Error::Graph`] and are transient for the
/// runtime; rows that fail to decode are logged and skipped by
/// implementations.
pub trait GraphGateway: Send {
    /// Identifiers of `node`-typed vertices whose `time_prop` falls in
    /// `(start, end]`, or in `(-inf, end]` when `start` is `None`. Sorted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Graph`] when the query fails.
    fn lookup_ids(&self, node: &NodeSchema, start: Option<i64>, end: i64) -> Result<Vec<String>>;

    /// Vertices within the configured hop radius of the seed ids, the seeds
    /// included, over all edge types and both directions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Graph`] when the query fails.
    fn neighbor_vertices(&self, ids: &[String]) -> Result<Vec<VertexData>>;

    /// Edges with both endpoints inside the same neighbourhood.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Graph`] when the query fails.
    fn neighbor_edges(&self, ids: &[String]) -> Result<Vec<EdgeData>>;

    /// Bulk vertex upsert keyed by vertex id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Graph`] when the write fails.
    fn insert_vertices(&self, vertices: &[VertexData]) -> Result<()>;

    /// Bulk edge upsert keyed by `(source, destination, type)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Graph`] when the write fails.
    fn insert_edges(&self, edges: &[EdgeData]) -> Result<()>;
}
