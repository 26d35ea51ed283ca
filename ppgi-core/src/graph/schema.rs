//! The property-graph definition file.
//!
//! Principle nodes carry the identifiers fed into the PSI: `time_prop` drives
//! incremental harvesting and `data_prop` names the identifier property. An
//! empty `data_prop` means the vertex id itself is the identifier.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One principle node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSchema {
    /// Vertex tag.
    #[serde(rename = "type")]
    pub name: String,
    /// Edge types reachable from this node.
    #[serde(default)]
    pub related_edges: Vec<String>,
    /// Property names carried by this node.
    #[serde(default)]
    pub props: Vec<String>,
    /// Property holding the ingestion timestamp, for incremental harvest.
    pub time_prop: String,
    /// Property holding the PSI identifier; empty means the vertex id itself.
    #[serde(default)]
    pub data_prop: String,
}

/// One edge type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSchema {
    /// Edge type name.
    #[serde(rename = "type")]
    pub name: String,
    /// Property names carried by this edge.
    #[serde(default)]
    pub props: Vec<String>,
    /// Property holding the edge creation timestamp.
    #[serde(default)]
    pub time_prop: String,
}

/// The full graph definition, loaded once at startup and echoed inside every
/// subgraph bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
    /// Principle node types.
    pub nodes: Vec<NodeSchema>,
    /// Edge types.
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
}

impl GraphSchema {
    /// Parses a graph definition from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphDefinition`] on malformed input.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::GraphDefinition(e.to_string()))
    }

    /// Loads and parses a graph-definition file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphDefinition`] when the file is unreadable or
    /// malformed.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::GraphDefinition(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    /// The set of node type names, for schema comparison in logs.
    #[must_use]
    pub fn node_types(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }
}
