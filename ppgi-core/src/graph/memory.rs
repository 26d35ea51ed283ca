//! In-memory property graph, optionally seeded from a JSON fixture file.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

use super::{prop_value, EdgeData, GraphGateway, NodeSchema, VertexData};

/// On-disk seed format for [`MemoryGraph::load_file`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GraphFixture {
    /// Initial vertices.
    #[serde(default)]
    pub vertices: Vec<VertexData>,
    /// Initial edges.
    #[serde(default)]
    pub edges: Vec<EdgeData>,
}

#[derive(Debug, Default)]
struct MemoryGraphInner {
    vertices: HashMap<String, VertexData>,
    edges: HashMap<(String, String, String), EdgeData>,
}

/// In-process [`GraphGateway`]. Clones share state, mirroring separate
/// sessions against one database.
#[derive(Debug, Clone)]
pub struct MemoryGraph {
    inner: Arc<Mutex<MemoryGraphInner>>,
    steps: usize,
}

impl MemoryGraph {
    /// Creates an empty graph expanding neighbourhoods to `steps` hops.
    #[must_use]
    pub fn new(steps: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryGraphInner::default())),
            steps: steps.max(1),
        }
    }

    /// Seeds the graph from a JSON fixture file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Graph`] when the file is unreadable or malformed.
    pub fn load_file(&self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Graph(format!("{}: {e}", path.display())))?;
        let fixture: GraphFixture = serde_json::from_str(&text)
            .map_err(|e| Error::Graph(format!("{}: {e}", path.display())))?;
        self.insert_vertices(&fixture.vertices)?;
        self.insert_edges(&fixture.edges)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryGraphInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Graph("memory graph lock poisoned".into()))
    }

    /// Vertex ids reachable from the seeds within the hop radius, seeds
    /// included.
    fn expand(inner: &MemoryGraphInner, ids: &[String], steps: usize) -> HashSet<String> {
        let mut visited: HashSet<String> = ids.iter().cloned().collect();
        let mut frontier = visited.clone();
        for _ in 0..steps {
            let mut next = HashSet::new();
            for (source, destination, _) in inner.edges.keys() {
                if frontier.contains(source) && !visited.contains(destination) {
                    next.insert(destination.clone());
                }
                if frontier.contains(destination) && !visited.contains(source) {
                    next.insert(source.clone());
                }
            }
            if next.is_empty() {
                break;
            }
            visited.extend(next.iter().cloned());
            frontier = next;
        }
        visited
    }
}

impl GraphGateway for MemoryGraph {
    fn lookup_ids(&self, node: &NodeSchema, start: Option<i64>, end: i64) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let mut ids = Vec::new();
        for vertex in inner.vertices.values() {
            if vertex.tag != node.name {
                continue;
            }
            let Some(raw) = prop_value(&vertex.props, &node.time_prop) else {
                warn!(vid = %vertex.vid, time_prop = %node.time_prop, "vertex lacks time property, skipping");
                continue;
            };
            let Ok(timestamp) = raw.parse::<i64>() else {
                warn!(vid = %vertex.vid, value = raw, "unparsable time property, skipping");
                continue;
            };
            // Windows are (start, end] so that consecutive harvests tile.
            if timestamp > end || start.is_some_and(|s| timestamp <= s) {
                continue;
            }
            if node.data_prop.is_empty() {
                ids.push(vertex.vid.clone());
            } else if let Some(value) = prop_value(&vertex.props, &node.data_prop) {
                ids.push(value.to_owned());
            } else {
                warn!(vid = %vertex.vid, data_prop = %node.data_prop, "vertex lacks data property, skipping");
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn neighbor_vertices(&self, ids: &[String]) -> Result<Vec<VertexData>> {
        let inner = self.lock()?;
        let reachable = Self::expand(&inner, ids, self.steps);
        let mut vertices: Vec<VertexData> = reachable
            .iter()
            .filter_map(|vid| inner.vertices.get(vid).cloned())
            .collect();
        vertices.sort_unstable_by(|a, b| a.vid.cmp(&b.vid));
        Ok(vertices)
    }

    fn neighbor_edges(&self, ids: &[String]) -> Result<Vec<EdgeData>> {
        let inner = self.lock()?;
        let reachable = Self::expand(&inner, ids, self.steps);
        let mut edges: Vec<EdgeData> = inner
            .edges
            .values()
            .filter(|edge| {
                reachable.contains(&edge.source) && reachable.contains(&edge.destination)
            })
            .cloned()
            .collect();
        edges.sort_unstable_by(|a, b| {
            (&a.source, &a.destination, &a.edge_type)
                .cmp(&(&b.source, &b.destination, &b.edge_type))
        });
        Ok(edges)
    }

    fn insert_vertices(&self, vertices: &[VertexData]) -> Result<()> {
        let mut inner = self.lock()?;
        for vertex in vertices {
            inner.vertices.insert(vertex.vid.clone(), vertex.clone());
        }
        Ok(())
    }

    fn insert_edges(&self, edges: &[EdgeData]) -> Result<()> {
        let mut inner = self.lock()?;
        for edge in edges {
            inner.edges.insert(
                (
                    edge.source.clone(),
                    edge.destination.clone(),
                    edge.edge_type.clone(),
                ),
                edge.clone(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(vid: &str, tag: &str, props: &[(&str, &str, &str)]) -> VertexData {
        VertexData {
            vid: vid.to_owned(),
            tag: tag.to_owned(),
            props: props
                .iter()
                .map(|(n, t, v)| [(*n).to_owned(), (*t).to_owned(), (*v).to_owned()])
                .collect(),
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

    fn person_node(data_prop: &str) -> NodeSchema {
        NodeSchema {
            name: "person".to_owned(),
            related_edges: vec!["knows".to_owned()],
            props: vec!["card".to_owned(), "register_time".to_owned()],
            time_prop: "register_time".to_owned(),
            data_prop: data_prop.to_owned(),
        }
    }

    fn sample_graph() -> MemoryGraph {
        let graph = MemoryGraph::new(1);
        graph
            .insert_vertices(&[
                vertex("p1", "person", &[("card", "string", "111"), ("register_time", "int", "100")]),
                vertex("p2", "person", &[("card", "string", "222"), ("register_time", "int", "200")]),
                vertex("p3", "person", &[("card", "string", "333"), ("register_time", "int", "300")]),
                vertex("e1", "email", &[("addr", "string", "a@b")]),
            ])
            .unwrap();
        graph
            .insert_edges(&[edge("p1", "p2", "knows"), edge("p2", "e1", "owns")])
            .unwrap();
        graph
    }

    #[test]
    fn test_lookup_window_semantics() {
        let graph = sample_graph();
        let node = person_node("");

        // unbounded start: everything at or before end
        assert_eq!(
            graph.lookup_ids(&node, None, 250).unwrap(),
            vec!["p1".to_owned(), "p2".to_owned()]
        );
        // (start, end] excludes the start boundary, includes the end
        assert_eq!(
            graph.lookup_ids(&node, Some(100), 300).unwrap(),
            vec!["p2".to_owned(), "p3".to_owned()]
        );
        assert_eq!(graph.lookup_ids(&node, Some(300), 400).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_lookup_via_data_prop() {
        let graph = sample_graph();
        assert_eq!(
            graph.lookup_ids(&person_node("card"), None, 1_000).unwrap(),
            vec!["111".to_owned(), "222".to_owned(), "333".to_owned()]
        );
    }

    #[test]
    fn test_neighbor_expansion_by_hops() {
        let graph = sample_graph();
        let seeds = vec!["p1".to_owned()];

        let one_hop: Vec<String> = graph
            .neighbor_vertices(&seeds)
            .unwrap()
            .into_iter()
            .map(|v| v.vid)
            .collect();
        assert_eq!(one_hop, vec!["p1".to_owned(), "p2".to_owned()]);

        let two_hop_graph = MemoryGraph::new(2);
        let source = sample_graph();
        two_hop_graph
            .insert_vertices(&source.neighbor_vertices(&["p1".into(), "p2".into(), "p3".into(), "e1".into()]).unwrap())
            .unwrap();
        two_hop_graph
            .insert_edges(&[edge("p1", "p2", "knows"), edge("p2", "e1", "owns")])
            .unwrap();
        let two_hop: Vec<String> = two_hop_graph
            .neighbor_vertices(&seeds)
            .unwrap()
            .into_iter()
            .map(|v| v.vid)
            .collect();
        assert_eq!(two_hop, vec!["e1".to_owned(), "p1".to_owned(), "p2".to_owned()]);

        let edges = two_hop_graph.neighbor_edges(&seeds).unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let graph = sample_graph();
        let vertices = graph
            .neighbor_vertices(&["p1".into(), "p2".into(), "p3".into(), "e1".into()])
            .unwrap();
        let edges = graph.neighbor_edges(&["p1".into(), "p2".into(), "p3".into(), "e1".into()]).unwrap();

        let replica = MemoryGraph::new(1);
        replica.insert_vertices(&vertices).unwrap();
        replica.insert_edges(&edges).unwrap();
        replica.insert_vertices(&vertices).unwrap();
        replica.insert_edges(&edges).unwrap();

        let all: Vec<String> = ["e1", "p1", "p2", "p3"].iter().map(|s| (*s).to_owned()).collect();
        assert_eq!(replica.neighbor_vertices(&all).unwrap(), vertices);
        assert_eq!(replica.neighbor_edges(&all).unwrap(), edges);
    }
}
