//! YAML configuration, loaded once at startup.

use std::path::{Path, PathBuf};

use eyre::WrapErr;
use ppgi_core::hash::HashKind;
use ppgi_core::runtime::Role;
use serde::Deserialize;

fn default_conn_timeout() -> u64 {
    30
}

fn default_key_bits() -> usize {
    ppgi_core::blind::DEFAULT_KEY_BITS
}

fn default_neighbor_steps() -> Vec<usize> {
    vec![1]
}

fn default_algorithm() -> String {
    "rsa".to_owned()
}

/// Top-level configuration file.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Which side of the protocol this process runs.
    pub role: Role,
    /// Optional log file, tee'd with stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Host-side handshake timeout in seconds.
    #[serde(default = "default_conn_timeout")]
    pub conn_timeout: u64,
    /// KV store connection.
    pub kv: KvConfig,
    /// Message channel connection.
    pub mq: MqConfig,
    /// Graph database connection and harvest policy.
    pub graph: GraphConfig,
    /// Intersection algorithm selection.
    pub algorithm: AlgorithmConfig,
}

/// KV store connection. `redis` is the deployment target; this build wires
/// the `memory` store.
#[derive(Debug, Deserialize)]
pub struct KvConfig {
    /// Store type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Connection URL; unused by the `memory` store.
    #[serde(default)]
    pub url: String,
    /// Credential; unused by the `memory` store.
    #[serde(default)]
    pub password: String,
    /// Database index; unused by the `memory` store.
    #[serde(default)]
    pub db: i64,
}

/// Message channel connection. `pulsar` is the broker deployment target;
/// this build wires the direct `tcp` transport.
#[derive(Debug, Deserialize)]
pub struct MqConfig {
    /// Transport type.
    #[serde(rename = "type")]
    pub kind: String,
    /// For `tcp`: the host binds this address, the client dials it.
    pub url: String,
    /// Broker subscription topic; reserved for `pulsar`.
    #[serde(default)]
    pub in_topic: Option<String>,
    /// Broker publish topic; reserved for `pulsar`.
    #[serde(default)]
    pub out_topic: Option<String>,
    /// JSON framing schema file; reserved for `pulsar`.
    #[serde(default)]
    pub schema: Option<PathBuf>,
}

/// Graph database connection and harvest policy.
#[derive(Debug, Deserialize)]
pub struct GraphConfig {
    /// Graph database address; empty selects the in-memory store.
    #[serde(default)]
    pub address: String,
    /// Graph database port.
    #[serde(default)]
    pub port: u16,
    /// Credential for the graph database.
    #[serde(default)]
    pub username: String,
    /// Credential for the graph database.
    #[serde(default)]
    pub password: String,
    /// Graph (space) name.
    #[serde(default)]
    pub graph_name: String,
    /// Hop counts for neighbourhood expansion; the maximum is used.
    #[serde(default = "default_neighbor_steps")]
    pub neighbor_steps: Vec<usize>,
    /// Harvest period in seconds.
    pub fetch_interval: u64,
    /// Path to the graph-definition YAML.
    pub graph_definition: PathBuf,
    /// Optional JSON fixture seeding the in-memory store.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

/// Intersection algorithm selection.
#[derive(Debug, Deserialize)]
pub struct AlgorithmConfig {
    /// Algorithm type; only `rsa` is spoken.
    #[serde(rename = "type", default = "default_algorithm")]
    pub kind: String,
    /// RSA modulus size in bits.
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
    /// Hash applied to identifiers before blinding/signing.
    pub first_hash: HashKind,
    /// Hash applied after signing/unblinding.
    pub second_hash: HashKind,
}

impl Config {
    /// Parses a configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error describing the malformed field.
    pub fn from_yaml_str(text: &str) -> eyre::Result<Self> {
        serde_yaml::from_str(text).wrap_err("malformed configuration")
    }

    /// Loads the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is unreadable or malformed.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading configuration {}", path.display()))?;
        Self::from_yaml_str(&text)
            .wrap_err_with(|| format!("loading configuration {}", path.display()))
    }

    /// The configured hop radius for neighbourhood expansion.
    #[must_use]
    pub fn neighbor_hops(&self) -> usize {
        self.graph.neighbor_steps.iter().copied().max().unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r"
role: host
log_file: /var/log/ppgi.log
conn_timeout: 15
kv:
  type: memory
mq:
  type: tcp
  url: 0.0.0.0:7171
graph:
  neighbor_steps: [1, 2]
  fetch_interval: 60
  graph_definition: demos/graph_definition.yaml
  data_file: demos/host_graph.json
algorithm:
  type: rsa
  key_bits: 2048
  first_hash: sha256
  second_hash: md5
";

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml_str(FULL).unwrap();
        assert_eq!(config.role, Role::Host);
        assert_eq!(config.conn_timeout, 15);
        assert_eq!(config.kv.kind, "memory");
        assert_eq!(config.mq.kind, "tcp");
        assert_eq!(config.mq.url, "0.0.0.0:7171");
        assert_eq!(config.neighbor_hops(), 2);
        assert_eq!(config.graph.fetch_interval, 60);
        assert_eq!(config.algorithm.key_bits, 2048);
        assert_eq!(config.algorithm.first_hash, HashKind::Sha256);
        assert_eq!(config.algorithm.second_hash, HashKind::Md5);
    }

    #[test]
    fn test_defaults() {
        let minimal = r"
role: client
kv:
  type: memory
mq:
  type: tcp
  url: 127.0.0.1:7171
graph:
  fetch_interval: 60
  graph_definition: graph.yaml
algorithm:
  first_hash: md5
  second_hash: md5
";
        let config = Config::from_yaml_str(minimal).unwrap();
        assert_eq!(config.conn_timeout, 30);
        assert_eq!(config.algorithm.kind, "rsa");
        assert_eq!(config.algorithm.key_bits, 4096);
        assert_eq!(config.neighbor_hops(), 1);
        assert!(config.log_file.is_none());
        assert!(config.graph.data_file.is_none());
    }

    #[test]
    fn test_invalid_role_is_rejected() {
        let bad = FULL.replace("role: host", "role: observer");
        assert!(Config::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn test_invalid_hash_is_rejected() {
        let bad = FULL.replace("second_hash: md5", "second_hash: crc32");
        assert!(Config::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.role, Role::Host);

        assert!(Config::load(Path::new("/nonexistent/ppgi.yaml")).is_err());
    }
}
