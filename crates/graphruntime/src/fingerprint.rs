//! Fingerprint computation and the fingerprint store.
//!
//! A fingerprint hashes everything that determines a node's outputs: the
//! engine version, the definition identity, parameter values, the
//! fingerprints of upstream nodes, the wiring, the content of external input
//! files and the locations of output files. It is computed bottom-up, when a
//! node is dispatched, from already-final upstream fingerprints.

use crate::graph::NodeInstance;
use crate::layout::{remove_file_if_exists, write_json, StateLayout};
use chrono::{DateTime, Utc};
use graphcore::hashing::{hash_path, hash_value};
use graphcore::{CacheError, NodeId, Role, Value, ENGINE_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;

#[derive(Debug, Serialize)]
struct FingerprintInput<'a> {
    engine_version: &'a str,
    definition: &'a str,
    params: &'a BTreeMap<String, Value>,
    upstream: Vec<&'a str>,
    bindings: BTreeMap<&'a str, Vec<String>>,
    input_paths: BTreeMap<&'a str, String>,
    output_paths: BTreeMap<&'a str, String>,
}

/// Computes the fingerprint of `instance` given its upstream fingerprints.
///
/// `DepsPath` and `ParamsPath` files are hashed by content, including a
/// `DepsPath` bound to an upstream `OutsPath`: that file exists by the time
/// the node is dispatched, and only its presence is tracked upstream.
pub fn compute(instance: &NodeInstance, upstream: &[&str]) -> io::Result<String> {
    let mut upstream = upstream.to_vec();
    upstream.sort_unstable();
    upstream.dedup();

    let bindings = instance
        .bindings
        .iter()
        .map(|(attr, binding)| (attr.as_str(), binding.refs().iter().map(|r| r.to_string()).collect()))
        .collect();

    let mut input_paths = BTreeMap::new();
    let mut output_paths = BTreeMap::new();
    for attr in instance.definition.attributes() {
        let Some(path) = instance.paths.get(&attr.name) else {
            continue;
        };
        match attr.role {
            Role::OutsPath => {
                output_paths.insert(attr.name.as_str(), path.display().to_string());
            }
            Role::DepsPath | Role::ParamsPath => {
                input_paths.insert(attr.name.as_str(), hash_path(path)?);
            }
            _ => {}
        }
    }

    let input = FingerprintInput {
        engine_version: ENGINE_VERSION,
        definition: instance.definition.identity(),
        params: &instance.params,
        upstream,
        bindings,
        input_paths,
        output_paths,
    };
    Ok(hash_value(&input)?)
}

/// Persisted after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub node_id: NodeId,
    pub fingerprint: String,
    pub engine_version: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FingerprintStore {
    layout: StateLayout,
}

impl FingerprintStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// Last recorded fingerprint, `None` if the node never succeeded.
    pub fn load(&self, id: &NodeId) -> Result<Option<FingerprintRecord>, CacheError> {
        let path = self.layout.fingerprint_file(id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corruption(id, format!("cannot read {}: {}", path.display(), e))),
        };
        let record: FingerprintRecord = serde_json::from_slice(&bytes)
            .map_err(|e| corruption(id, format!("unreadable fingerprint record: {}", e)))?;
        if &record.node_id != id {
            return Err(corruption(
                id,
                format!("fingerprint record belongs to '{}'", record.node_id),
            ));
        }
        Ok(Some(record))
    }

    /// Records parameters and fingerprint of a successful run. The
    /// fingerprint is written last; its presence marks the run complete.
    pub fn persist(&self, id: &NodeId, fingerprint: &str, params: &BTreeMap<String, Value>) -> io::Result<()> {
        write_json(&self.layout.params_file(id), params)?;
        let record = FingerprintRecord {
            node_id: id.clone(),
            fingerprint: fingerprint.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            recorded_at: Utc::now(),
        };
        write_json(&self.layout.fingerprint_file(id), &record)
    }

    pub fn invalidate(&self, id: &NodeId) -> io::Result<()> {
        remove_file_if_exists(&self.layout.fingerprint_file(id))
    }
}

fn corruption(id: &NodeId, detail: String) -> CacheError {
    CacheError::CacheCorruption {
        node_id: id.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_record_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::new(StateLayout::new(dir.path()));
        let id = NodeId::from("Train");

        assert!(store.load(&id).unwrap().is_none());

        let params = BTreeMap::from([("n_est".to_string(), Value::Int(50))]);
        store.persist(&id, "abc", &params).unwrap();
        let record = store.load(&id).unwrap().unwrap();
        assert_eq!(record.fingerprint, "abc");
        assert_eq!(record.engine_version, ENGINE_VERSION);

        let audit: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(".graph/nodes/Train/params.json")).unwrap())
                .unwrap();
        assert_eq!(audit["n_est"]["value"], 50);

        store.invalidate(&id).unwrap();
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn garbage_record_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let id = NodeId::from("Train");
        std::fs::create_dir_all(layout.node_state_dir(&id)).unwrap();
        std::fs::write(layout.fingerprint_file(&id), "{not json").unwrap();

        let err = FingerprintStore::new(layout).load(&id).unwrap_err();
        assert!(matches!(err, CacheError::CacheCorruption { node_id, .. } if node_id.as_str() == "Train"));
    }

    #[test]
    fn record_of_another_node_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let store = FingerprintStore::new(layout.clone());
        store.persist(&NodeId::from("A"), "abc", &BTreeMap::new()).unwrap();

        let b = NodeId::from("B");
        std::fs::create_dir_all(layout.node_state_dir(&b)).unwrap();
        std::fs::copy(layout.fingerprint_file(&NodeId::from("A")), layout.fingerprint_file(&b)).unwrap();
        assert!(store.load(&b).is_err());
    }
}
