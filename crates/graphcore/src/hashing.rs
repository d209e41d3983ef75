//! Canonical JSON and content hashing.
//!
//! Every fingerprint and artifact hash goes through `to_canonical_json`
//! (object keys sorted recursively, no whitespace) and blake3, so identical
//! values hash identically across processes regardless of map order.

use blake3::Hasher;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

/// Hash recorded for a path that does not exist.
pub const ABSENT_PATH_HASH: &str = "absent";

pub fn to_canonical_json(value: &Json) -> String {
    match value {
        Json::Null => "null".to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => Json::String(s.clone()).to_string(),
        Json::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Json::Object(map) => {
            let tree: BTreeMap<&String, String> = map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = tree
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Json::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Hashes a string and returns lowercase hex.
pub fn hash_str(input: &str) -> String {
    hash_bytes(input.as_bytes())
}

pub fn hash_bytes(input: &[u8]) -> String {
    let mut h = Hasher::new();
    h.update(input);
    h.finalize().to_hex().to_string()
}

/// Serializes `value`, canonicalizes it and hashes the result.
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    Ok(hash_str(&to_canonical_json(&json)))
}

/// Content hash of a file or directory tree.
///
/// Directories hash their entries in sorted order together with the
/// relative entry names, so renames are detected too.
pub fn hash_path(path: &Path) -> io::Result<String> {
    if !path.exists() {
        return Ok(ABSENT_PATH_HASH.to_string());
    }
    let mut hasher = Hasher::new();
    feed_path(&mut hasher, path, Path::new(""))?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn feed_path(hasher: &mut Hasher, path: &Path, relative: &Path) -> io::Result<()> {
    if path.is_dir() {
        hasher.update(b"dir:");
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<_>>()?;
        entries.sort();
        for name in entries {
            feed_path(hasher, &path.join(&name), &relative.join(&name))?;
        }
    } else {
        hasher.update(b"file:");
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        let mut file = File::open(path)?;
        io::copy(&mut file, hasher)?;
    }
    Ok(())
}
