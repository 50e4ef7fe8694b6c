//! odk-config
//!
//! Layered YAML configuration for the OrderDesk daemon.
//!
//! - YAML documents are merged in order (later documents override earlier
//!   ones), converted to JSON, canonicalised and hashed.
//! - Literal secrets are refused at load time. YAML carries env var NAMES
//!   only; [`secrets::resolve_secrets`] reads the values once at startup.
//! - [`ServiceSettings::from_config_json`] extracts the typed settings the
//!   daemon consumes, falling back to documented defaults.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

pub mod secrets;
mod settings;

pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use settings::{ServiceSettings, CONSUMED_POINTERS};

/// Prefixes of values that must never appear as YAML literals.
const SECRET_PREFIXES: &[&str] = &[
    "sk_live", // Stripe live secret key
    "sk_test", // Stripe test secret key
    "rk_live", // Stripe restricted key
    "whsec_",  // Stripe webhook signing secret
    "AKIA",    // AWS access key ID
    "-----BEGIN",
    "ghp_",
    "xoxb-",
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses as null; treat it as an empty layer.
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Leaf pointers present in `config_json` that no consumer reads.
///
/// The daemon logs these as warnings at boot; a typo in a key name otherwise
/// silently falls back to a default.
pub fn unused_leaf_pointers(config_json: &Value) -> Vec<String> {
    let consumed: BTreeSet<&str> = CONSUMED_POINTERS.iter().copied().collect();

    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !consumed.iter().any(|prefix| is_prefix_pointer(prefix, leaf)))
        .collect();
    unused.sort();
    unused.dedup();
    unused
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

/// "/a/b" consumes "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_override_earlier_ones() {
        let loaded = load_layered_yaml_from_strings(&[
            "uploads:\n  max_per_order: 10\nserver:\n  bind_addr: \"127.0.0.1:8080\"\n",
            "uploads:\n  max_per_order: 3\n",
        ])
        .unwrap();

        assert_eq!(loaded.config_json["uploads"]["max_per_order"], 3);
        assert_eq!(loaded.config_json["server"]["bind_addr"], "127.0.0.1:8080");
    }

    #[test]
    fn config_hash_is_stable_for_identical_input() {
        let a = load_layered_yaml_from_strings(&["payment:\n  currency: eur\n"]).unwrap();
        let b = load_layered_yaml_from_strings(&["payment:\n  currency: eur\n"]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
        assert_eq!(a.config_hash.len(), 64);
    }

    #[test]
    fn literal_webhook_secret_is_refused() {
        let err = load_layered_yaml_from_strings(&[
            "secrets_env:\n  webhook_secret: \"whsec_abcdefghijklmnop\"\n",
        ])
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CONFIG_SECRET_DETECTED"));
        assert!(!msg.contains("abcdefghijklmnop"), "value must be redacted");
    }

    #[test]
    fn unknown_keys_are_reported() {
        let loaded = load_layered_yaml_from_strings(&[
            "uploads:\n  max_per_order: 5\n  max_per_ordr: 6\n",
        ])
        .unwrap();
        assert_eq!(
            unused_leaf_pointers(&loaded.config_json),
            vec!["/uploads/max_per_ordr".to_string()]
        );
    }
}
