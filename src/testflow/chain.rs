use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// What later nodes can see of an executed request:
/// `{response: {body, headers}, request: {headers, body, parameters}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSnapshot(Value);

impl ChainSnapshot {
    pub fn new(
        response_body: Value,
        response_headers: Value,
        request_headers: Value,
        request_body: Value,
        request_parameters: Value,
    ) -> Self {
        Self(json!({
            "response": {
                "body": response_body,
                "headers": response_headers,
            },
            "request": {
                "headers": request_headers,
                "body": request_body,
                "parameters": request_parameters,
            },
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Run-scoped map from `$$<sanitized name>` to the snapshot of that request.
///
/// A node is reachable under two keys (its request name and its block name);
/// both entries share one `Arc`, so they always resolve to the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChainNamespace {
    entries: BTreeMap<String, Arc<ChainSnapshot>>,
}

impl ChainNamespace {
    /// Store `snapshot` under the sanitized request name and block name.
    /// A later node with the same name replaces the earlier entry.
    pub fn insert(&mut self, request_name: &str, block_name: &str, snapshot: ChainSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.entries.insert(chain_key(request_name), Arc::clone(&snapshot));
        self.entries.insert(chain_key(block_name), snapshot);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<ChainSnapshot>> {
        self.entries.get(key)
    }

    /// Root binding for an identifier inside an expression.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|snapshot| snapshot.as_value())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ChainNamespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(key, snapshot)| (key, snapshot.as_value())))
    }
}

/// `$$` followed by `name` with every character outside `[A-Za-z0-9_]` replaced by `_`.
pub fn chain_key(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("$${sanitized}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: i64) -> ChainSnapshot {
        ChainSnapshot::new(json!({"id": id}), json!({}), json!({}), json!({}), json!({}))
    }

    #[test]
    fn test_chain_key_sanitizes() {
        assert_eq!(chain_key("Get User"), "$$Get_User");
        assert_eq!(chain_key("a-b.c/d_1"), "$$a_b_c_d_1");
        assert_eq!(chain_key("héllo"), "$$h_llo");
        assert_eq!(chain_key(""), "$$");
    }

    #[test]
    fn test_both_aliases_share_one_snapshot() {
        let mut ns = ChainNamespace::default();
        ns.insert("Get User", "n2", snapshot(1));

        let by_name = ns.get("$$Get_User").unwrap();
        let by_block = ns.get("$$n2").unwrap();
        assert!(Arc::ptr_eq(by_name, by_block));
        assert_eq!(ns.len(), 2);
    }

    #[test]
    fn test_same_name_for_both_keys_is_one_entry() {
        let mut ns = ChainNamespace::default();
        ns.insert("req", "req", snapshot(1));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_later_node_replaces_entry() {
        let mut ns = ChainNamespace::default();
        ns.insert("Req", "1", snapshot(1));
        ns.insert("Req", "2", snapshot(2));

        assert_eq!(ns.lookup("$$Req").unwrap()["response"]["body"]["id"], 2);
        assert_eq!(ns.lookup("$$1").unwrap()["response"]["body"]["id"], 1);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut ns = ChainNamespace::default();
        ns.insert("A", "1", snapshot(5));

        let value = serde_json::to_value(&ns).unwrap();
        assert_eq!(value["$$A"], value["$$1"]);
        assert_eq!(value["$$A"]["response"]["body"]["id"], 5);
        assert_eq!(value["$$A"]["request"]["parameters"], json!({}));
    }
}
