//! In-memory registry store
//!
//! 테스트 및 단일 프로세스 실행용. 모든 노드를 xpath 순서의 BTreeMap에 보관한다.

use super::registry::{
    assemble, flatten_children, flatten_node, path, split_leaves, DataNode, FetchDescendants,
    NodeRecord, RegistryStore, ROOT_PATH,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct StoredNode {
    leaves: Map<String, Value>,
    last_modified: Option<DateTime<Utc>>,
}

/// Registry store backed by a process-local map
#[derive(Debug, Default)]
pub struct InMemoryRegistryStore {
    nodes: RwLock<BTreeMap<String, StoredNode>>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn exists(nodes: &BTreeMap<String, StoredNode>, xpath: &str) -> bool {
        xpath == ROOT_PATH || nodes.contains_key(xpath)
    }

    fn record(nodes: &BTreeMap<String, StoredNode>, xpath: &str) -> Option<NodeRecord> {
        if xpath == ROOT_PATH {
            return Some(NodeRecord {
                xpath: ROOT_PATH.to_string(),
                leaves: Map::new(),
                last_modified: None,
            });
        }
        nodes.get(xpath).map(|n| NodeRecord {
            xpath: xpath.to_string(),
            leaves: n.leaves.clone(),
            last_modified: n.last_modified,
        })
    }

    fn descendants(nodes: &BTreeMap<String, StoredNode>, xpath: &str) -> Vec<NodeRecord> {
        nodes
            .iter()
            .filter(|(k, _)| path::is_descendant(xpath, k))
            .map(|(k, n)| NodeRecord {
                xpath: k.clone(),
                leaves: n.leaves.clone(),
                last_modified: n.last_modified,
            })
            .collect()
    }

    fn remove_subtree(nodes: &mut BTreeMap<String, StoredNode>, xpath: &str) {
        nodes.retain(|k, _| k != xpath && !path::is_descendant(xpath, k));
    }

    fn insert_all(nodes: &mut BTreeMap<String, StoredNode>, records: Vec<NodeRecord>) {
        for r in records {
            nodes.insert(
                r.xpath,
                StoredNode {
                    leaves: r.leaves,
                    last_modified: r.last_modified,
                },
            );
        }
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn get(&self, xpath: &str, fetch: FetchDescendants) -> Result<DataNode> {
        let nodes = self.nodes.read();
        let root = Self::record(&nodes, xpath)
            .ok_or_else(|| Error::NotFound(format!("Data node {}", xpath)))?;
        let below = if fetch == FetchDescendants::Omit {
            Vec::new()
        } else {
            Self::descendants(&nodes, xpath)
        };
        Ok(assemble(root, below, fetch))
    }

    async fn children(&self, xpath: &str) -> Result<Vec<DataNode>> {
        Ok(self.get(xpath, FetchDescendants::All).await?.children)
    }

    async fn create_child(
        &self,
        parent_xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let records = flatten_children(parent_xpath, json, timestamp)?;

        let mut nodes = self.nodes.write();
        if !Self::exists(&nodes, parent_xpath) {
            return Err(Error::NotFound(format!("Parent data node {}", parent_xpath)));
        }
        if let Some(dup) = records.iter().find(|r| nodes.contains_key(&r.xpath)) {
            return Err(Error::AlreadyExists(format!("Data node {}", dup.xpath)));
        }
        Self::insert_all(&mut nodes, records);
        Ok(())
    }

    async fn update_leaves(
        &self,
        xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::Validation("Leaves payload must be a JSON object".to_string()))?;
        let (leaves, nested) = split_leaves(obj);
        if !nested.is_empty() {
            return Err(Error::Validation(format!(
                "Leaf update of {} contains child nodes",
                xpath
            )));
        }

        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(xpath)
            .ok_or_else(|| Error::NotFound(format!("Data node {}", xpath)))?;
        node.leaves.extend(leaves);
        if timestamp.is_some() {
            node.last_modified = timestamp;
        }
        Ok(())
    }

    async fn replace_node(
        &self,
        xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::Validation("Node payload must be a JSON object".to_string()))?;
        let mut records = Vec::new();
        flatten_node(xpath, obj, timestamp, &mut records)?;

        let mut nodes = self.nodes.write();
        if !nodes.contains_key(xpath) {
            return Err(Error::NotFound(format!("Data node {}", xpath)));
        }
        Self::remove_subtree(&mut nodes, xpath);
        Self::insert_all(&mut nodes, records);
        Ok(())
    }

    async fn delete_node(&self, xpath: &str) -> Result<()> {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(xpath) {
            return Err(Error::NotFound(format!("Data node {}", xpath)));
        }
        Self::remove_subtree(&mut nodes, xpath);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> InMemoryRegistryStore {
        let store = InMemoryRegistryStore::new();
        store
            .create_child("/", &json!({ "dmi-registry": {} }), None)
            .await
            .unwrap();
        store
            .create_child(
                "/dmi-registry",
                &json!({ "cm-handles": [
                    { "id": "cmh-1", "state": { "cm-handle-state": "ADVISED" } },
                    { "id": "cmh-2", "state": { "cm-handle-state": "READY" } }
                ]}),
                Some(Utc::now()),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_with_descendants() {
        let store = seeded().await;

        let handle = store
            .get("/dmi-registry/cm-handles[@id='cmh-1']", FetchDescendants::All)
            .await
            .unwrap();
        assert_eq!(handle.leaf_str("id"), Some("cmh-1"));
        assert_eq!(
            handle.child("state").and_then(|s| s.leaf_str("cm-handle-state")),
            Some("ADVISED")
        );

        let shallow = store
            .get("/dmi-registry/cm-handles[@id='cmh-1']", FetchDescendants::Omit)
            .await
            .unwrap();
        assert!(shallow.children.is_empty());

        let children = store.children("/dmi-registry").await.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_missing_parent() {
        let store = seeded().await;

        let dup = store
            .create_child("/dmi-registry", &json!({ "cm-handles": [{ "id": "cmh-1" }] }), None)
            .await;
        assert!(matches!(dup, Err(Error::AlreadyExists(_))));

        let orphan = store
            .create_child("/missing", &json!({ "x": {} }), None)
            .await;
        assert!(matches!(orphan, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_leaves_merges() {
        let store = seeded().await;
        let state = "/dmi-registry/cm-handles[@id='cmh-1']/state";

        store
            .update_leaves(state, &json!({ "last-update-time": "t1" }), None)
            .await
            .unwrap();
        let node = store.get(state, FetchDescendants::Omit).await.unwrap();
        assert_eq!(node.leaf_str("cm-handle-state"), Some("ADVISED"));
        assert_eq!(node.leaf_str("last-update-time"), Some("t1"));

        let missing = store
            .update_leaves("/dmi-registry/cm-handles[@id='nope']/state", &json!({ "a": 1 }), None)
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_replace_and_delete_subtree() {
        let store = seeded().await;
        let state = "/dmi-registry/cm-handles[@id='cmh-1']/state";

        store
            .replace_node(
                state,
                &json!({
                    "cm-handle-state": "LOCKED",
                    "lock-reason": { "reason": "MODULE_SYNC_FAILED", "details": "boom" }
                }),
                None,
            )
            .await
            .unwrap();
        let node = store.get(state, FetchDescendants::All).await.unwrap();
        assert_eq!(
            node.child("lock-reason").and_then(|l| l.leaf_str("details")),
            Some("boom")
        );

        store
            .replace_node(state, &json!({ "cm-handle-state": "ADVISED" }), None)
            .await
            .unwrap();
        let node = store.get(state, FetchDescendants::All).await.unwrap();
        assert!(node.child("lock-reason").is_none());

        store
            .delete_node("/dmi-registry/cm-handles[@id='cmh-1']")
            .await
            .unwrap();
        assert!(store.get(state, FetchDescendants::Omit).await.is_err());
        assert_eq!(store.children("/dmi-registry").await.unwrap().len(), 1);
    }
}
