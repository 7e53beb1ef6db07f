//! Registry Store - 경로 기반 계층형 데이터 저장소
//!
//! Nodes are addressed by xpath-like paths such as
//! `/dmi-registry/cm-handles[@id='cmh-1']/state`. List entries are keyed by
//! their `id` leaf. JSON payloads are flattened into one record per node.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Path of the implicit tree root
pub const ROOT_PATH: &str = "/";

/// Leaf used as the key of list entries
pub const LIST_KEY_LEAF: &str = "id";

/// Timestamp format used in registry leaves (`yyyy-MM-dd'T'HH:mm:ss.SSSZ`)
pub const REGISTRY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Format a timestamp the way registry leaves store it
pub fn format_registry_time(ts: &DateTime<Utc>) -> String {
    ts.format(REGISTRY_TIME_FORMAT).to_string()
}

/// Parse a registry timestamp leaf
pub fn parse_registry_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(value, REGISTRY_TIME_FORMAT)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("Invalid registry timestamp '{}': {}", value, e)))
}

// ============================================================================
// DataNode
// ============================================================================

/// How much of the subtree a read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchDescendants {
    /// Only the node itself
    Omit,
    /// The node and its direct children
    Direct,
    /// The whole subtree
    #[default]
    All,
}

/// One node of the registry tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNode {
    pub xpath: String,
    pub leaves: Map<String, Value>,
    pub children: Vec<DataNode>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl DataNode {
    pub fn new(xpath: impl Into<String>) -> Self {
        Self {
            xpath: xpath.into(),
            leaves: Map::new(),
            children: Vec::new(),
            last_modified: None,
        }
    }

    /// Node name without list predicate (`cm-handles`, `state`, ...)
    pub fn name(&self) -> &str {
        path::segment_name(path::last_segment(&self.xpath))
    }

    pub fn leaf(&self, name: &str) -> Option<&Value> {
        self.leaves.get(name)
    }

    pub fn leaf_str(&self, name: &str) -> Option<&str> {
        self.leaves.get(name).and_then(Value::as_str)
    }

    /// First direct child with the given node name
    pub fn child(&self, name: &str) -> Option<&DataNode> {
        self.children.iter().find(|c| c.name() == name)
    }
}

/// Flat storage form of a node (no children)
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub xpath: String,
    pub leaves: Map<String, Value>,
    pub last_modified: Option<DateTime<Utc>>,
}

// ============================================================================
// RegistryStore trait
// ============================================================================

/// Path-addressed hierarchical datastore
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Read a node, failing with `NotFound` when it does not exist
    async fn get(&self, xpath: &str, fetch: FetchDescendants) -> Result<DataNode>;

    /// Direct children of a node, each with its full subtree
    async fn children(&self, xpath: &str) -> Result<Vec<DataNode>>;

    /// Create the nodes described by `json` under an existing parent
    async fn create_child(
        &self,
        parent_xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Merge scalar leaves into an existing node
    async fn update_leaves(
        &self,
        xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Replace the leaves and the whole subtree of an existing node
    async fn replace_node(
        &self,
        xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Remove a node and its subtree
    async fn delete_node(&self, xpath: &str) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

// ============================================================================
// JSON <-> record conversion
// ============================================================================

/// Flatten the entries of a JSON object into records below `parent_xpath`
pub fn flatten_children(
    parent_xpath: &str,
    json: &Value,
    timestamp: Option<DateTime<Utc>>,
) -> Result<Vec<NodeRecord>> {
    let obj = json
        .as_object()
        .ok_or_else(|| Error::Validation("Registry payload must be a JSON object".to_string()))?;

    let mut records = Vec::new();
    for (name, value) in obj {
        match value {
            Value::Object(child) => {
                let xpath = path::join(parent_xpath, name);
                flatten_node(&xpath, child, timestamp, &mut records)?;
            }
            Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
                for item in items {
                    // all() above guarantees objects
                    let Some(child) = item.as_object() else { continue };
                    let key = list_key(name, child)?;
                    let xpath = path::join(parent_xpath, &path::list_entry(name, &key));
                    flatten_node(&xpath, child, timestamp, &mut records)?;
                }
            }
            _ => {
                return Err(Error::Validation(format!(
                    "'{}' is a leaf and cannot be created as a child node",
                    name
                )))
            }
        }
    }
    Ok(records)
}

/// Flatten one node object (leaves + nested containers/lists)
pub fn flatten_node(
    xpath: &str,
    obj: &Map<String, Value>,
    timestamp: Option<DateTime<Utc>>,
    out: &mut Vec<NodeRecord>,
) -> Result<()> {
    let (leaves, nested) = split_leaves(obj);
    out.push(NodeRecord {
        xpath: xpath.to_string(),
        leaves,
        last_modified: timestamp,
    });
    if !nested.is_empty() {
        out.extend(flatten_children(xpath, &Value::Object(nested), timestamp)?);
    }
    Ok(())
}

/// Separate scalar leaves (and leaf-lists) from nested nodes
pub fn split_leaves(obj: &Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut leaves = Map::new();
    let mut nested = Map::new();
    for (name, value) in obj {
        let is_node = match value {
            Value::Object(_) => true,
            Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
            _ => false,
        };
        if is_node {
            nested.insert(name.clone(), value.clone());
        } else {
            leaves.insert(name.clone(), value.clone());
        }
    }
    (leaves, nested)
}

fn list_key(list_name: &str, entry: &Map<String, Value>) -> Result<String> {
    match entry.get(LIST_KEY_LEAF) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::Validation(format!(
            "List entry of '{}' has no '{}' key leaf",
            list_name, LIST_KEY_LEAF
        ))),
    }
}

/// Build a `DataNode` tree from the records of a subtree
///
/// One pass groups records by parent path, then the tree is linked from the
/// root down, so the cost stays linear in the number of records.
pub fn assemble(root: NodeRecord, descendants: Vec<NodeRecord>, fetch: FetchDescendants) -> DataNode {
    let mut node = into_node(root);
    if fetch == FetchDescendants::Omit {
        return node;
    }

    let mut by_parent: HashMap<String, Vec<NodeRecord>> = HashMap::new();
    for record in descendants {
        if let Some(parent) = path::parent(&record.xpath) {
            by_parent.entry(parent).or_default().push(record);
        }
    }
    attach(&mut node, &mut by_parent, fetch == FetchDescendants::All);
    node
}

fn into_node(record: NodeRecord) -> DataNode {
    DataNode {
        xpath: record.xpath,
        leaves: record.leaves,
        children: Vec::new(),
        last_modified: record.last_modified,
    }
}

fn attach(node: &mut DataNode, by_parent: &mut HashMap<String, Vec<NodeRecord>>, deep: bool) {
    let Some(records) = by_parent.remove(&node.xpath) else {
        return;
    };
    for record in records {
        let mut child = into_node(record);
        if deep {
            attach(&mut child, by_parent, true);
        }
        node.children.push(child);
    }
}

// ============================================================================
// Path helpers
// ============================================================================

pub mod path {
    use super::ROOT_PATH;

    /// Append a segment to a parent path
    pub fn join(parent: &str, segment: &str) -> String {
        if parent == ROOT_PATH || parent.is_empty() {
            format!("/{}", segment)
        } else {
            format!("{}/{}", parent.trim_end_matches('/'), segment)
        }
    }

    /// `name[@id='key']`
    pub fn list_entry(name: &str, key: &str) -> String {
        format!("{}[@{}='{}']", name, super::LIST_KEY_LEAF, key)
    }

    /// Split a path into its segments, ignoring `/` inside predicates
    pub fn segments(xpath: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut start = 0usize;
        for (i, c) in xpath.char_indices() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'') | (None, '"') => quote = Some(c),
                (None, '[') => depth += 1,
                (None, ']') => depth = depth.saturating_sub(1),
                (None, '/') if depth == 0 => {
                    if i > start {
                        out.push(&xpath[start..i]);
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        if start < xpath.len() {
            out.push(&xpath[start..]);
        }
        out
    }

    pub fn last_segment(xpath: &str) -> &str {
        segments(xpath).last().copied().unwrap_or("")
    }

    /// Segment name without its predicate
    pub fn segment_name(segment: &str) -> &str {
        segment.split('[').next().unwrap_or(segment)
    }

    /// Parent path (`/` for top-level nodes, `None` for the root itself)
    pub fn parent(xpath: &str) -> Option<String> {
        let segs = segments(xpath);
        if segs.is_empty() {
            return None;
        }
        if segs.len() == 1 {
            return Some(ROOT_PATH.to_string());
        }
        Some(format!("/{}", segs[..segs.len() - 1].join("/")))
    }

    pub fn is_descendant(ancestor: &str, xpath: &str) -> bool {
        if ancestor == ROOT_PATH {
            return xpath != ROOT_PATH;
        }
        xpath.len() > ancestor.len() + 1
            && xpath.starts_with(ancestor)
            && xpath.as_bytes()[ancestor.len()] == b'/'
    }
}
