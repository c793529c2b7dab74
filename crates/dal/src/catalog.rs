//! Hierarchical dataset catalog
//!
//! A catalog is a nested YAML mapping: a node carrying a `driver` key is a
//! dataset leaf, any other mapping key opens a sub-group, and the reserved
//! `metadata` key attaches inheritable metadata at any level (notably the
//! `data_schema` block mapping canonical names to inline Avro schema JSON).
//!
//! The tree is read-only once loaded: nodes hold non-owning parent
//! back-references, so canonical names and metadata inheritance are plain
//! upward walks with root-reached termination.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

use diagnostics::{log_debug, log_info};
use serde::Deserialize;
use serde_json::Value;

use crate::dataset::VirtualDataset;
use crate::error::{Error, Result};
use crate::location::LocationSpec;

/// Driver name recognized on dataset leaves.
pub const DAL_DRIVER: &str = "dal";

/// Reserved key announcing a schema-registry indirection we do not support.
pub const SCHEMA_REGISTRY_KEY: &str = "kafka_schema_registry";

const RESERVED_KEYS: [&str; 3] = ["metadata", "description", "name"];

/// A dataset leaf as declared in the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetEntry {
    pub driver: String,
    pub args: DatasetArgs,
    #[serde(default)]
    pub description: Option<String>,
}

/// The `args` block of a dataset leaf: default storage mode, the mode map,
/// and any extra constructor arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetArgs {
    pub default: String,
    pub storage: BTreeMap<String, LocationSpec>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One node of the catalog tree. Immutable after load.
#[derive(Debug)]
pub struct CatalogNode {
    name: String,
    parent: Weak<CatalogNode>,
    metadata: serde_json::Map<String, Value>,
    children: OnceLock<BTreeMap<String, Arc<CatalogNode>>>,
    entry: Option<DatasetEntry>,
}

impl CatalogNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &serde_json::Map<String, Value> {
        &self.metadata
    }

    pub fn entry(&self) -> Option<&DatasetEntry> {
        self.entry.as_ref()
    }

    fn children(&self) -> &BTreeMap<String, Arc<CatalogNode>> {
        static EMPTY: OnceLock<BTreeMap<String, Arc<CatalogNode>>> = OnceLock::new();
        self.children
            .get()
            .unwrap_or_else(|| EMPTY.get_or_init(BTreeMap::new))
    }

    /// Dot-joined ancestor path, root excluded, this node's name last.
    pub fn canonical_name(&self) -> String {
        let mut names: Vec<String> = Vec::new();
        if self.parent.upgrade().is_some() {
            names.push(self.name.clone());
        }
        let mut cur = self.parent.upgrade();
        while let Some(node) = cur {
            let parent = node.parent.upgrade();
            if parent.is_some() {
                names.push(node.name.clone());
            }
            cur = parent;
        }
        names.reverse();
        names.join(".")
    }

    /// Walk upward (self included) until a node carries a `data_schema`
    /// mapping; root reached means absent.
    pub fn data_schema(&self) -> Option<serde_json::Map<String, Value>> {
        if let Some(ds) = self.metadata.get("data_schema").and_then(Value::as_object) {
            return Some(ds.clone());
        }
        let mut cur = self.parent.upgrade();
        while let Some(node) = cur {
            if let Some(ds) = node.metadata.get("data_schema").and_then(Value::as_object) {
                return Some(ds.clone());
            }
            cur = node.parent.upgrade();
        }
        None
    }

    /// Metadata merged along the ancestor chain, leaf entries winning.
    pub fn merged_metadata(&self) -> serde_json::Map<String, Value> {
        let mut chain: Vec<serde_json::Map<String, Value>> = vec![self.metadata.clone()];
        let mut cur = self.parent.upgrade();
        while let Some(node) = cur {
            chain.push(node.metadata.clone());
            cur = node.parent.upgrade();
        }
        let mut merged = serde_json::Map::new();
        for level in chain.into_iter().rev() {
            for (k, v) in level {
                merged.insert(k, v);
            }
        }
        merged
    }
}

/// A loaded catalog: the root of the node tree.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: Arc<CatalogNode>,
}

impl Catalog {
    /// Load a catalog from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Catalog> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_yaml_str(&text)?;
        log_info!(
            "Loaded catalog from {path}",
            path: path.as_ref().display().to_string()
        );
        Ok(catalog)
    }

    /// Load a catalog, overriding the default storage mode of every dal
    /// dataset it contains.
    pub fn load_with_mode(path: impl AsRef<Path>, storage_mode: &str) -> Result<Catalog> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str_with_mode(&text, Some(storage_mode))
    }

    /// Parse a catalog from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Catalog> {
        Self::from_yaml_str_with_mode(text, None)
    }

    pub fn from_yaml_str_with_mode(text: &str, storage_mode: Option<&str>) -> Result<Catalog> {
        let value: Value = serde_yaml::from_str(text)?;
        let Some(map) = value.as_object() else {
            return Err(Error::InvalidCatalog {
                path: String::new(),
                reason: "catalog root must be a mapping".to_string(),
            });
        };
        let root = build_node("", map, Weak::new(), storage_mode, "")?;
        Ok(Catalog { root })
    }

    pub fn root(&self) -> &Arc<CatalogNode> {
        &self.root
    }

    /// Look up a node by dot-separated path.
    pub fn node(&self, dotted: &str) -> Result<Arc<CatalogNode>> {
        let mut cur = self.root.clone();
        for part in dotted.split('.') {
            let next = cur.children().get(part).cloned();
            cur = next.ok_or_else(|| Error::InvalidCatalog {
                path: dotted.to_string(),
                reason: format!("no catalog entry named '{}'", part),
            })?;
        }
        Ok(cur)
    }

    /// Look up a dataset by dot-separated canonical path.
    pub fn dataset(&self, dotted: &str) -> Result<VirtualDataset> {
        let node = self.node(dotted)?;
        let entry = node
            .entry()
            .cloned()
            .ok_or_else(|| Error::InvalidCatalog {
                path: dotted.to_string(),
                reason: "entry is a group, not a dataset".to_string(),
            })?;
        log_debug!("Resolved catalog path {path}", path: dotted.to_string());
        Ok(VirtualDataset::new(node, entry))
    }
}

fn build_node(
    name: &str,
    map: &serde_json::Map<String, Value>,
    parent: Weak<CatalogNode>,
    storage_mode: Option<&str>,
    path: &str,
) -> Result<Arc<CatalogNode>> {
    let metadata = map
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let entry = if map.contains_key("driver") {
        let mut entry: DatasetEntry =
            serde_json::from_value(Value::Object(map.clone())).map_err(|e| {
                Error::InvalidCatalog {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            })?;
        if entry.driver != DAL_DRIVER {
            return Err(Error::InvalidCatalog {
                path: path.to_string(),
                reason: format!("unsupported driver '{}'", entry.driver),
            });
        }
        // catalog-wide storage-mode override rewrites each dataset default
        if let Some(mode) = storage_mode {
            entry.args.default = mode.to_string();
        }
        Some(entry)
    } else {
        None
    };

    let is_leaf = entry.is_some();
    let node = Arc::new(CatalogNode {
        name: name.to_string(),
        parent,
        metadata,
        children: OnceLock::new(),
        entry,
    });

    let mut children = BTreeMap::new();
    if !is_leaf {
        for (key, value) in map {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(child_map) = value.as_object() else {
                return Err(Error::InvalidCatalog {
                    path: join_path(path, key),
                    reason: "catalog entries must be mappings".to_string(),
                });
            };
            let child = build_node(
                key,
                child_map,
                Arc::downgrade(&node),
                storage_mode,
                &join_path(path, key),
            )?;
            children.insert(key.clone(), child);
        }
    }
    // set exactly once, during construction
    let _ = node.children.set(children);
    Ok(node)
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
