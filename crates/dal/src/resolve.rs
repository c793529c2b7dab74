//! Storage-mode resolution
//!
//! Picks the active storage mode for a dataset (override, else default),
//! parses its location, merges mode-specific and caller arguments, injects
//! driver compatibility defaults, attaches schema metadata and hands the
//! resulting plan to the driver registry.

use std::sync::Arc;

use diagnostics::log_debug;
use serde_json::Value;

use crate::backend::{create_backend, Backend, BackendSpec};
use crate::catalog::{CatalogNode, DatasetEntry, SCHEMA_REGISTRY_KEY};
use crate::error::{Error, Result};
use crate::location::Location;
use crate::schema::{to_column_types, AvroSchema};

/// Compute the backend construction plan without constructing the backend.
pub fn plan(
    node: &Arc<CatalogNode>,
    entry: &DatasetEntry,
    storage_mode: Option<&str>,
    extra_args: &serde_json::Map<String, Value>,
) -> Result<BackendSpec> {
    let active = match storage_mode {
        Some(mode) if !mode.is_empty() => mode,
        _ => entry.args.default.as_str(),
    };
    let descriptor = entry.args.storage.get(active).ok_or_else(|| Error::ModeNotFound {
        mode: active.to_string(),
        available: entry.args.storage.keys().cloned().collect(),
    })?;

    let location = Location::parse(descriptor.url())?;

    // mode-specific args first, then dataset extras, then caller overrides
    let mut args = descriptor.args();
    for (key, value) in &entry.args.extra {
        args.entry(key.clone()).or_insert_with(|| value.clone());
    }
    for (key, value) in extra_args {
        args.insert(key.clone(), value.clone());
    }

    if location.scheme() == "parquet" {
        // large partition counts make statistics-gathering prohibitively
        // slow; callers may still override either key
        args.entry("gather_statistics").or_insert(Value::Bool(false));
        args.entry("engine")
            .or_insert_with(|| Value::String("pyarrow".to_string()));
    }

    let canonical_name = node.canonical_name();
    let mut metadata = node.merged_metadata();
    metadata.insert(
        "canonical_name".to_string(),
        Value::String(canonical_name.clone()),
    );
    metadata.insert(
        "storage_mode".to_string(),
        Value::String(active.to_string()),
    );
    metadata.insert(
        "url_path".to_string(),
        Value::String(location.rest().to_string()),
    );

    let avro_schema = lookup_schema(node, &canonical_name)?;
    let column_types = match &avro_schema {
        Some(schema) => {
            let types = to_column_types(schema)?;
            metadata.insert("avro_schema".to_string(), serde_json::to_value(schema)?);
            metadata.insert("dtypes".to_string(), Value::Object(types.display_map()));
            Some(types)
        }
        None => None,
    };

    log_debug!(
        "Planned backend {scheme} for {name} in mode {mode}",
        scheme: location.scheme().to_string(),
        name: canonical_name.clone(),
        mode: active.to_string()
    );

    Ok(BackendSpec {
        scheme: location.scheme().to_string(),
        location: location.rest().to_string(),
        args,
        canonical_name,
        storage_mode: active.to_string(),
        avro_schema,
        column_types,
        metadata,
    })
}

/// Resolve a dataset to a concrete backend instance.
pub fn resolve(
    node: &Arc<CatalogNode>,
    entry: &DatasetEntry,
    storage_mode: Option<&str>,
    extra_args: &serde_json::Map<String, Value>,
) -> Result<Box<dyn Backend>> {
    create_backend(plan(node, entry, storage_mode, extra_args)?)
}

/// Inline schema for the canonical name, from inherited catalog metadata.
fn lookup_schema(node: &CatalogNode, canonical_name: &str) -> Result<Option<AvroSchema>> {
    let Some(data_schema) = node.data_schema() else {
        return Ok(None);
    };
    if data_schema.contains_key(SCHEMA_REGISTRY_KEY) {
        return Err(Error::SchemaRegistryUnsupported(canonical_name.to_string()));
    }
    match data_schema.get(canonical_name) {
        Some(Value::String(text)) => Ok(Some(AvroSchema::from_json(text)?)),
        Some(inline @ Value::Object(_)) => Ok(Some(serde_json::from_value(inline.clone())?)),
        Some(other) => Err(Error::InvalidCatalog {
            path: canonical_name.to_string(),
            reason: format!("data_schema entry must be JSON text or a mapping, got {other}"),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use serde_json::json;

    const CATALOG: &str = r#"
metadata:
  data_schema:
    entity.user.user_events: '{"name":"user_events","type":"record","fields":[{"name":"userid","type":"long"},{"name":"action","type":"string"}]}'
entity:
  user:
    user_events:
      driver: dal
      args:
        default: local
        storage:
          local: 'csv:///data/user_events.csv'
          batch:
            url: 'parquet:///data/user_events.parquet'
            args:
              columns: ['userid']
          serving: 'dal-online://localhost:5000#userid'
"#;

    fn plan_for(mode: Option<&str>, extra: serde_json::Map<String, Value>) -> Result<BackendSpec> {
        let cat = Catalog::from_yaml_str(CATALOG).unwrap();
        let node = cat.node("entity.user.user_events").unwrap();
        let entry = node.entry().unwrap().clone();
        plan(&node, &entry, mode, &extra)
    }

    #[test]
    fn default_mode_is_used_when_no_override() {
        let spec = plan_for(None, serde_json::Map::new()).unwrap();
        assert_eq!(spec.scheme, "csv");
        assert_eq!(spec.storage_mode, "local");
        assert_eq!(spec.location, "/data/user_events.csv");
    }

    #[test]
    fn override_mode_wins() {
        let spec = plan_for(Some("batch"), serde_json::Map::new()).unwrap();
        assert_eq!(spec.scheme, "parquet");
        assert_eq!(spec.storage_mode, "batch");
        // structured descriptor args survive the merge
        assert_eq!(spec.args.get("columns"), Some(&json!(["userid"])));
    }

    #[test]
    fn empty_override_falls_back_to_default() {
        let spec = plan_for(Some(""), serde_json::Map::new()).unwrap();
        assert_eq!(spec.storage_mode, "local");
    }

    #[test]
    fn absent_mode_fails() {
        let err = plan_for(Some("nope"), serde_json::Map::new()).unwrap_err();
        match err {
            Error::ModeNotFound { mode, available } => {
                assert_eq!(mode, "nope");
                assert!(available.contains(&"local".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parquet_defaults_injected() {
        let spec = plan_for(Some("batch"), serde_json::Map::new()).unwrap();
        assert_eq!(spec.args.get("gather_statistics"), Some(&json!(false)));
        assert_eq!(spec.args.get("engine"), Some(&json!("pyarrow")));
    }

    #[test]
    fn parquet_defaults_do_not_clobber_caller_args() {
        let mut extra = serde_json::Map::new();
        extra.insert("engine".to_string(), json!("fastparquet"));
        let spec = plan_for(Some("batch"), extra).unwrap();
        assert_eq!(spec.args.get("engine"), Some(&json!("fastparquet")));
        assert_eq!(spec.args.get("gather_statistics"), Some(&json!(false)));
    }

    #[test]
    fn metadata_carries_identity_schema_and_diagnostics() {
        let spec = plan_for(Some("serving"), serde_json::Map::new()).unwrap();
        assert_eq!(spec.canonical_name, "entity.user.user_events");
        assert_eq!(
            spec.metadata.get("canonical_name"),
            Some(&json!("entity.user.user_events"))
        );
        assert_eq!(spec.metadata.get("storage_mode"), Some(&json!("serving")));
        assert_eq!(
            spec.metadata.get("url_path"),
            Some(&json!("localhost:5000#userid"))
        );
        let dtypes = spec.metadata.get("dtypes").unwrap().as_object().unwrap();
        assert_eq!(dtypes.get("userid"), Some(&json!("int64")));
        assert_eq!(dtypes.get("action"), Some(&json!("object")));
        assert!(spec.avro_schema.is_some());
        assert_eq!(spec.column_types.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn missing_schema_entry_leaves_dtypes_unset() {
        let text = r#"
orphan:
  driver: dal
  args:
    default: local
    storage:
      local: 'csv:///data/orphan.csv'
"#;
        let cat = Catalog::from_yaml_str(text).unwrap();
        let node = cat.node("orphan").unwrap();
        let entry = node.entry().unwrap().clone();
        let spec = plan(&node, &entry, None, &serde_json::Map::new()).unwrap();
        assert!(spec.avro_schema.is_none());
        assert!(spec.metadata.get("dtypes").is_none());
    }

    #[test]
    fn schema_registry_indirection_is_refused() {
        let text = r#"
metadata:
  data_schema:
    kafka_schema_registry: 'http://registry:8081'
ds:
  driver: dal
  args:
    default: local
    storage:
      local: 'csv:///data/ds.csv'
"#;
        let cat = Catalog::from_yaml_str(text).unwrap();
        let node = cat.node("ds").unwrap();
        let entry = node.entry().unwrap().clone();
        assert!(matches!(
            plan(&node, &entry, None, &serde_json::Map::new()),
            Err(Error::SchemaRegistryUnsupported(_))
        ));
    }
}
