//! Built-in steps registered by [`StepRegistry::with_builtins`](crate::StepRegistry::with_builtins).
//!
//! | type                | config                                              |
//! |---------------------|-----------------------------------------------------|
//! | `set_static_values` | `values: {field: value}`, `mode`                    |
//! | `copy_fields`       | `mapping: {source: target}`, `mode`                 |
//! | `rename_fields`     | `mapping: {source: target}`, `mode`                 |
//! | `drop_record`       | `when_present: field` (optional)                    |
//! | `split_field`       | `field`, `target`, `keep_parent` (default `true`)   |
//!
//! `mode` is one of `overwrite` (default), `append`, `skip`.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::StepError;
use crate::pipeline::{Step, StepConfig, StepOutput};
use crate::record::{Record, UpdateMode, Value};

fn mode(name: &str, config: &StepConfig) -> Result<UpdateMode, StepError> {
    match config.get("mode") {
        None => Ok(UpdateMode::default()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| StepError::config(name, format!("invalid mode: {e}"))),
    }
}

fn required_str<'a>(name: &str, config: &'a StepConfig, key: &str) -> Result<&'a str, StepError> {
    config
        .get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| StepError::config(name, format!("`{key}` must be a string")))
}

fn string_mapping(name: &str, config: &StepConfig) -> Result<Vec<(String, String)>, StepError> {
    let map = config
        .get("mapping")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| StepError::config(name, "`mapping` must be an object"))?;
    map.iter()
        .map(|(src, dst)| {
            dst.as_str()
                .map(|dst| (src.clone(), dst.to_owned()))
                .ok_or_else(|| StepError::config(name, format!("target of `{src}` must be a string")))
        })
        .collect()
}

/// Writes constant values into every record.
pub struct SetStaticValues {
    name: String,
    values: IndexMap<String, Value>,
    mode: UpdateMode,
}

impl SetStaticValues {
    /// Builds the step from `values` and `mode`.
    pub fn from_config(name: &str, config: &StepConfig) -> Result<Box<dyn Step>, StepError> {
        let values = config
            .get("values")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| StepError::config(name, "`values` must be an object"))?
            .iter()
            .filter_map(|(k, v)| Value::from_json(v.clone()).map(|v| (k.clone(), v)))
            .collect();
        Ok(Box::new(Self {
            name: name.to_owned(),
            values,
            mode: mode(name, config)?,
        }))
    }
}

#[async_trait]
impl Step for SetStaticValues {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut record: Record) -> Result<StepOutput, StepError> {
        for (field, value) in &self.values {
            record.update(field, self.mode, [value.clone()])?;
        }
        Ok(StepOutput::one(record))
    }
}

/// Copies (or moves) field values to other fields.
pub struct CopyFields {
    name: String,
    mapping: Vec<(String, String)>,
    mode: UpdateMode,
    remove_source: bool,
}

impl CopyFields {
    /// Builds a step that keeps the source fields.
    pub fn copy_from_config(name: &str, config: &StepConfig) -> Result<Box<dyn Step>, StepError> {
        Self::build(name, config, false)
    }

    /// Builds a step that removes the source fields.
    pub fn rename_from_config(name: &str, config: &StepConfig) -> Result<Box<dyn Step>, StepError> {
        Self::build(name, config, true)
    }

    fn build(name: &str, config: &StepConfig, remove_source: bool) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(Self {
            name: name.to_owned(),
            mapping: string_mapping(name, config)?,
            mode: mode(name, config)?,
            remove_source,
        }))
    }
}

#[async_trait]
impl Step for CopyFields {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut record: Record) -> Result<StepOutput, StepError> {
        for (src, dst) in &self.mapping {
            if self.remove_source {
                record.rename_field(src, dst, self.mode)?;
            } else if let Some(value) = record.get(src).cloned() {
                record.update(dst, self.mode, value.into_items())?;
            }
        }
        Ok(StepOutput::one(record))
    }
}

/// Removes records from the run, optionally only those carrying a field.
pub struct DropRecord {
    name: String,
    when_present: Option<String>,
}

impl DropRecord {
    /// Builds the step from the optional `when_present` field name.
    pub fn from_config(name: &str, config: &StepConfig) -> Result<Box<dyn Step>, StepError> {
        let when_present = match config.get("when_present") {
            None => None,
            Some(_) => Some(required_str(name, config, "when_present")?.to_owned()),
        };
        Ok(Box::new(Self {
            name: name.to_owned(),
            when_present,
        }))
    }
}

#[async_trait]
impl Step for DropRecord {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, record: Record) -> Result<StepOutput, StepError> {
        let drop = match &self.when_present {
            Some(field) => record.has(field),
            None => true,
        };
        Ok(if drop {
            StepOutput::none()
        } else {
            StepOutput::one(record)
        })
    }
}

/// Emits one child record per item of a list field.
///
/// Child `n` (1-based) gets id `{parent}-{n}`, the item in `target`, and no
/// copy of the source list.
pub struct SplitField {
    name: String,
    field: String,
    target: String,
    keep_parent: bool,
}

impl SplitField {
    /// Builds the step from `field`, `target` and `keep_parent`.
    pub fn from_config(name: &str, config: &StepConfig) -> Result<Box<dyn Step>, StepError> {
        let keep_parent = match config.get("keep_parent") {
            None => true,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| StepError::config(name, "`keep_parent` must be a boolean"))?,
        };
        Ok(Box::new(Self {
            name: name.to_owned(),
            field: required_str(name, config, "field")?.to_owned(),
            target: required_str(name, config, "target")?.to_owned(),
            keep_parent,
        }))
    }
}

#[async_trait]
impl Step for SplitField {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, record: Record) -> Result<StepOutput, StepError> {
        let items = match record.get(&self.field) {
            Some(value) => value.clone().into_items(),
            None => return Ok(StepOutput::one(record)),
        };

        let mut out = Vec::with_capacity(items.len() + 1);
        for (n, item) in items.into_iter().enumerate() {
            let mut child = record.derive(format!("{}-{}", record.id(), n + 1))?;
            child.remove_field(&self.field)?;
            child.set_field(&self.target, item)?;
            out.push(child);
        }
        if self.keep_parent {
            out.insert(0, record);
        }
        Ok(StepOutput::many(out))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(v: serde_json::Value) -> StepConfig {
        v.as_object().cloned().unwrap()
    }

    fn input() -> Record {
        let mut r = Record::new("doc").unwrap();
        r.initialize_run_id("run").unwrap();
        r
    }

    #[tokio::test]
    async fn test_set_static_values_respects_mode() {
        let step =
            SetStaticValues::from_config("static", &config(json!({"values": {"source": "crawl"}, "mode": "skip"})))
                .unwrap();
        let mut r = input();
        r.set_field("source", "manual").unwrap();

        let out: Vec<_> = step.process(r).await.unwrap().collect();
        assert_eq!(out[0].get_str("source"), Some("manual"));
    }

    #[tokio::test]
    async fn test_copy_and_rename() {
        let copy = CopyFields::copy_from_config("copy", &config(json!({"mapping": {"a": "b"}}))).unwrap();
        let rename = CopyFields::rename_from_config("mv", &config(json!({"mapping": {"a": "c"}}))).unwrap();
        let mut r = input();
        r.set_field("a", 1).unwrap();

        let r = copy.process(r).await.unwrap().next().unwrap();
        let r = rename.process(r).await.unwrap().next().unwrap();

        assert!(!r.has("a"));
        assert_eq!(r.get_int("b"), Some(1));
        assert_eq!(r.get_int("c"), Some(1));
    }

    #[tokio::test]
    async fn test_drop_record_conditional() {
        let step = DropRecord::from_config("drop", &config(json!({"when_present": "spam"}))).unwrap();
        assert_eq!(step.process(input()).await.unwrap().count(), 1);

        let mut spam = input();
        spam.set_field("spam", true).unwrap();
        assert_eq!(step.process(spam).await.unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_split_field_fans_out_children() {
        let step = SplitField::from_config(
            "split",
            &config(json!({"field": "chunks", "target": "chunk"})),
        )
        .unwrap();
        let mut r = input();
        r.update("chunks", UpdateMode::Overwrite, ["x", "y"]).unwrap();

        let out: Vec<_> = step.process(r).await.unwrap().collect();
        let ids: Vec<_> = out.iter().map(Record::id).collect();
        assert_eq!(ids, vec!["doc", "doc-1", "doc-2"]);
        assert_eq!(out[2].get_str("chunk"), Some("y"));
        assert_eq!(out[2].run_id(), Some("run"));
        assert!(!out[1].has("chunks"));
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = SplitField::from_config("split", &config(json!({"field": 3}))).err().unwrap();
        assert_eq!(err.as_label(), "step_config");
    }
}
