//! # Record: the unit of work.
//!
//! A [`Record`] carries an immutable id, an optional run association, an
//! ordered map of typed fields, and an append-only list of error messages.
//!
//! ## Rules
//! - `id`, `run_id` and `errors` are reserved: the field API rejects them.
//! - `run_id` is set once ([`Record::initialize_run_id`]) and never changes.
//! - `errors` only grows ([`Record::add_error`]).
//! - Derived children ([`Record::derive`]) are deep copies with a new id and no errors.
//! - Tombstones ([`Record::to_tombstone`]) keep only id, run id and errors, and
//!   carry an explicit marker; a record with errors is not a tombstone by itself.
//!
//! ## Update modes
//! ```text
//!              field absent     field present
//! Overwrite    set              replace
//! Append       set              coerce to list, push
//! Skip         set              leave untouched
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, RecordError};
use crate::record::Value;

/// Reserved name of the identity field.
pub const ID_FIELD: &str = "id";
/// Reserved name of the run association field.
pub const RUN_ID_FIELD: &str = "run_id";
/// Reserved name of the error annotation field.
pub const ERRORS_FIELD: &str = "errors";

const RESERVED_FIELDS: [&str; 3] = [ID_FIELD, RUN_ID_FIELD, ERRORS_FIELD];

/// How a write treats a field that already has a value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Replace the existing value.
    #[default]
    Overwrite,
    /// Turn the existing value into a list and append.
    Append,
    /// Keep the existing value.
    Skip,
}

/// Mutable unit of work flowing through a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    fields: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    tombstone: bool,
}

impl Record {
    /// Creates an empty record with the given id.
    pub fn new(id: impl Into<String>) -> Result<Self, RecordError> {
        let id = id.into();
        if id.is_empty() {
            return Err(RecordError::EmptyId);
        }
        Ok(Self {
            id,
            run_id: None,
            fields: IndexMap::new(),
            errors: Vec::new(),
            tombstone: false,
        })
    }

    /// Returns the record id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the run this record belongs to, if it was injected into one.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Associates the record with a run.
    ///
    /// Setting the same run id again is a no-op; a different one is rejected.
    pub fn initialize_run_id(&mut self, run_id: &str) -> Result<(), RecordError> {
        match &self.run_id {
            None => {
                self.run_id = Some(run_id.to_owned());
                Ok(())
            }
            Some(current) if current == run_id => Ok(()),
            Some(current) => Err(RecordError::RunIdReassigned {
                id: self.id.clone(),
                current: current.clone(),
                requested: run_id.to_owned(),
            }),
        }
    }

    /// Returns `true` if the field has a value.
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Returns the value of a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the value of a field if it is a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Returns the value of a field if it is an integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    /// Returns the items of a list field.
    pub fn get_list(&self, name: &str) -> Option<&[Value]> {
        self.get(name).and_then(Value::as_list)
    }

    /// Iterates over fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Writes `values` into field `name` according to `mode`.
    ///
    /// With `Overwrite` (or `Skip` on an absent field) a single value is stored
    /// as a scalar and several values as a list. With `Append` every value is
    /// pushed onto the field, converting an existing scalar into a list first.
    /// An empty `values` is a no-op.
    ///
    /// # Example
    /// ```
    /// use pipevisor::{Record, UpdateMode, Value};
    ///
    /// let mut r = Record::new("doc-1").unwrap();
    /// r.update("tags", UpdateMode::Append, ["a"]).unwrap();
    /// r.update("tags", UpdateMode::Append, ["b"]).unwrap();
    /// assert_eq!(r.get_list("tags").unwrap(), &[Value::from("a"), Value::from("b")]);
    /// ```
    pub fn update<I, V>(&mut self, name: &str, mode: UpdateMode, values: I) -> Result<(), RecordError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ensure_writable(name)?;
        let mut values = values.into_iter().map(Into::into);
        let Some(first) = values.next() else {
            return Ok(());
        };

        match mode {
            UpdateMode::Skip if self.has(name) => Ok(()),
            UpdateMode::Overwrite | UpdateMode::Skip => {
                let rest: Vec<Value> = values.collect();
                let value = if rest.is_empty() {
                    first
                } else {
                    let mut items = Vec::with_capacity(rest.len() + 1);
                    items.push(first);
                    items.extend(rest);
                    Value::List(items)
                };
                self.fields.insert(name.to_owned(), value);
                Ok(())
            }
            UpdateMode::Append => {
                let slot = self
                    .fields
                    .entry(name.to_owned())
                    .or_insert_with(|| Value::List(Vec::new()));
                if !matches!(slot, Value::List(_)) {
                    let existing = std::mem::replace(slot, Value::List(Vec::new()));
                    *slot = Value::List(vec![existing]);
                }
                if let Value::List(items) = slot {
                    items.push(first);
                    items.extend(values);
                }
                Ok(())
            }
        }
    }

    /// Sets a field, replacing any existing value.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), RecordError> {
        self.update(name, UpdateMode::Overwrite, [value])
    }

    /// Appends a value to a field, converting it into a list if needed.
    pub fn add_to_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), RecordError> {
        self.update(name, UpdateMode::Append, [value])
    }

    /// Removes a field and returns its value.
    pub fn remove_field(&mut self, name: &str) -> Result<Option<Value>, RecordError> {
        ensure_writable(name)?;
        Ok(self.fields.shift_remove(name))
    }

    /// Moves the value of `old` into `new` according to `mode`.
    ///
    /// A missing `old` field is a no-op. List values are spread item by item.
    pub fn rename_field(&mut self, old: &str, new: &str, mode: UpdateMode) -> Result<(), RecordError> {
        ensure_writable(new)?;
        match self.remove_field(old)? {
            Some(value) => self.update(new, mode, value.into_items()),
            None => Ok(()),
        }
    }

    /// Appends an error message. Errors are never overwritten.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Returns the accumulated error messages.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Returns `true` if any error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Creates a child record: a deep copy with a new id and an empty error list.
    ///
    /// The child keeps the parent's run association.
    pub fn derive(&self, child_id: impl Into<String>) -> Result<Record, RecordError> {
        let mut child = Record::new(child_id)?;
        child.run_id = self.run_id.clone();
        child.fields = self.fields.clone();
        Ok(child)
    }

    /// Reduces the record to identity, run association and errors, appending `message`.
    pub fn to_tombstone(&self, message: impl Into<String>) -> Record {
        let mut errors = self.errors.clone();
        errors.push(message.into());
        Record {
            id: self.id.clone(),
            run_id: self.run_id.clone(),
            fields: IndexMap::new(),
            errors,
            tombstone: true,
        }
    }

    /// Returns `true` if the record was produced by [`Record::to_tombstone`].
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Encodes the record as canonical JSON.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a record from canonical JSON. Unknown top-level keys are ignored.
    pub fn from_json(text: &str) -> Result<Record, CodecError> {
        let record: Record = serde_json::from_str(text)?;
        if record.id.is_empty() {
            return Err(RecordError::EmptyId.into());
        }
        Ok(record)
    }
}

fn ensure_writable(name: &str) -> Result<(), RecordError> {
    if RESERVED_FIELDS.contains(&name) {
        return Err(RecordError::ReservedField {
            field: name.to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> Record {
        Record::new(id).unwrap()
    }

    #[test]
    fn test_append_builds_list_in_order() {
        let mut r = record("doc");
        r.update("tags", UpdateMode::Append, ["a"]).unwrap();
        r.update("tags", UpdateMode::Append, ["b"]).unwrap();
        assert_eq!(
            r.get("tags"),
            Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn test_append_coerces_scalar() {
        let mut r = record("doc");
        r.set_field("author", "ann").unwrap();
        r.add_to_field("author", "bob").unwrap();
        assert_eq!(r.get_list("author").unwrap().len(), 2);
    }

    #[test]
    fn test_skip_keeps_existing_value() {
        let mut r = record("doc");
        r.set_field("title", "first").unwrap();
        r.update("title", UpdateMode::Skip, ["second"]).unwrap();
        r.update("lang", UpdateMode::Skip, ["en"]).unwrap();
        assert_eq!(r.get_str("title"), Some("first"));
        assert_eq!(r.get_str("lang"), Some("en"));
    }

    #[test]
    fn test_overwrite_with_several_values_stores_list() {
        let mut r = record("doc");
        r.set_field("n", 1).unwrap();
        r.update("n", UpdateMode::Overwrite, [2, 3]).unwrap();
        assert_eq!(r.get_list("n").unwrap(), &[Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_reserved_fields_are_rejected() {
        let mut r = record("doc");
        for name in [ID_FIELD, RUN_ID_FIELD, ERRORS_FIELD] {
            assert_eq!(
                r.set_field(name, "x"),
                Err(RecordError::ReservedField { field: name.into() })
            );
        }
        assert!(r.remove_field(ID_FIELD).is_err());
        assert!(r.rename_field("a", RUN_ID_FIELD, UpdateMode::Overwrite).is_err());
    }

    #[test]
    fn test_run_id_is_set_once() {
        let mut r = record("doc");
        r.initialize_run_id("run-1").unwrap();
        r.initialize_run_id("run-1").unwrap();
        assert!(matches!(
            r.initialize_run_id("run-2"),
            Err(RecordError::RunIdReassigned { .. })
        ));
        assert_eq!(r.run_id(), Some("run-1"));
    }

    #[test]
    fn test_rename_spreads_list_and_preserves_order() {
        let mut r = record("doc");
        r.set_field("a", 1).unwrap();
        r.update("src", UpdateMode::Overwrite, ["x", "y"]).unwrap();
        r.set_field("z", 2).unwrap();
        r.set_field("dst", "w").unwrap();

        r.rename_field("src", "dst", UpdateMode::Append).unwrap();

        let names: Vec<_> = r.fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "z", "dst"]);
        assert_eq!(
            r.get_list("dst").unwrap(),
            &[Value::from("w"), Value::from("x"), Value::from("y")]
        );
    }

    #[test]
    fn test_derive_copies_fields_and_run_but_not_errors() {
        let mut parent = record("p");
        parent.initialize_run_id("run").unwrap();
        parent.set_field("body", "text").unwrap();
        parent.add_error("earlier");

        let mut child = parent.derive("p-1").unwrap();
        child.set_field("body", "changed").unwrap();

        assert_eq!(child.id(), "p-1");
        assert_eq!(child.run_id(), Some("run"));
        assert!(child.errors().is_empty());
        assert_eq!(parent.get_str("body"), Some("text"));
    }

    #[test]
    fn test_tombstone_keeps_identity_and_errors_only() {
        let mut r = record("rec3");
        r.initialize_run_id("run").unwrap();
        r.set_field("body", "x").unwrap();
        r.add_error("warn");

        let t = r.to_tombstone("parse: bad input");

        assert_eq!(t.id(), "rec3");
        assert_eq!(t.run_id(), Some("run"));
        assert_eq!(t.fields().count(), 0);
        assert_eq!(t.errors(), &["warn".to_string(), "parse: bad input".to_string()]);
        assert!(t.is_tombstone());
        assert!(!r.is_tombstone());
        assert!(Record::from_json(&t.to_json().unwrap()).unwrap().is_tombstone());
    }

    #[test]
    fn test_annotated_record_without_fields_is_not_a_tombstone() {
        let mut r = record("doc");
        r.add_error("date field unparseable; left as is");
        assert!(!r.is_tombstone());
        assert!(!r.to_json().unwrap().contains("tombstone"));
        assert!(!r.derive("doc-1").unwrap().is_tombstone());
    }

    #[test]
    fn test_json_round_trip_with_nested_values() {
        let mut r = record("doc");
        r.initialize_run_id("run").unwrap();
        r.set_field("n", 42).unwrap();
        r.set_field("f", 0.5).unwrap();
        r.set_field("raw", Value::Bytes(vec![0, 159, 255])).unwrap();
        let mut nested = IndexMap::new();
        nested.insert("k".to_string(), Value::List(vec![Value::Bool(true), Value::from("v")]));
        r.set_field("meta", nested).unwrap();
        r.add_error("e1");

        let decoded = Record::from_json(&r.to_json().unwrap()).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn test_decode_ignores_unknown_keys_and_rejects_empty_id() {
        let r = Record::from_json(r#"{"id":"a","schema_version":3}"#).unwrap();
        assert_eq!(r.id(), "a");
        assert!(Record::from_json(r#"{"id":""}"#).is_err());
    }
}
