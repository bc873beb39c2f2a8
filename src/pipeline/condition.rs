//! # Step conditions: which records a step applies to.
//!
//! A step with conditions only processes records that match them; every other
//! record passes through it untouched.
//!
//! ```text
//! Condition { fields, values: None,    operator: must }      all fields present
//! Condition { fields, values: None,    operator: must_not }  all fields absent
//! Condition { fields, values: Some(v), operator: must }      some field holds a value in v
//! Condition { fields, values: Some(v), operator: must_not }  no field holds a value in v
//! ```
//!
//! Field values are compared by their text form; list fields match when any
//! element does. [`ConditionPolicy`] combines several conditions.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StepError;
use crate::pipeline::{Step, StepOutput};
use crate::record::{Record, Value};

/// Whether a condition requires or forbids its match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Must,
    MustNot,
}

/// How several conditions on one step combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    /// Every condition must hold.
    #[default]
    All,
    /// At least one condition must hold.
    Any,
}

/// One predicate over a record's fields.
#[derive(Clone, Debug, Deserialize)]
pub struct Condition {
    /// Fields inspected.
    pub fields: Vec<String>,
    /// Accepted values; `None` tests presence only.
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub operator: Operator,
}

impl Condition {
    /// Presence test on `fields`.
    pub fn present<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            values: None,
            operator: Operator::Must,
        }
    }

    /// Restricts the condition to the given values.
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Inverts the condition.
    pub fn negated(mut self) -> Self {
        self.operator = match self.operator {
            Operator::Must => Operator::MustNot,
            Operator::MustNot => Operator::Must,
        };
        self
    }

    /// Evaluates the condition against `record`.
    pub fn matches(&self, record: &Record) -> bool {
        let must = self.operator == Operator::Must;
        match &self.values {
            None => self.fields.iter().all(|f| record.has(f) == must),
            Some(values) => {
                let accepted: HashSet<&str> = values.iter().map(String::as_str).collect();
                let found = self
                    .fields
                    .iter()
                    .filter_map(|f| record.get(f))
                    .flat_map(texts)
                    .any(|text| accepted.contains(text.as_str()));
                found == must
            }
        }
    }
}

fn texts(value: &Value) -> Vec<String> {
    match value {
        Value::List(items) => items.iter().filter_map(Value::to_text).collect(),
        other => other.to_text().into_iter().collect(),
    }
}

/// Applies `policy` to `conditions`; an empty list always matches.
pub fn conditions_match(conditions: &[Condition], policy: ConditionPolicy, record: &Record) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match policy {
        ConditionPolicy::All => conditions.iter().all(|c| c.matches(record)),
        ConditionPolicy::Any => conditions.iter().any(|c| c.matches(record)),
    }
}

/// Wraps a step so it only sees records matching its conditions.
pub(crate) struct Conditional {
    inner: Box<dyn Step>,
    conditions: Vec<Condition>,
    policy: ConditionPolicy,
}

impl Conditional {
    pub(crate) fn new(inner: Box<dyn Step>, conditions: Vec<Condition>, policy: ConditionPolicy) -> Self {
        Self {
            inner,
            conditions,
            policy,
        }
    }
}

#[async_trait]
impl Step for Conditional {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn init(&mut self) -> Result<(), StepError> {
        self.inner.init().await
    }

    async fn process(&self, record: Record) -> Result<StepOutput, StepError> {
        if conditions_match(&self.conditions, self.policy, &record) {
            self.inner.process(record).await
        } else {
            Ok(StepOutput::one(record))
        }
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stamp;

    #[async_trait]
    impl Step for Stamp {
        fn name(&self) -> &str {
            "stamp"
        }

        async fn process(&self, mut record: Record) -> Result<StepOutput, StepError> {
            record.set_field("stamped", true)?;
            Ok(StepOutput::one(record))
        }
    }

    fn record(fields: &[(&str, Value)]) -> Record {
        let mut r = Record::new("r").unwrap();
        for (name, value) in fields {
            r.set_field(name, value.clone()).unwrap();
        }
        r
    }

    #[test]
    fn test_presence_conditions() {
        let both = record(&[("a", 1.into()), ("b", 2.into())]);
        let only_a = record(&[("a", 1.into())]);

        let must = Condition::present(["a", "b"]);
        assert!(must.matches(&both));
        assert!(!must.matches(&only_a));

        let must_not = Condition::present(["b", "c"]).negated();
        assert!(must_not.matches(&only_a));
        assert!(!must_not.matches(&both));
    }

    #[test]
    fn test_value_conditions_compare_text_and_list_items() {
        let r = record(&[
            ("lang", "en".into()),
            ("tags", Value::List(vec!["draft".into(), Value::Int(3)])),
        ]);

        assert!(Condition::present(["lang"]).with_values(["en", "fr"]).matches(&r));
        assert!(Condition::present(["tags"]).with_values(["3"]).matches(&r));
        assert!(!Condition::present(["lang", "missing"]).with_values(["de"]).matches(&r));
        assert!(!Condition::present(["tags"]).with_values(["draft"]).negated().matches(&r));
        assert!(Condition::present(["lang"]).with_values(["de"]).negated().matches(&r));
    }

    #[test]
    fn test_policy_combines_conditions() {
        let r = record(&[("a", 1.into())]);
        let conditions = vec![Condition::present(["a"]), Condition::present(["b"])];

        assert!(!conditions_match(&conditions, ConditionPolicy::All, &r));
        assert!(conditions_match(&conditions, ConditionPolicy::Any, &r));
        assert!(conditions_match(&[], ConditionPolicy::All, &r));
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let c: Condition =
            serde_json::from_str(r#"{"fields": ["x"], "operator": "must_not"}"#).unwrap();
        assert_eq!(c.operator, Operator::MustNot);
        assert!(c.values.is_none());

        let c: Condition = serde_json::from_str(r#"{"fields": ["x"], "values": ["1"]}"#).unwrap();
        assert_eq!(c.operator, Operator::Must);
    }

    #[tokio::test]
    async fn test_non_matching_record_passes_through_untouched() {
        let step = Conditional::new(
            Box::new(Stamp),
            vec![Condition::present(["kind"]).with_values(["pdf"])],
            ConditionPolicy::All,
        );
        assert_eq!(step.name(), "stamp");

        let pdf = record(&[("kind", "pdf".into())]);
        let out: Vec<_> = step.process(pdf).await.unwrap().collect();
        assert!(out[0].has("stamped"));

        let html = record(&[("kind", "html".into())]);
        let out: Vec<_> = step.process(html).await.unwrap().collect();
        assert_eq!(out.len(), 1);
        assert!(!out[0].has("stamped"));
    }
}
