//! Row-level security rules and their caller-bound compiled form.

use crate::store::{AttributeValue, Attributes, Record};
use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

fn default_inclusive() -> bool {
    true
}

/// The row test of a security policy.
///
/// The set of variants is closed on purpose: every rule evaluates in bounded
/// time against one record's attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyRule {
    /// Matches exactly the listed records.
    AllowList { ids: Vec<RecordId> },

    /// Matches every record except the listed ones.
    DenyList { ids: Vec<RecordId> },

    /// Field value lies in `[min, max]`; a missing bound is unbounded.
    AttributeRange {
        field: String,
        #[serde(default)]
        min: Option<AttributeValue>,
        #[serde(default)]
        max: Option<AttributeValue>,
        #[serde(default = "default_inclusive")]
        min_inclusive: bool,
        #[serde(default = "default_inclusive")]
        max_inclusive: bool,
    },

    /// Field value is one of the given values.
    AttributeIn {
        field: String,
        values: Vec<AttributeValue>,
    },

    /// Record field matches the caller's attribute `caller_field`.
    CallerMatch { field: String, caller_field: String },

    /// All rules must match.
    All { rules: Vec<PolicyRule> },

    /// At least one rule must match.
    Any { rules: Vec<PolicyRule> },

    /// Rule must not match.
    Not { rule: Box<PolicyRule> },
}

impl PolicyRule {
    /// Create an inclusive range rule.
    pub fn range(
        field: impl Into<String>,
        min: impl Into<AttributeValue>,
        max: impl Into<AttributeValue>,
    ) -> Self {
        PolicyRule::AttributeRange {
            field: field.into(),
            min: Some(min.into()),
            max: Some(max.into()),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// Create a rule matching the record field against a caller attribute.
    pub fn caller_match(field: impl Into<String>, caller_field: impl Into<String>) -> Self {
        PolicyRule::CallerMatch {
            field: field.into(),
            caller_field: caller_field.into(),
        }
    }

    /// Create a value-set rule.
    pub fn is_in(field: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        PolicyRule::AttributeIn {
            field: field.into(),
            values,
        }
    }

    /// Bind this rule to a caller, producing a rule that only needs the record.
    pub fn compile(&self, caller: &Attributes) -> CompiledRule {
        match self {
            PolicyRule::AllowList { ids } => CompiledRule::Listed(ids.iter().copied().collect()),
            PolicyRule::DenyList { ids } => {
                CompiledRule::Unlisted(ids.iter().copied().collect())
            }
            PolicyRule::AttributeRange {
                field,
                min,
                max,
                min_inclusive,
                max_inclusive,
            } => CompiledRule::Range {
                field: field.clone(),
                min: min.clone(),
                max: max.clone(),
                min_inclusive: *min_inclusive,
                max_inclusive: *max_inclusive,
            },
            PolicyRule::AttributeIn { field, values } => CompiledRule::In {
                field: field.clone(),
                values: values.clone(),
            },
            // A caller without the attribute can never match: the rule
            // collapses to a constant instead of comparing against Null.
            PolicyRule::CallerMatch {
                field,
                caller_field,
            } => match caller.get(caller_field) {
                Some(value) if !value.is_null() => CompiledRule::Equals {
                    field: field.clone(),
                    value: value.clone(),
                },
                _ => CompiledRule::Never,
            },
            PolicyRule::All { rules } => {
                CompiledRule::All(rules.iter().map(|r| r.compile(caller)).collect())
            }
            PolicyRule::Any { rules } => {
                CompiledRule::Any(rules.iter().map(|r| r.compile(caller)).collect())
            }
            PolicyRule::Not { rule } => CompiledRule::Not(Box::new(rule.compile(caller))),
        }
    }
}

/// A [`PolicyRule`] with caller attributes substituted in.
#[derive(Clone, Debug)]
pub enum CompiledRule {
    Listed(HashSet<RecordId>),
    Unlisted(HashSet<RecordId>),
    Range {
        field: String,
        min: Option<AttributeValue>,
        max: Option<AttributeValue>,
        min_inclusive: bool,
        max_inclusive: bool,
    },
    In {
        field: String,
        values: Vec<AttributeValue>,
    },
    Equals {
        field: String,
        value: AttributeValue,
    },
    All(Vec<CompiledRule>),
    Any(Vec<CompiledRule>),
    Not(Box<CompiledRule>),
    Never,
}

impl CompiledRule {
    /// Evaluate against one record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            CompiledRule::Listed(ids) => ids.contains(&record.id()),
            CompiledRule::Unlisted(ids) => !ids.contains(&record.id()),
            CompiledRule::Range {
                field,
                min,
                max,
                min_inclusive,
                max_inclusive,
            } => record
                .attribute(field)
                .map(|v| {
                    let min_ok = match min {
                        None => true,
                        Some(min) => match v.partial_cmp_value(min) {
                            Some(Ordering::Greater) => true,
                            Some(Ordering::Equal) => *min_inclusive,
                            _ => false,
                        },
                    };
                    let max_ok = match max {
                        None => true,
                        Some(max) => match v.partial_cmp_value(max) {
                            Some(Ordering::Less) => true,
                            Some(Ordering::Equal) => *max_inclusive,
                            _ => false,
                        },
                    };
                    min_ok && max_ok && !v.is_null()
                })
                .unwrap_or(false),
            CompiledRule::In { field, values } => record
                .attribute(field)
                .map(|v| values.iter().any(|candidate| v.matches(candidate)))
                .unwrap_or(false),
            CompiledRule::Equals { field, value } => record
                .attribute(field)
                .map(|v| v.matches(value))
                .unwrap_or(false),
            CompiledRule::All(rules) => rules.iter().all(|r| r.matches(record)),
            CompiledRule::Any(rules) => rules.iter().any(|r| r.matches(record)),
            CompiledRule::Not(rule) => !rule.matches(record),
            CompiledRule::Never => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Vector;

    fn make_record(id: u64) -> Record {
        Record::new(Vector::new(id, vec![0.0]))
            .with_attribute("tenant", "acme")
            .with_attribute("clearance", 3i64)
            .with_attribute("groups", vec!["eng", "ops"])
    }

    fn caller(tenant: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("tenant".into(), tenant.into());
        attrs
    }

    #[test]
    fn test_lists() {
        let r = make_record(7);
        let none = Attributes::new();
        let allow = PolicyRule::AllowList { ids: vec![RecordId(7)] };
        let deny = PolicyRule::DenyList { ids: vec![RecordId(7)] };
        assert!(allow.compile(&none).matches(&r));
        assert!(!deny.compile(&none).matches(&r));
        assert!(deny.compile(&none).matches(&make_record(8)));
    }

    #[test]
    fn test_range() {
        let r = make_record(1);
        let none = Attributes::new();
        assert!(PolicyRule::range("clearance", 1i64, 3i64).compile(&none).matches(&r));
        assert!(!PolicyRule::range("clearance", 4i64, 9i64).compile(&none).matches(&r));

        let exclusive = PolicyRule::AttributeRange {
            field: "clearance".into(),
            min: None,
            max: Some(3i64.into()),
            min_inclusive: true,
            max_inclusive: false,
        };
        assert!(!exclusive.compile(&none).matches(&r));
        assert!(!PolicyRule::range("missing", 0i64, 9i64).compile(&none).matches(&r));
    }

    #[test]
    fn test_caller_match_binds_identity() {
        let r = make_record(1);
        let rule = PolicyRule::caller_match("tenant", "tenant");
        assert!(rule.compile(&caller("acme")).matches(&r));
        assert!(!rule.compile(&caller("globex")).matches(&r));
        assert!(!rule.compile(&Attributes::new()).matches(&r));
    }

    #[test]
    fn test_in_with_array_field() {
        let r = make_record(1);
        let none = Attributes::new();
        assert!(PolicyRule::is_in("groups", vec!["ops".into()]).compile(&none).matches(&r));
        assert!(!PolicyRule::is_in("groups", vec!["hr".into()]).compile(&none).matches(&r));
    }

    #[test]
    fn test_composites() {
        let r = make_record(1);
        let c = caller("acme");
        let rule = PolicyRule::All {
            rules: vec![
                PolicyRule::caller_match("tenant", "tenant"),
                PolicyRule::Not {
                    rule: Box::new(PolicyRule::range("clearance", 5i64, 10i64)),
                },
            ],
        };
        assert!(rule.compile(&c).matches(&r));

        let any = PolicyRule::Any {
            rules: vec![
                PolicyRule::AllowList { ids: vec![] },
                PolicyRule::is_in("tenant", vec!["acme".into()]),
            ],
        };
        assert!(any.compile(&c).matches(&r));
        assert!(!PolicyRule::Any { rules: vec![] }.compile(&c).matches(&r));
        assert!(PolicyRule::All { rules: vec![] }.compile(&c).matches(&r));
    }

    #[test]
    fn test_rule_json_shape() {
        let rule: PolicyRule = serde_json::from_str(
            r#"{"kind": "attribute_range", "field": "clearance", "min": 2}"#,
        )
        .unwrap();
        assert_eq!(
            rule,
            PolicyRule::AttributeRange {
                field: "clearance".into(),
                min: Some(AttributeValue::Integer(2)),
                max: None,
                min_inclusive: true,
                max_inclusive: true,
            }
        );
    }
}
