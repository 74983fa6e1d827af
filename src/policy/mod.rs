//! Row-level security policies and predicate resolution.
//!
//! A [`PolicySet`] holds the policies read from the store. Resolving it for a
//! [`CallerIdentity`] produces a [`Predicate`]: the exact set of records the
//! caller may see, as a bitmap.
//!
//! # Precedence
//!
//! Conflicting policies are combined by the set's [`Precedence`] rule, never by
//! declaration order:
//!
//! | Rule | Record admitted when |
//! |------|----------------------|
//! | `DenyOverrides` | some Allow matches and no Deny matches |
//! | `AllowOverrides` | some Allow matches, or the caller has no Allow policy and no Deny matches |
//! | `Priority` | the matching policy with the highest priority is an Allow |
//! | `Strict` | some Allow matches and no Deny matches; a record matched by both is a conflict |
//!
//! Under `Priority`, two matching policies sharing the top priority with
//! opposite effects are a [`PolicyConflict`](crate::BenchError::PolicyConflict).
//!
//! # Example
//!
//! ```ignore
//! let policies = PolicySet::new(Precedence::DenyOverrides)
//!     .with_policy(SecurityPolicy::allow("tenant_read", "analyst", PolicyRule::caller_match("tenant", "tenant")))
//!     .with_policy(SecurityPolicy::deny("embargo", "analyst", PolicyRule::range("clearance", 5i64, 9i64)));
//!
//! let predicate = resolve(&caller, &policies, &store)?;
//! assert!(predicate.estimated_selectivity() <= 1.0);
//! ```

mod predicate;
mod resolver;
mod rule;

pub use predicate::Predicate;
pub use resolver::{resolve, PredicateCache};
pub use rule::{CompiledRule, PolicyRule};

use crate::store::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};

/// Whether a matching policy grants or removes visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

/// How Allow and Deny policies that match the same record are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    #[default]
    DenyOverrides,
    AllowOverrides,
    Priority,
    Strict,
}

/// A rule bound to a caller role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Unique policy name, used in error messages.
    pub name: String,
    /// Role the policy applies to.
    pub role: String,
    /// Grant or remove visibility.
    pub effect: Effect,
    /// Only consulted under [`Precedence::Priority`]; higher wins.
    #[serde(default)]
    pub priority: u32,
    /// Row test.
    pub rule: PolicyRule,
}

impl SecurityPolicy {
    /// Create an Allow policy.
    pub fn allow(name: impl Into<String>, role: impl Into<String>, rule: PolicyRule) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            effect: Effect::Allow,
            priority: 0,
            rule,
        }
    }

    /// Create a Deny policy.
    pub fn deny(name: impl Into<String>, role: impl Into<String>, rule: PolicyRule) -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow(name, role, rule)
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// The policies of one store, plus the precedence rule combining them.
///
/// `version` identifies the policy definitions for predicate caching; bump it
/// whenever the set changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub precedence: Precedence,
    #[serde(default)]
    pub policies: Vec<SecurityPolicy>,
}

impl PolicySet {
    /// Create an empty set with the given precedence.
    pub fn new(precedence: Precedence) -> Self {
        Self {
            version: 1,
            precedence,
            policies: Vec::new(),
        }
    }

    /// Add a policy.
    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Policies bound to any of the caller's roles, in declaration order.
    pub fn applicable<'a>(&'a self, caller: &CallerIdentity) -> Vec<&'a SecurityPolicy> {
        self.policies
            .iter()
            .filter(|p| caller.roles.iter().any(|role| *role == p.role))
            .collect()
    }
}

/// Who is asking: an id, the roles it acts under, and attributes that
/// `CallerMatch` rules compare against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl CallerIdentity {
    /// Create a caller without roles.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
