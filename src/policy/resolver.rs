//! Resolution of a policy set into a materialized predicate.

use super::predicate::Predicate;
use super::rule::CompiledRule;
use super::{CallerIdentity, Effect, PolicySet, Precedence};
use crate::error::{BenchError, Result};
use crate::store::{Record, RecordStore};
use parking_lot::Mutex;
use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A policy bound to one caller.
struct BoundPolicy<'a> {
    name: &'a str,
    effect: Effect,
    priority: u32,
    rule: CompiledRule,
}

/// Resolve `policies` for `caller` over every record in `store`.
///
/// Records are visited in id order, so a conflict always reports the lowest
/// conflicting record id.
///
/// # Errors
///
/// `UnauthorizedCaller` when no policy is bound to the caller's roles;
/// `PolicyConflict` when the precedence rule cannot decide a record.
pub fn resolve(
    caller: &CallerIdentity,
    policies: &PolicySet,
    store: &dyn RecordStore,
) -> Result<Predicate> {
    let applicable = policies.applicable(caller);
    if applicable.is_empty() {
        return Err(BenchError::UnauthorizedCaller {
            caller: caller.id.clone(),
            roles: caller.roles.clone(),
        });
    }

    let bound: Vec<BoundPolicy<'_>> = applicable
        .iter()
        .map(|p| BoundPolicy {
            name: &p.name,
            effect: p.effect,
            priority: p.priority,
            rule: p.rule.compile(&caller.attributes),
        })
        .collect();
    let has_allow = bound.iter().any(|p| p.effect == Effect::Allow);

    let mut admitted = RoaringTreemap::new();
    for record in store.records() {
        if admits(&bound, has_allow, policies.precedence, record).inspect_err(|err| {
            warn!(
                caller = %caller.id,
                policy_version = policies.version,
                precedence = ?policies.precedence,
                error = %err,
                "policy resolution failed"
            );
        })? {
            admitted.insert(record.id().as_u64());
        }
    }

    let predicate = Predicate::new(admitted, store.len() as u64);
    debug!(
        caller = %caller.id,
        policies = bound.len(),
        admitted = predicate.matching_count(),
        selectivity = predicate.estimated_selectivity(),
        "resolved predicate"
    );
    Ok(predicate)
}

fn admits(
    bound: &[BoundPolicy<'_>],
    has_allow: bool,
    precedence: Precedence,
    record: &Record,
) -> Result<bool> {
    let (allow, deny) = match precedence {
        Precedence::Priority => top_priority_matches(bound, record),
        _ => first_matches(bound.iter(), record),
    };

    match precedence {
        Precedence::DenyOverrides => Ok(allow.is_some() && deny.is_none()),
        Precedence::AllowOverrides => Ok(allow.is_some() || (!has_allow && deny.is_none())),
        Precedence::Priority | Precedence::Strict => match (allow, deny) {
            (Some(allow), Some(deny)) => Err(conflict(allow, deny, record)),
            (allow, _) => Ok(allow.is_some()),
        },
    }
}

type Matches<'p, 'a> = (Option<&'p BoundPolicy<'a>>, Option<&'p BoundPolicy<'a>>);

/// First matching Allow and first matching Deny policy.
fn first_matches<'p, 'a: 'p>(
    policies: impl Iterator<Item = &'p BoundPolicy<'a>>,
    record: &Record,
) -> Matches<'p, 'a> {
    let mut allow = None;
    let mut deny = None;
    for policy in policies.filter(|p| p.rule.matches(record)) {
        match policy.effect {
            Effect::Allow => allow = allow.or(Some(policy)),
            Effect::Deny => deny = deny.or(Some(policy)),
        }
    }
    (allow, deny)
}

/// Like [`first_matches`], restricted to the highest priority that matches.
fn top_priority_matches<'p, 'a>(bound: &'p [BoundPolicy<'a>], record: &Record) -> Matches<'p, 'a> {
    let top = bound
        .iter()
        .filter(|p| p.rule.matches(record))
        .map(|p| p.priority)
        .max();
    match top {
        Some(top) => first_matches(bound.iter().filter(|p| p.priority == top), record),
        None => (None, None),
    }
}

fn conflict(allow: &BoundPolicy<'_>, deny: &BoundPolicy<'_>, record: &Record) -> BenchError {
    BenchError::PolicyConflict {
        first: allow.name.to_string(),
        second: deny.name.to_string(),
        record: record.id(),
    }
}

/// Cache of resolved predicates keyed by (caller id, policy-set version).
///
/// Resolution is deterministic, so a cached predicate is always identical to
/// a fresh one as long as the policy version is unchanged.
#[derive(Default)]
pub struct PredicateCache {
    entries: Mutex<HashMap<(String, u64), Arc<Predicate>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PredicateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached predicate or resolve and cache it.
    ///
    /// Errors are not cached; the next call retries resolution.
    pub fn get_or_resolve(
        &self,
        caller: &CallerIdentity,
        policies: &PolicySet,
        store: &dyn RecordStore,
    ) -> Result<Arc<Predicate>> {
        let key = (caller.id.clone(), policies.version);
        if let Some(hit) = self.entries.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(hit));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let predicate = Arc::new(resolve(caller, policies, store)?);
        self.entries
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::clone(&predicate));
        Ok(predicate)
    }

    /// Number of cache hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every cached predicate.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
