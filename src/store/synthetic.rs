//! Seeded synthetic data set: uniform vectors, tenant / clearance / region
//! attributes, and a matching policy set.

use super::{InMemoryStore, Record};
use crate::constants::workload;
use crate::error::{BenchError, Result};
use crate::policy::{CallerIdentity, PolicyRule, PolicySet, Precedence, SecurityPolicy};
use crate::vector::Vector;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Regions used for the `region` attribute.
pub const REGIONS: [&str; 3] = ["eu", "us", "apac"];

/// Role bound to the tenant-isolation policy.
pub const ANALYST_ROLE: &str = "analyst";

/// Role that sees every tenant below the embargo clearance.
pub const AUDITOR_ROLE: &str = "auditor";

/// Clearance level at and above which records are embargoed for auditors.
pub const EMBARGO_CLEARANCE: i64 = 4;

/// Shape of a generated data set.
///
/// Record `i` belongs to tenant `i % tenants`, so one analyst is admitted to
/// exactly `1 / tenants` of the records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSpec {
    pub records: usize,
    pub dimension: usize,
    pub tenants: usize,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            records: workload::DEFAULT_RECORDS,
            dimension: workload::DEFAULT_DIMENSION,
            tenants: workload::DEFAULT_TENANTS,
            seed: workload::DEFAULT_SEED,
        }
    }
}

impl SyntheticSpec {
    /// Tenant name for tenant index `t`.
    pub fn tenant_name(t: usize) -> String {
        format!("tenant-{}", t)
    }

    /// Generate the store with the built-in [`policies`](Self::policies).
    ///
    /// # Errors
    ///
    /// `InvalidParameter` when records, dimension or tenants is zero.
    pub fn build(&self) -> Result<InMemoryStore> {
        self.build_with(Self::policies())
    }

    /// Generate the store guarded by `policies` instead of the built-in set.
    pub fn build_with(&self, policies: PolicySet) -> Result<InMemoryStore> {
        if self.records == 0 || self.dimension == 0 || self.tenants == 0 {
            return Err(BenchError::invalid_parameter(
                "synthetic data set needs records, dimension and tenants > 0",
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let records = (0..self.records as u64)
            .map(|i| {
                let vector = Vector::random(&mut rng, i, self.dimension);
                let clearance: i64 = rng.gen_range(0..6);
                let region = REGIONS.choose(&mut rng).copied().unwrap_or("eu");
                Record::new(vector)
                    .with_attribute("tenant", Self::tenant_name(i as usize % self.tenants))
                    .with_attribute("clearance", clearance)
                    .with_attribute("region", region)
            })
            .collect();

        InMemoryStore::new(records, policies)
    }

    /// Policies shipped with the synthetic store.
    ///
    /// - analysts see their own tenant;
    /// - auditors see everything except embargoed clearance levels.
    pub fn policies() -> PolicySet {
        PolicySet::new(Precedence::DenyOverrides)
            .with_policy(SecurityPolicy::allow(
                "tenant_isolation",
                ANALYST_ROLE,
                PolicyRule::caller_match("tenant", "tenant"),
            ))
            .with_policy(SecurityPolicy::allow(
                "audit_read",
                AUDITOR_ROLE,
                PolicyRule::All { rules: vec![] },
            ))
            .with_policy(SecurityPolicy::deny(
                "audit_embargo",
                AUDITOR_ROLE,
                PolicyRule::AttributeRange {
                    field: "clearance".into(),
                    min: Some(EMBARGO_CLEARANCE.into()),
                    max: None,
                    min_inclusive: true,
                    max_inclusive: true,
                },
            ))
    }

    /// One analyst per tenant.
    pub fn analysts(&self) -> Vec<CallerIdentity> {
        (0..self.tenants)
            .map(|t| {
                CallerIdentity::new(format!("analyst-{}", t))
                    .with_role(ANALYST_ROLE)
                    .with_attribute("tenant", Self::tenant_name(t))
            })
            .collect()
    }

    /// The auditor caller.
    pub fn auditor() -> CallerIdentity {
        CallerIdentity::new("auditor").with_role(AUDITOR_ROLE)
    }

    /// A caller no policy applies to.
    pub fn guest() -> CallerIdentity {
        CallerIdentity::new("guest").with_role("guest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::resolve;
    use crate::store::RecordStore;

    #[test]
    fn test_generate_store() {
        let spec = SyntheticSpec {
            records: 200,
            dimension: 8,
            tenants: 4,
            seed: 7,
        };
        let store = spec.build().unwrap();
        assert_eq!(store.len(), 200);
        assert_eq!(store.dimension(), 8);

        let again = spec.build().unwrap();
        assert_eq!(&*store.records()[17].vector.data, &*again.records()[17].vector.data);
    }

    #[test]
    fn test_analyst_sees_one_tenant() {
        let spec = SyntheticSpec {
            records: 1000,
            ..SyntheticSpec::default()
        };
        let store = spec.build().unwrap();
        let analyst = &spec.analysts()[1];
        let p = resolve(analyst, store.policies(), &store).unwrap();
        assert_eq!(p.matching_count(), 250);
        assert!((p.estimated_selectivity() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_auditor_and_guest() {
        let spec = SyntheticSpec::default();
        let store = spec.build().unwrap();

        let p = resolve(&SyntheticSpec::auditor(), store.policies(), &store).unwrap();
        let embargoed = store
            .records()
            .iter()
            .filter(|r| r.attribute("clearance").and_then(|v| v.partial_cmp_value(&EMBARGO_CLEARANCE.into()))
                != Some(std::cmp::Ordering::Less))
            .count() as u64;
        assert_eq!(p.matching_count(), store.len() as u64 - embargoed);

        assert!(resolve(&SyntheticSpec::guest(), store.policies(), &store).is_err());
    }

    #[test]
    fn test_rejects_empty_spec() {
        let spec = SyntheticSpec {
            records: 0,
            ..SyntheticSpec::default()
        };
        assert!(spec.build().is_err());
    }
}
