//! Deterministic synthetic claims ledger.
//!
//! Produces a realistic-looking population of providers billing common
//! procedures at regional rates, plus a handful of planted anomalies that
//! trip all three risk signals:
//!   - three procedures billed at ~40x the normal per-claim rate
//!   - a ~4x jump in total paid in the final year
//!   - two procedures nobody else in the region bills
//!
//! Same seed, same ledger, byte for byte.

use crate::{
    collaborator::{
        ExclusionList, ExclusionRecord, ExclusionRegistry, IdentityDirectory, ProviderIdentity,
    },
    error::PipelineResult,
    fact::ClaimFact,
    rng::{RngBank, Stream},
    store::LedgerStore,
    types::{dollars_to_cents, Period, ProviderId},
};
use log::info;

const REGIONS: [(&str, &str, f64, f64); 5] = [
    ("CA", "Los Angeles", 34.05, -118.24),
    ("NY", "New York", 40.71, -74.01),
    ("TX", "Houston", 29.76, -95.37),
    ("FL", "Miami", 25.76, -80.19),
    ("OH", "Columbus", 39.96, -83.00),
];

const LAST_NAMES: [&str; 12] = [
    "Alvarez", "Brooks", "Chen", "Delgado", "Edwards", "Fischer",
    "Garcia", "Hughes", "Ibarra", "Jensen", "Kowalski", "Lindqvist",
];

const SPECIALTIES: [&str; 6] = [
    "Family Medicine", "Home Health", "Behavioral Health",
    "Physical Therapy", "Dental Care", "Medical Supply",
];

const SUFFIXES: [&str; 4] = ["LLC", "Group", "Associates", "Clinic"];

pub const PROVIDER_ID_BASE: ProviderId = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub providers: usize,
    pub start_year: i32,
    pub years: i32,
    pub common_procedures: usize,
    pub procedures_per_provider: usize,
    /// Every Nth provider (with a region) is a planted anomaly. 0 disables.
    pub anomaly_every: usize,
    /// Every Nth provider has no region. 0 disables.
    pub unmapped_every: usize,
    /// Every Nth provider is on the exclusion registry. 0 disables.
    pub excluded_every: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            providers: 500,
            start_year: 2019,
            years: 3,
            common_procedures: 40,
            procedures_per_provider: 8,
            anomaly_every: 47,
            unmapped_every: 97,
            excluded_every: 40,
        }
    }
}

pub struct SyntheticLedger {
    pub facts: Vec<ClaimFact>,
    pub identities: IdentityDirectory,
    pub exclusions: ExclusionList,
    /// Providers carrying planted anomalies, ascending.
    pub planted: Vec<ProviderId>,
}

fn procedure_code(k: usize) -> String {
    format!("{}", 99_000 + k)
}

/// Normal per-claim rate in dollars for common procedure `k`.
fn base_rate(k: usize) -> f64 {
    20.0 + ((k * 37) % 180) as f64
}

pub fn generate(config: &SyntheticConfig) -> SyntheticLedger {
    let bank = RngBank::new(config.seed);
    let mut provider_rng = bank.stream(Stream::Providers);
    let mut claim_rng = bank.stream(Stream::Claims);
    let mut anomaly_rng = bank.stream(Stream::Anomalies);
    let mut exclusion_rng = bank.stream(Stream::Exclusions);

    let mut periods = Vec::new();
    for year in config.start_year..config.start_year + config.years {
        for month in 1..=12 {
            periods.push(Period { year, month });
        }
    }
    let final_year = config.start_year + config.years - 1;

    let mut facts = Vec::new();
    let mut identities = IdentityDirectory::default();
    let mut exclusions = ExclusionList::default();
    let mut planted = Vec::new();

    for i in 0..config.providers {
        let provider_id = PROVIDER_ID_BASE + i as u64;
        let unmapped =
            config.unmapped_every > 0 && i % config.unmapped_every == config.unmapped_every - 1;
        let region = (!unmapped).then(|| REGIONS[i % REGIONS.len()]);
        let is_planted =
            region.is_some() && config.anomaly_every > 0 && i % config.anomaly_every == 0;

        let name = (i % 31 != 30).then(|| {
            format!(
                "{} {} {}",
                LAST_NAMES[provider_rng.next_u64_below(LAST_NAMES.len() as u64) as usize],
                SPECIALTIES[provider_rng.next_u64_below(SPECIALTIES.len() as u64) as usize],
                SUFFIXES[provider_rng.next_u64_below(SUFFIXES.len() as u64) as usize],
            )
        });
        identities.insert(
            provider_id,
            ProviderIdentity {
                name,
                region: region.map(|r| r.0.to_string()),
                city: region.map(|r| r.1.to_string()),
                latitude: region.map(|r| r.2 + provider_rng.range_f64(-0.5, 0.5)),
                longitude: region.map(|r| r.3 + provider_rng.range_f64(-0.5, 0.5)),
            },
        );

        let procedures = provider_rng
            .sample_indices(config.common_procedures, config.procedures_per_provider);
        let outlier_procedures: &[usize] = if is_planted {
            &procedures[..procedures.len().min(3)]
        } else {
            &[]
        };

        for period in &periods {
            let growth = if is_planted && period.year == final_year { 4.0 } else { 1.0 };
            for &k in &procedures {
                if !claim_rng.chance(0.75) {
                    continue;
                }
                let (claims, price) = if outlier_procedures.contains(&k) {
                    (claim_rng.range_i64(10, 14), base_rate(k) * 40.0)
                } else {
                    (claim_rng.range_i64(20, 60), base_rate(k) * claim_rng.range_f64(0.85, 1.15))
                };
                facts.push(ClaimFact {
                    provider_id,
                    procedure_code: procedure_code(k),
                    period: *period,
                    claim_count: claims,
                    paid_cents: dollars_to_cents(claims as f64 * price * growth),
                    beneficiary_count: (claims * 3 / 5).max(1),
                });
            }

            if is_planted {
                for rare in ["A", "B"] {
                    let claims = anomaly_rng.range_i64(6, 12);
                    facts.push(ClaimFact {
                        provider_id,
                        procedure_code: format!("R{i:04}{rare}"),
                        period: *period,
                        claim_count: claims,
                        paid_cents: dollars_to_cents(claims as f64 * 150.0 * growth),
                        beneficiary_count: (claims / 2).max(1),
                    });
                }
            }
        }

        if is_planted {
            planted.push(provider_id);
        }
        if config.excluded_every > 0 && i % config.excluded_every == 3 {
            exclusions.insert(
                provider_id,
                ExclusionRecord {
                    exclusion_type: "1128a1".to_string(),
                    excluded_on: Some(format!(
                        "{}-{:02}-15",
                        config.start_year - 1,
                        exclusion_rng.range_i64(1, 12)
                    )),
                    reinstated_on: None,
                },
            );
        }
    }

    // One registry entry for a provider with no billing at all.
    if config.excluded_every > 0 {
        exclusions.insert(
            PROVIDER_ID_BASE - 1,
            ExclusionRecord {
                exclusion_type: "1128b4".to_string(),
                excluded_on: Some(format!("{}-06-30", config.start_year - 2)),
                reinstated_on: None,
            },
        );
    }

    info!(
        "Generated {} facts for {} providers ({} planted anomalies)",
        facts.len(),
        config.providers,
        planted.len()
    );
    SyntheticLedger { facts, identities, exclusions, planted }
}

impl SyntheticLedger {
    /// Write facts, identities and (if any) the exclusion registry.
    pub fn load_into(&self, store: &LedgerStore) -> PipelineResult<()> {
        store.insert_facts(&self.facts)?;
        for (id, identity) in self.identities.iter() {
            store.upsert_identity(*id, identity)?;
        }
        let excluded = self.exclusions.all_excluded()?;
        if !excluded.is_empty() {
            store.create_exclusion_registry()?;
            for (id, record) in &excluded {
                store.insert_exclusion(*id, record)?;
            }
        }
        Ok(())
    }
}
