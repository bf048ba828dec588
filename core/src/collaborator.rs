//! External collaborators: geography, identity, and the exclusion registry.
//!
//! Each collaborator returns `PipelineResult<Option<T>>`. `Ok(None)` is a
//! lookup miss; `Err` means the collaborator itself failed. Callers in the
//! scoring path degrade both to defaults and keep going.

use crate::{
    error::PipelineResult,
    types::{ProviderId, RegionCode},
};
use log::warn;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Provider → region. Used by the regional grain and the region-scoped signals.
pub trait RegionLookup: Sync {
    fn lookup_region(&self, provider_id: ProviderId) -> Option<&RegionCode>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub name: Option<String>,
    pub region: Option<RegionCode>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub trait IdentityLookup {
    fn lookup(&self, provider_id: ProviderId) -> PipelineResult<Option<ProviderIdentity>>;

    /// Providers whose name contains `needle`, ignoring ASCII case.
    fn search_names(&self, needle: &str) -> PipelineResult<Vec<ProviderId>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionRecord {
    pub exclusion_type: String,
    pub excluded_on: Option<String>,
    pub reinstated_on: Option<String>,
}

pub trait ExclusionRegistry {
    fn contains(&self, provider_id: ProviderId) -> PipelineResult<Option<ExclusionRecord>>;

    /// Every provider on the registry, in ascending id order.
    fn all_excluded(&self) -> PipelineResult<Vec<(ProviderId, ExclusionRecord)>>;
}

/// Exclusion status as surfaced to readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusionStatus {
    pub excluded: bool,
    pub exclusion_type: Option<String>,
    pub excluded_on: Option<String>,
    pub reinstated_on: Option<String>,
}

impl From<ExclusionRecord> for ExclusionStatus {
    fn from(r: ExclusionRecord) -> Self {
        Self {
            excluded: true,
            exclusion_type: Some(r.exclusion_type),
            excluded_on: r.excluded_on,
            reinstated_on: r.reinstated_on,
        }
    }
}

/// Name and location as shown next to a provider in listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayIdentity {
    pub name: String,
    pub region: String,
    pub city: String,
}

/// Best-effort identity for display. Misses and lookup failures fall back
/// to "Unknown" with empty location fields.
pub fn display_identity(lookup: &dyn IdentityLookup, provider_id: ProviderId) -> DisplayIdentity {
    let identity = lookup.lookup(provider_id).unwrap_or_else(|e| {
        warn!("Identity lookup failed for provider {provider_id}: {e}");
        None
    });
    match identity {
        Some(i) => DisplayIdentity {
            name: i.name.unwrap_or_else(|| "Unknown".to_string()),
            region: i.region.unwrap_or_default(),
            city: i.city.unwrap_or_default(),
        },
        None => DisplayIdentity {
            name: "Unknown".to_string(),
            region: String::new(),
            city: String::new(),
        },
    }
}

/// In-memory provider → region map, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: FxHashMap<ProviderId, RegionCode>,
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider_id: ProviderId, region: impl Into<RegionCode>) {
        self.regions.insert(provider_id, region.into());
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl FromIterator<(ProviderId, RegionCode)> for RegionMap {
    fn from_iter<I: IntoIterator<Item = (ProviderId, RegionCode)>>(iter: I) -> Self {
        Self { regions: iter.into_iter().collect() }
    }
}

impl RegionLookup for RegionMap {
    fn lookup_region(&self, provider_id: ProviderId) -> Option<&RegionCode> {
        self.regions.get(&provider_id)
    }
}

/// In-memory identity directory.
#[derive(Debug, Clone, Default)]
pub struct IdentityDirectory {
    entries: FxHashMap<ProviderId, ProviderIdentity>,
}

impl IdentityDirectory {
    pub fn insert(&mut self, provider_id: ProviderId, identity: ProviderIdentity) {
        self.entries.insert(provider_id, identity);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProviderId, &ProviderIdentity)> {
        self.entries.iter()
    }

    /// Region map derived from the directory's region fields.
    pub fn region_map(&self) -> RegionMap {
        self.entries
            .iter()
            .filter_map(|(id, ident)| ident.region.clone().map(|r| (*id, r)))
            .collect()
    }
}

impl IdentityLookup for IdentityDirectory {
    fn lookup(&self, provider_id: ProviderId) -> PipelineResult<Option<ProviderIdentity>> {
        Ok(self.entries.get(&provider_id).cloned())
    }

    fn search_names(&self, needle: &str) -> PipelineResult<Vec<ProviderId>> {
        let needle = needle.to_ascii_lowercase();
        let mut ids: Vec<ProviderId> = self
            .entries
            .iter()
            .filter(|(_, i)| {
                i.name.as_ref().is_some_and(|n| n.to_ascii_lowercase().contains(&needle))
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// In-memory exclusion registry.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    entries: FxHashMap<ProviderId, ExclusionRecord>,
}

impl ExclusionList {
    pub fn insert(&mut self, provider_id: ProviderId, record: ExclusionRecord) {
        self.entries.insert(provider_id, record);
    }
}

impl ExclusionRegistry for ExclusionList {
    fn contains(&self, provider_id: ProviderId) -> PipelineResult<Option<ExclusionRecord>> {
        Ok(self.entries.get(&provider_id).cloned())
    }

    fn all_excluded(&self) -> PipelineResult<Vec<(ProviderId, ExclusionRecord)>> {
        let mut all: Vec<_> = self.entries.iter().map(|(id, r)| (*id, r.clone())).collect();
        all.sort_by_key(|(id, _)| *id);
        Ok(all)
    }
}
