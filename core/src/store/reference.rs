//! Store methods for provider identity and the optional exclusion registry.

use super::LedgerStore;
use crate::{
    collaborator::{
        ExclusionRecord, ExclusionRegistry, IdentityLookup, ProviderIdentity, RegionMap,
    },
    error::PipelineResult,
    types::ProviderId,
};
use rusqlite::{params, OptionalExtension};

impl LedgerStore {
    // ── Identity ───────────────────────────────────────────────

    pub fn upsert_identity(
        &self,
        provider_id: ProviderId,
        identity: &ProviderIdentity,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO provider_identity
                (provider_id, name, region, city, latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                provider_id as i64,
                identity.name,
                identity.region,
                identity.city,
                identity.latitude,
                identity.longitude,
            ],
        )?;
        Ok(())
    }

    /// Provider → region for every identity with a non-empty region.
    pub fn load_region_map(&self) -> PipelineResult<RegionMap> {
        let mut stmt = self.conn.prepare(
            "SELECT provider_id, region FROM provider_identity
             WHERE region IS NOT NULL AND region != ''",
        )?;
        let map = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)))?
            .collect::<Result<RegionMap, _>>()?;
        Ok(map)
    }

    // ── Exclusion registry (optional) ──────────────────────────

    /// True when exclusion data has been loaded into this database.
    pub fn has_exclusion_registry(&self) -> PipelineResult<bool> {
        self.table_exists("exclusion")
    }

    pub fn create_exclusion_registry(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/exclusion_registry.sql"))?;
        Ok(())
    }

    pub fn insert_exclusion(
        &self,
        provider_id: ProviderId,
        record: &ExclusionRecord,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO exclusion
                (provider_id, exclusion_type, excluded_on, reinstated_on)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                provider_id as i64,
                record.exclusion_type,
                record.excluded_on,
                record.reinstated_on,
            ],
        )?;
        Ok(())
    }
}

impl IdentityLookup for LedgerStore {
    fn lookup(&self, provider_id: ProviderId) -> PipelineResult<Option<ProviderIdentity>> {
        let identity = self
            .conn
            .query_row(
                "SELECT name, region, city, latitude, longitude
                 FROM provider_identity WHERE provider_id = ?1",
                [provider_id as i64],
                |row| {
                    Ok(ProviderIdentity {
                        name: row.get(0)?,
                        region: row.get(1)?,
                        city: row.get(2)?,
                        latitude: row.get(3)?,
                        longitude: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(identity)
    }

    fn search_names(&self, needle: &str) -> PipelineResult<Vec<ProviderId>> {
        let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let mut stmt = self.conn.prepare(
            "SELECT provider_id FROM provider_identity
             WHERE name LIKE '%' || ?1 || '%' ESCAPE '\\'
             ORDER BY provider_id",
        )?;
        let ids = stmt
            .query_map([escaped], |row| Ok(row.get::<_, i64>(0)? as u64))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

impl ExclusionRegistry for LedgerStore {
    fn contains(&self, provider_id: ProviderId) -> PipelineResult<Option<ExclusionRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT exclusion_type, excluded_on, reinstated_on
                 FROM exclusion WHERE provider_id = ?1",
                [provider_id as i64],
                |row| {
                    Ok(ExclusionRecord {
                        exclusion_type: row.get(0)?,
                        excluded_on: row.get(1)?,
                        reinstated_on: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn all_excluded(&self) -> PipelineResult<Vec<(ProviderId, ExclusionRecord)>> {
        let mut stmt = self.conn.prepare(
            "SELECT provider_id, exclusion_type, excluded_on, reinstated_on
             FROM exclusion ORDER BY provider_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    ExclusionRecord {
                        exclusion_type: row.get(1)?,
                        excluded_on: row.get(2)?,
                        reinstated_on: row.get(3)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
