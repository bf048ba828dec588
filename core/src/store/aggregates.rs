//! Store methods for published aggregate builds.
//!
//! A build is written under its own build id and becomes visible by swapping
//! the single `published_build` pointer in the same transaction. Readers that
//! started before the swap keep reading the old build's rows until they
//! finish; superseded rows are removed in the publishing transaction.

use super::LedgerStore;
use crate::{
    aggregate::{
        AggregateSet, Grain, Measures, NationalMonthlyRow, ProcedureMonthlyRow,
        ProcedureSummaryRow, ProviderMonthlyRow, ProviderProcedureRow, ProviderSummaryRow,
        RegionMonthlyRow,
    },
    error::{PipelineError, PipelineResult},
    types::{BuildId, Period, ProviderId},
};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, OptionalExtension, Row};

const AGGREGATE_TABLES: [&str; 7] = [
    "agg_national_monthly",
    "agg_provider_summary",
    "agg_provider_monthly",
    "agg_provider_procedure",
    "agg_region_monthly",
    "agg_procedure_summary",
    "agg_procedure_monthly",
];

fn period_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Period> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: PipelineError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn measures_at(row: &Row<'_>, first: usize) -> rusqlite::Result<Measures> {
    Ok(Measures {
        claim_count: row.get(first)?,
        paid_cents: row.get(first + 1)?,
        beneficiary_count: row.get(first + 2)?,
    })
}

impl LedgerStore {
    /// Write every grain under `build_id` and make it the published build.
    /// All or nothing: on any error the previous build stays published.
    pub fn publish_aggregates(&self, build_id: &str, set: &AggregateSet) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO aggregate_build (build_id, built_at, fact_paid) VALUES (?1, ?2, ?3)",
            params![build_id, now, set.total_paid(Grain::ProviderMonthly)],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO agg_national_monthly
                 (build_id, period, unique_providers, claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in &set.national_monthly {
                let m = &r.measures;
                stmt.execute(params![
                    build_id, r.period.to_string(), r.unique_providers as i64,
                    m.claim_count, m.paid_cents, m.beneficiary_count,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO agg_provider_summary
                 (build_id, provider_id, first_period, last_period, unique_procedures,
                  claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for r in &set.provider_summary {
                let m = &r.measures;
                stmt.execute(params![
                    build_id, r.provider_id as i64, r.first_period.to_string(),
                    r.last_period.to_string(), r.unique_procedures as i64,
                    m.claim_count, m.paid_cents, m.beneficiary_count,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO agg_provider_monthly
                 (build_id, provider_id, period, claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in &set.provider_monthly {
                let m = &r.measures;
                stmt.execute(params![
                    build_id, r.provider_id as i64, r.period.to_string(),
                    m.claim_count, m.paid_cents, m.beneficiary_count,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO agg_provider_procedure
                 (build_id, provider_id, procedure_code, claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in &set.provider_procedure {
                let m = &r.measures;
                stmt.execute(params![
                    build_id, r.provider_id as i64, r.procedure_code,
                    m.claim_count, m.paid_cents, m.beneficiary_count,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO agg_region_monthly
                 (build_id, region, period, unique_providers, claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in &set.region_monthly {
                let m = &r.measures;
                stmt.execute(params![
                    build_id, r.region, r.period.to_string(), r.unique_providers as i64,
                    m.claim_count, m.paid_cents, m.beneficiary_count,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO agg_procedure_summary
                 (build_id, procedure_code, unique_providers, claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in &set.procedure_summary {
                let m = &r.measures;
                stmt.execute(params![
                    build_id, r.procedure_code, r.unique_providers as i64,
                    m.claim_count, m.paid_cents, m.beneficiary_count,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO agg_procedure_monthly
                 (build_id, procedure_code, period, claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in &set.procedure_monthly {
                let m = &r.measures;
                stmt.execute(params![
                    build_id, r.procedure_code, r.period.to_string(),
                    m.claim_count, m.paid_cents, m.beneficiary_count,
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO published_build (slot, build_id, published_at) VALUES (0, ?1, ?2)
             ON CONFLICT(slot) DO UPDATE SET build_id = excluded.build_id,
                                             published_at = excluded.published_at",
            params![build_id, now],
        )?;

        for table in AGGREGATE_TABLES {
            tx.execute(&format!("DELETE FROM {table} WHERE build_id != ?1"), [build_id])?;
        }
        tx.execute("DELETE FROM aggregate_build WHERE build_id != ?1", [build_id])?;

        tx.commit()?;
        info!("Published aggregate build {build_id}");
        Ok(())
    }

    pub fn published_build_id(&self) -> PipelineResult<Option<BuildId>> {
        if !self.table_exists("published_build")? {
            return Ok(None);
        }
        let id = self
            .conn
            .query_row("SELECT build_id FROM published_build WHERE slot = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    /// Published build id and the time it was written.
    pub fn published_build(&self) -> PipelineResult<Option<(BuildId, DateTime<Utc>)>> {
        if !self.table_exists("published_build")? {
            return Ok(None);
        }
        let row: Option<(BuildId, String)> = self
            .conn
            .query_row(
                "SELECT b.build_id, b.built_at
                 FROM published_build p JOIN aggregate_build b ON b.build_id = p.build_id
                 WHERE p.slot = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(id, built_at)| {
            let built_at = DateTime::parse_from_rfc3339(&built_at)
                .map_err(|e| PipelineError::Other(anyhow::anyhow!("build {id} built_at: {e}")))?;
            Ok((id, built_at.with_timezone(&Utc)))
        })
        .transpose()
    }

    fn require_published(&self) -> PipelineResult<BuildId> {
        self.published_build_id()?.ok_or(PipelineError::AggregatesNotBuilt)
    }

    /// Load the whole published build into memory.
    pub fn load_published_aggregates(&self) -> PipelineResult<AggregateSet> {
        let build_id = self.require_published()?;
        let b = build_id.as_str();

        let national_monthly = self
            .conn
            .prepare(
                "SELECT period, unique_providers, claim_count, paid_cents, beneficiary_count
                 FROM agg_national_monthly WHERE build_id = ?1 ORDER BY period",
            )?
            .query_map([b], |row| {
                Ok(NationalMonthlyRow {
                    period: period_at(row, 0)?,
                    unique_providers: row.get::<_, i64>(1)? as u64,
                    measures: measures_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let provider_summary = self
            .conn
            .prepare(
                "SELECT provider_id, first_period, last_period, unique_procedures,
                        claim_count, paid_cents, beneficiary_count
                 FROM agg_provider_summary WHERE build_id = ?1 ORDER BY provider_id",
            )?
            .query_map([b], |row| {
                Ok(ProviderSummaryRow {
                    provider_id: row.get::<_, i64>(0)? as u64,
                    first_period: period_at(row, 1)?,
                    last_period: period_at(row, 2)?,
                    unique_procedures: row.get::<_, i64>(3)? as u64,
                    measures: measures_at(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let provider_monthly = self
            .conn
            .prepare(
                "SELECT provider_id, period, claim_count, paid_cents, beneficiary_count
                 FROM agg_provider_monthly WHERE build_id = ?1 ORDER BY provider_id, period",
            )?
            .query_map([b], |row| {
                Ok(ProviderMonthlyRow {
                    provider_id: row.get::<_, i64>(0)? as u64,
                    period: period_at(row, 1)?,
                    measures: measures_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let provider_procedure = self
            .conn
            .prepare(
                "SELECT provider_id, procedure_code, claim_count, paid_cents, beneficiary_count
                 FROM agg_provider_procedure WHERE build_id = ?1
                 ORDER BY provider_id, procedure_code",
            )?
            .query_map([b], |row| {
                Ok(ProviderProcedureRow {
                    provider_id: row.get::<_, i64>(0)? as u64,
                    procedure_code: row.get(1)?,
                    measures: measures_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let region_monthly = self
            .conn
            .prepare(
                "SELECT region, period, unique_providers, claim_count, paid_cents, beneficiary_count
                 FROM agg_region_monthly WHERE build_id = ?1 ORDER BY region, period",
            )?
            .query_map([b], |row| {
                Ok(RegionMonthlyRow {
                    region: row.get(0)?,
                    period: period_at(row, 1)?,
                    unique_providers: row.get::<_, i64>(2)? as u64,
                    measures: measures_at(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let procedure_summary = self
            .conn
            .prepare(
                "SELECT procedure_code, unique_providers, claim_count, paid_cents, beneficiary_count
                 FROM agg_procedure_summary WHERE build_id = ?1 ORDER BY procedure_code",
            )?
            .query_map([b], |row| {
                Ok(ProcedureSummaryRow {
                    procedure_code: row.get(0)?,
                    unique_providers: row.get::<_, i64>(1)? as u64,
                    measures: measures_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let procedure_monthly = self
            .conn
            .prepare(
                "SELECT procedure_code, period, claim_count, paid_cents, beneficiary_count
                 FROM agg_procedure_monthly WHERE build_id = ?1 ORDER BY procedure_code, period",
            )?
            .query_map([b], |row| {
                Ok(ProcedureMonthlyRow {
                    procedure_code: row.get(0)?,
                    period: period_at(row, 1)?,
                    measures: measures_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AggregateSet {
            national_monthly,
            provider_summary,
            provider_monthly,
            provider_procedure,
            region_monthly,
            procedure_summary,
            procedure_monthly,
        })
    }

    /// Monthly rows for one provider from the published build.
    pub fn published_provider_monthly(
        &self,
        provider_id: ProviderId,
    ) -> PipelineResult<Vec<ProviderMonthlyRow>> {
        let build_id = self.require_published()?;
        let mut stmt = self.conn.prepare(
            "SELECT provider_id, period, claim_count, paid_cents, beneficiary_count
             FROM agg_provider_monthly WHERE build_id = ?1 AND provider_id = ?2
             ORDER BY period",
        )?;
        let rows = stmt
            .query_map(params![build_id, provider_id as i64], |row| {
                Ok(ProviderMonthlyRow {
                    provider_id: row.get::<_, i64>(0)? as u64,
                    period: period_at(row, 1)?,
                    measures: measures_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// National rows with `from <= period <= to` from the published build.
    pub fn published_national_between(
        &self,
        from: Period,
        to: Period,
    ) -> PipelineResult<Vec<NationalMonthlyRow>> {
        let build_id = self.require_published()?;
        let mut stmt = self.conn.prepare(
            "SELECT period, unique_providers, claim_count, paid_cents, beneficiary_count
             FROM agg_national_monthly
             WHERE build_id = ?1 AND period >= ?2 AND period <= ?3
             ORDER BY period",
        )?;
        let rows = stmt
            .query_map(params![build_id, from.to_string(), to.to_string()], |row| {
                Ok(NationalMonthlyRow {
                    period: period_at(row, 0)?,
                    unique_providers: row.get::<_, i64>(1)? as u64,
                    measures: measures_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
