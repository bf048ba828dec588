//! Store methods for the raw claims ledger.

use super::LedgerStore;
use crate::{
    error::{PipelineError, PipelineResult},
    fact::{ClaimFact, FactSource},
    types::Period,
};
use log::debug;
use rusqlite::params;

impl LedgerStore {
    /// Append facts in one transaction.
    pub fn insert_facts(&self, facts: &[ClaimFact]) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO claim_fact
                    (provider_id, procedure_code, period, claim_count, paid_cents, beneficiary_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for f in facts {
                stmt.execute(params![
                    f.provider_id as i64,
                    f.procedure_code,
                    f.period.to_string(),
                    f.claim_count,
                    f.paid_cents,
                    f.beneficiary_count,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Inserted {} claim facts", facts.len());
        Ok(())
    }

    pub fn fact_count(&self) -> PipelineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM claim_fact", [], |row| row.get(0))?;
        Ok(count)
    }

    /// A partitioned, read-only scanner over this store's `claim_fact` table.
    ///
    /// Partitions are contiguous rowid ranges fixed here, so each partition
    /// is a primary-key range search and the table is read once in total.
    /// Facts appended after this call are not seen by the returned source.
    pub fn fact_source(&self, partitions: usize) -> PipelineResult<SqliteFactSource> {
        let path = self.path.clone().ok_or_else(|| {
            PipelineError::FactStore(
                "a private in-memory store cannot be scanned from other connections".into(),
            )
        })?;
        let (min, max): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT MIN(rowid), MAX(rowid) FROM claim_fact",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let ranges = match (min, max) {
            (Some(min), Some(max)) => rowid_ranges(min, max, partitions.max(1)),
            _ => Vec::new(),
        };
        debug!("Fact source: {} rowid range(s)", ranges.len());
        Ok(SqliteFactSource { path, ranges })
    }
}

/// Split `[min, max]` into `n` half-open `(lo, hi]` ranges of near-equal width.
fn rowid_ranges(min: i64, max: i64, n: usize) -> Vec<(i64, i64)> {
    let lo = i128::from(min) - 1;
    let span = i128::from(max) - lo;
    let n = n as i128;
    (0..n)
        .map(|p| {
            let start = lo + span * p / n;
            let end = lo + span * (p + 1) / n;
            (start as i64, end as i64)
        })
        .filter(|(start, end)| start < end)
        .collect()
}

const SCAN_SQL: &str =
    "SELECT provider_id, procedure_code, period, claim_count, paid_cents, beneficiary_count
     FROM claim_fact WHERE rowid > ?1 AND rowid <= ?2";

pub struct SqliteFactSource {
    path: String,
    ranges: Vec<(i64, i64)>,
}

impl FactSource for SqliteFactSource {
    fn partitions(&self) -> usize {
        self.ranges.len()
    }

    fn scan_partition(
        &self,
        partition: usize,
        visit: &mut dyn FnMut(&ClaimFact),
    ) -> PipelineResult<()> {
        let Some(&(lo, hi)) = self.ranges.get(partition) else {
            return Err(PipelineError::FactStore(format!(
                "partition {partition} out of range ({} partitions)",
                self.ranges.len()
            )));
        };
        let store = LedgerStore::open(&self.path)
            .map_err(|e| PipelineError::FactStore(format!("cannot open {}: {e}", self.path)))?;
        let mut stmt = store.conn.prepare(SCAN_SQL)?;
        let mut rows = stmt.query(params![lo, hi])?;
        while let Some(row) = rows.next()? {
            let period: String = row.get(2)?;
            let period: Period = period
                .parse()
                .map_err(|e| PipelineError::FactStore(format!("bad fact row: {e}")))?;
            let fact = ClaimFact {
                provider_id: row.get::<_, i64>(0)? as u64,
                procedure_code: row.get(1)?,
                period,
                claim_count: row.get(3)?,
                paid_cents: row.get(4)?,
                beneficiary_count: row.get(5)?,
            };
            visit(&fact);
        }
        Ok(())
    }
}
