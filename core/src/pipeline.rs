//! One batch run: scan → aggregate → extract signals → publish.
//!
//! RULES:
//!   - Capabilities are resolved once, up front, and passed down.
//!   - Nothing is published until every grain and signal is built.
//!   - A failed run leaves the previously published snapshot in place.

use crate::{
    aggregate::build_aggregates,
    collaborator::RegionMap,
    config::PipelineConfig,
    error::PipelineResult,
    fact::FactSource,
    signals::extract_signals,
    snapshot::{Snapshot, SnapshotCell},
    store::LedgerStore,
};
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Optional collaborators detected for this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub exclusion_registry: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub capabilities: Capabilities,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig, capabilities: Capabilities) -> Self {
        Self { config, capabilities }
    }

    /// Detect capabilities against `store`.
    pub fn resolve(config: PipelineConfig, store: &LedgerStore) -> PipelineResult<Self> {
        config.validate()?;
        let exclusion_registry = store.has_exclusion_registry()?;
        if !exclusion_registry {
            warn!("Exclusion registry not loaded; all providers treated as not excluded");
        }
        Ok(Self::new(config, Capabilities { exclusion_registry }))
    }
}

/// Build a complete snapshot in memory. Does not publish anything.
pub fn build_snapshot(
    ctx: &PipelineContext,
    source: &dyn FactSource,
    regions: RegionMap,
) -> PipelineResult<Snapshot> {
    let t0 = Instant::now();
    let build_id = uuid::Uuid::new_v4().to_string();
    info!("Starting build {build_id}");

    let aggregates = build_aggregates(source, &regions)?;
    let signals = extract_signals(&aggregates, &regions, &ctx.config);

    info!("Build {build_id} complete in {:.1}s", t0.elapsed().as_secs_f64());
    Ok(Snapshot {
        build_id,
        built_at: chrono::Utc::now(),
        aggregates,
        regions,
        signals,
    })
}

/// Full run against a SQLite ledger: build from its facts, persist the new
/// build, then publish it to `cell`.
pub fn run(
    ctx: &PipelineContext,
    store: &LedgerStore,
    cell: &SnapshotCell,
) -> PipelineResult<Arc<Snapshot>> {
    let regions = store.load_region_map()?;
    info!("Loaded regions for {} providers", regions.len());
    let source = store.fact_source(ctx.config.aggregation.partitions)?;

    let snapshot = build_snapshot(ctx, &source, regions)?;
    store.publish_aggregates(&snapshot.build_id, &snapshot.aggregates)?;
    Ok(cell.publish(snapshot))
}

/// Rebuild the in-memory snapshot from the build already published in
/// `store`, e.g. after a restart. Signals are recomputed from the stored
/// aggregates. Returns `None` when nothing has been published yet.
pub fn restore(
    ctx: &PipelineContext,
    store: &LedgerStore,
    cell: &SnapshotCell,
) -> PipelineResult<Option<Arc<Snapshot>>> {
    let Some((build_id, built_at)) = store.published_build()? else {
        info!("No published build to restore");
        return Ok(None);
    };
    let aggregates = store.load_published_aggregates()?;
    let regions = store.load_region_map()?;
    let signals = extract_signals(&aggregates, &regions, &ctx.config);
    info!("Restored build {build_id} from the ledger store");
    Ok(Some(cell.publish(Snapshot {
        build_id,
        built_at,
        aggregates,
        regions,
        signals,
    })))
}
