//! Build orchestration.
//!
//! Sources are claimed one at a time from the progress table (`pending -> claimed`
//! in a single write-locked statement), processed, and committed together with their
//! done-marker. Each worker owns its own connection and block cache. Reclassification
//! and indexing run only after every worker has returned and no source is outstanding.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::BuildConfig;
use crate::cost::CostAggregator;
use crate::db::open::DbOpenConfig;
use crate::db::queries::{CLAIM_NEXT, RELEASE_CLAIM};
use crate::db::{schema, Database};
use crate::error::{Error, Result};
use crate::index::{build_indexes, IndexReport};
use crate::models::{BlockConnection, BlockId};
use crate::neighbors::{BlockCache, NeighborFinder};
use crate::reclassify::{reclassify, StressRule};
use crate::selector::select_candidates;
use crate::writer::commit_source;

/// Atomically move the next pending source to `claimed` for `worker`.
pub fn claim_next(db: &mut Database, worker: &str, now: i64) -> Result<Option<BlockId>> {
    db.transaction(|tx| Ok(tx.query_row(CLAIM_NEXT, params![worker, now], |r| r.get(0)).optional()?))
}

/// Return a claimed source to `pending` after a failed attempt.
pub fn release_claim(db: &mut Database, worker: &str, source: &str) -> Result<bool> {
    db.transaction(|tx| Ok(tx.execute(RELEASE_CLAIM, params![source, worker])? == 1))
}

/// Outcome of one committed source, reported to the progress callback.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceOutcome {
    pub source: BlockId,
    pub rows: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub sources: usize,
    pub rows: usize,
    pub zero_target_sources: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl WorkerStats {
    fn merge(&mut self, o: &WorkerStats) {
        self.sources += o.sources;
        self.rows += o.rows;
        self.zero_target_sources += o.zero_target_sources;
        self.cache_hits += o.cache_hits;
        self.cache_misses += o.cache_misses;
    }
}

/// Shared, read-only settings plus the run-wide stop signals.
pub struct WorkerContext<'a> {
    pub finder: NeighborFinder,
    pub costs: CostAggregator,
    pub cache_capacity: usize,
    /// Set externally to stop claiming; in-flight sources still commit.
    pub cancel: &'a AtomicBool,
    /// Set by a failing worker so the others stop claiming.
    pub failed: &'a AtomicBool,
    /// Remaining source budget when the run is limited.
    pub budget: Option<&'a AtomicUsize>,
    pub on_commit: &'a (dyn Fn(&SourceOutcome) + Sync),
}

impl WorkerContext<'_> {
    fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.failed.load(Ordering::SeqCst)
    }

    fn take_budget(&self) -> bool {
        match self.budget {
            None => true,
            Some(b) => b.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1)).is_ok(),
        }
    }
}

/// Neighbors and costs for one source, shaped as unclassified rows.
pub fn build_rows(db: &Database, cache: &mut BlockCache, ctx: &WorkerContext<'_>, source_id: &str) -> Result<Vec<BlockConnection>> {
    let conn = db.conn();
    let source = cache
        .by_block_id(conn, source_id)?
        .ok_or_else(|| Error::UnknownBlock(source_id.to_string()))?;
    let targets = ctx.finder.neighbors(conn, cache, &source)?;
    let costs = ctx.costs.for_source(conn, &source.road_ids)?;
    Ok(targets
        .iter()
        .map(|t| BlockConnection::unclassified(&source.block_id, &t.block_id, costs.to_target(&t.road_ids)))
        .collect())
}

/// Claim-process-commit loop for one worker until the queue drains or a stop signal fires.
pub fn run_worker(db: &mut Database, worker: &str, ctx: &WorkerContext<'_>) -> Result<WorkerStats> {
    let mut cache = BlockCache::new(ctx.cache_capacity);
    let mut stats = WorkerStats::default();
    loop {
        if ctx.should_stop() || !ctx.take_budget() {
            break;
        }
        let Some(source) = claim_next(db, worker, crate::now_unix())? else {
            break;
        };
        let result = build_rows(db, &mut cache, ctx, &source)
            .and_then(|rows| commit_source(db, worker, &source, &rows, crate::now_unix()));
        match result {
            Ok(n) => {
                stats.sources += 1;
                stats.rows += n;
                if n == 0 {
                    stats.zero_target_sources += 1;
                }
                (ctx.on_commit)(&SourceOutcome { source, rows: n });
            }
            Err(e) => {
                ctx.failed.store(true, Ordering::SeqCst);
                error!(worker, %source, error = %e, "source failed; nothing committed");
                if let Err(re) = release_claim(db, worker, &source) {
                    warn!(worker, %source, error = %re, "could not release claim; next run will release it");
                }
                return Err(e);
            }
        }
    }
    stats.cache_hits = cache.hits();
    stats.cache_misses = cache.misses();
    debug!(worker, ?stats, "worker finished");
    Ok(stats)
}

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Process at most this many sources, then stop without running the barrier stages.
    pub limit: Option<usize>,
    /// Commit sources only; leave reclassification and indexing to separate invocations.
    pub skip_finalize: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub workers: usize,
    pub processed: WorkerStats,
    pub remaining: i64,
    pub cancelled: bool,
    pub reclassified: Option<usize>,
    pub index: Option<IndexReport>,
}

pub struct Pipeline {
    path: PathBuf,
    open_cfg: DbOpenConfig,
    cfg: BuildConfig,
}

impl Pipeline {
    pub fn new<P: AsRef<Path>>(path: P, open_cfg: DbOpenConfig, cfg: BuildConfig) -> Result<Self> {
        cfg.validate()?;
        let open_cfg = open_cfg.with_busy_timeout_ms(cfg.busy_timeout_ms);
        Ok(Self { path: path.as_ref().to_path_buf(), open_cfg, cfg })
    }

    pub fn config(&self) -> &BuildConfig { &self.cfg }

    /// Opens the existing database; building never creates one.
    pub fn open(&self) -> Result<Database> {
        Database::open_existing(&self.path, &self.open_cfg)
    }

    fn aggregator(&self) -> CostAggregator {
        CostAggregator::new(self.cfg.high_stress_source)
    }

    /// Validate inputs, create output tables, sync the spatial index and select candidates.
    /// Nothing is written when inputs are missing or empty.
    pub fn prepare(&self) -> Result<Vec<BlockId>> {
        let mut db = self.open()?;
        schema::require_inputs(db.conn(), &self.aggregator().regimes())?;
        db.init()?;
        schema::ensure_spatial_index(db.conn())?;
        select_candidates(&mut db, crate::now_unix())
    }

    /// Full run: prepare, then [`Pipeline::run_prepared`].
    pub fn run(&self, opts: &RunOptions, cancel: &AtomicBool, on_commit: &(dyn Fn(&SourceOutcome) + Sync)) -> Result<RunSummary> {
        let candidates = self.prepare()?;
        self.run_prepared(&candidates, opts, cancel, on_commit)
    }

    /// Process the candidates returned by [`Pipeline::prepare`] with the worker
    /// pool, then the barrier stages unless the run was limited or cancelled, or
    /// `skip_finalize` is set.
    pub fn run_prepared(
        &self,
        candidates: &[BlockId],
        opts: &RunOptions,
        cancel: &AtomicBool,
        on_commit: &(dyn Fn(&SourceOutcome) + Sync),
    ) -> Result<RunSummary> {
        let workers = self.cfg.workers.min(candidates.len()).max(1);
        info!(candidates = candidates.len(), workers, radius = self.cfg.search_radius, "starting build");

        let failed = AtomicBool::new(false);
        let budget = opts.limit.map(AtomicUsize::new);
        let ctx = WorkerContext {
            finder: NeighborFinder::new(self.cfg.search_radius, self.cfg.include_self_pairs),
            costs: self.aggregator(),
            cache_capacity: self.cfg.block_cache_capacity,
            cancel,
            failed: &failed,
            budget: budget.as_ref(),
            on_commit,
        };

        let results: Vec<Result<WorkerStats>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|i| {
                    let ctx = &ctx;
                    let name = format!("{}-{}", std::process::id(), i);
                    s.spawn(move || -> Result<WorkerStats> {
                        let mut db = self.open()?;
                        run_worker(&mut db, &name, ctx)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(Err(Error::WorkerPanicked)))
                .collect()
        });

        let mut summary = RunSummary { candidates: candidates.len(), workers, ..Default::default() };
        let mut first_err = None;
        for r in results {
            match r {
                Ok(st) => summary.processed.merge(&st),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let mut db = self.open()?;
        let counts = db.progress_counts()?;
        summary.remaining = counts.pending + counts.claimed;
        summary.cancelled = cancel.load(Ordering::SeqCst);
        info!(processed = summary.processed.sources, rows = summary.processed.rows, remaining = summary.remaining, "sources committed");

        if summary.cancelled {
            warn!(remaining = summary.remaining, "run cancelled; rerun to resume");
            return Ok(summary);
        }
        if summary.remaining > 0 || opts.skip_finalize {
            info!(remaining = summary.remaining, "skipping reclassification and indexing");
            return Ok(summary);
        }
        let (reclassified, index) = self.finalize_with(&mut db)?;
        summary.reclassified = Some(reclassified);
        summary.index = Some(index);
        Ok(summary)
    }

    /// Reclassify then index. Both refuse to run while sources are outstanding.
    pub fn finalize(&self) -> Result<(usize, IndexReport)> {
        let mut db = self.open()?;
        self.finalize_with(&mut db)
    }

    fn finalize_with(&self, db: &mut Database) -> Result<(usize, IndexReport)> {
        let n = self.reclassify_with(db)?;
        let report = build_indexes(db, crate::now_unix())?;
        Ok((n, report))
    }

    pub fn reclassify(&self) -> Result<usize> {
        let mut db = self.open()?;
        self.reclassify_with(&mut db)
    }

    fn reclassify_with(&self, db: &mut Database) -> Result<usize> {
        db.init()?;
        reclassify(db, &StressRule::new(self.cfg.cost_ratio_threshold), crate::now_unix())
    }

    pub fn build_indexes(&self) -> Result<IndexReport> {
        let mut db = self.open()?;
        db.init()?;
        build_indexes(&mut db, crate::now_unix())
    }
}
