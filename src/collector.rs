//! One collection run: discover, download, stage, count, signal.
//!
//! A run always reaches a terminal state and never retries internally; the
//! binary is meant to be re-invoked on a schedule. The only durable state is
//! the staging directory and the batch markers, so a crashed run can be
//! re-run from scratch. Rows appended by a half-finished run stay in place.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand_core::RngCore;
use tracing::{info, warn};

use crate::batches::{self, BatchVersion};
use crate::discovery::{Discovery, DiscoveryReport, DiscoveryRequest};
use crate::metadata;
use crate::thumbnails::{BulkFetchReport, ImageSource, ThumbnailFetcher, ThumbnailJob};
use crate::youtube::VideoApi;

const CURRENT_SUBDIR: &str = "current";
const BATCHES_SUBDIR: &str = "batches";
const METADATA_FILE: &str = "metadata.csv";
const ROTATE_FLAG_FILE: &str = ".rotate";

/// Every filesystem location a run touches, relative to one working root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    pub root: PathBuf,
    /// Thumbnails (`<video_id>.jpg`) and `metadata.csv`.
    pub current: PathBuf,
    /// One marker per committed batch.
    pub batches: PathBuf,
    pub metadata: PathBuf,
    pub rotate_flag: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let current = root.join(CURRENT_SUBDIR);
        let batches = root.join(BATCHES_SUBDIR);
        let metadata = current.join(METADATA_FILE);
        let rotate_flag = root.join(ROTATE_FLAG_FILE);

        Self {
            root,
            current,
            batches,
            metadata,
            rotate_flag,
        }
    }

    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.current)
            .with_context(|| format!("creating {}", self.current.display()))?;
        fs::create_dir_all(&self.batches)
            .with_context(|| format!("creating {}", self.batches.display()))?;
        Ok(())
    }
}

/// How configured regions are narrowed before discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionStrategy {
    /// Query one randomly chosen region per run to spread quota.
    #[default]
    RandomOne,
    All,
}

/// Applies `strategy` to `regions`. The random pick is drawn from `rng` so
/// callers control it.
pub fn select_regions<R: RngCore + ?Sized>(
    regions: &[String],
    strategy: RegionStrategy,
    rng: &mut R,
) -> Vec<String> {
    match strategy {
        RegionStrategy::All => regions.to_vec(),
        RegionStrategy::RandomOne if regions.len() <= 1 => regions.to_vec(),
        RegionStrategy::RandomOne => {
            let index = (rng.next_u64() % regions.len() as u64) as usize;
            vec![regions[index].clone()]
        }
    }
}

/// Inputs of one run besides the collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPlan {
    pub request: DiscoveryRequest,
    pub batch_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Staged,
    RotateSignaled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Staged => "staged",
            RunState::RotateSignaled => "rotate-signaled",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    /// Batch name resolved at the start of the run (tagging only).
    pub target_batch: BatchVersion,
    pub discovery: DiscoveryReport,
    pub thumbnails: BulkFetchReport,
    pub rows_written: usize,
    pub staged_total: u64,
    /// Batch name written to the flag file, when rotation was signalled.
    pub rotation: Option<String>,
    pub final_state: RunState,
}

pub struct Collector<A, S> {
    discovery: Discovery<A>,
    fetcher: ThumbnailFetcher<S>,
    layout: StagingLayout,
}

impl<A: VideoApi, S: ImageSource> Collector<A, S> {
    pub fn new(api: A, images: S, layout: StagingLayout) -> Self {
        Self {
            discovery: Discovery::new(api),
            fetcher: ThumbnailFetcher::new(images),
            layout,
        }
    }

    /// Executes one run. Partial failures in discovery or downloads are
    /// recorded in the outcome; only staging I/O errors propagate.
    pub fn run(&self, plan: &CollectionPlan) -> Result<RunOutcome> {
        let layout = &self.layout;
        let target_batch = batches::next_batch_number(&layout.batches)?;
        info!(target = %target_batch, "resolved target batch");

        let mut state = RunState::Idle;
        let discovery = self.discovery.discover(&plan.request);
        if discovery.is_empty() {
            info!("no videos discovered; staging untouched");
            return Ok(RunOutcome {
                target_batch,
                discovery,
                thumbnails: BulkFetchReport::default(),
                rows_written: 0,
                staged_total: batches::count_staged_samples(&layout.metadata)?,
                rotation: None,
                final_state: state,
            });
        }

        state = RunState::Fetching;
        layout.prepare()?;
        let jobs: Vec<ThumbnailJob> = discovery
            .records
            .iter()
            .map(|record| ThumbnailJob {
                video_id: record.video_id.clone(),
                url: record.thumbnail_url.clone(),
            })
            .collect();
        info!(count = jobs.len(), %state, "downloading thumbnails");
        let thumbnails = self.fetcher.fetch_many(&jobs, &layout.current);

        // Every discovered record gets a row, thumbnail or not.
        let rows_written = metadata::append_records(
            &layout.metadata,
            &discovery.records,
            &target_batch.name(),
        )?;
        state = RunState::Staged;

        let staged_total = batches::count_staged_samples(&layout.metadata)?;
        info!(staged_total, limit = plan.batch_limit, %state, "staging updated");

        let rotation = if staged_total >= plan.batch_limit {
            let next = batches::next_batch_number(&layout.batches)?.name();
            batches::signal_rotation(&layout.rotate_flag, &next)?;
            warn!(batch = %next, flag = %layout.rotate_flag.display(), "rotation needed");
            state = RunState::RotateSignaled;
            Some(next)
        } else {
            None
        };

        Ok(RunOutcome {
            target_batch,
            discovery,
            thumbnails,
            rows_written,
            staged_total,
            rotation,
            final_state: state,
        })
    }
}
