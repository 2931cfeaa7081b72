use std::fs;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rayon::{ThreadPool, ThreadPoolBuilder};
use reqwest::Url;
use serde::Serialize;

use crate::archive;
use crate::assemble;
use crate::config::ResolvedConfig;
use crate::domain::StageName;
use crate::error::GeoflatError;
use crate::geo::{GeoClient, extract_download_link};
use crate::layout::{Layout, write_bytes_atomic};
use crate::lock::RunLock;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Option<StageName>,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Everything a stage may touch while it runs.
pub struct StageContext<'a, C: GeoClient> {
    pub layout: &'a Layout,
    pub config: &'a ResolvedConfig,
    pub client: &'a C,
    pub pool: &'a ThreadPool,
}

/// One pipeline stage.
///
/// `complete` looks only at the filesystem through the layout, so a stage whose
/// artifact exists is never run again. `predecessor` indexes into the owning stage list.
pub struct Stage<C: GeoClient> {
    pub name: StageName,
    pub predecessor: Option<usize>,
    pub artifact: fn(&Layout, &ResolvedConfig) -> Utf8PathBuf,
    pub complete: fn(&Layout, &ResolvedConfig) -> bool,
    pub run: fn(&StageContext<'_, C>) -> Result<(), GeoflatError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Skipped,
    Ran,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageName,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub accession: String,
    pub root: String,
    pub target: StageName,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn ran(&self) -> usize {
        self.stages
            .iter()
            .filter(|stage| stage.outcome == StageOutcome::Ran)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub stage: StageName,
    pub complete: bool,
    pub artifact: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub accession: String,
    pub root: String,
    pub stages: Vec<StageStatus>,
    pub has_tsv_outputs: bool,
}

pub struct Pipeline<C: GeoClient> {
    layout: Layout,
    config: ResolvedConfig,
    client: C,
    stages: Vec<Stage<C>>,
}

impl<C: GeoClient> Pipeline<C> {
    pub fn new(config: ResolvedConfig, client: C) -> Self {
        Self::with_stages(config, client, standard_stages())
    }

    pub fn with_stages(config: ResolvedConfig, client: C, stages: Vec<Stage<C>>) -> Self {
        let layout = Layout::new(config.root.clone());
        Self {
            layout,
            config,
            client,
            stages,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs every stage needed to complete `target` (the last stage when
    /// `None`).
    ///
    /// Walks back from the target to the nearest complete stage and runs
    /// forward from there. Stages before that point are reported as skipped
    /// without being inspected.
    pub fn run_until(
        &self,
        target: Option<StageName>,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, GeoflatError> {
        let target_index = match target {
            Some(name) => self.index_of(name)?,
            None => self
                .stages
                .len()
                .checked_sub(1)
                .ok_or_else(|| GeoflatError::UnknownStage("<none>".to_string()))?,
        };

        self.layout.ensure_dirs()?;
        let _lock = if self.config.no_lock {
            None
        } else {
            Some(RunLock::acquire(&self.layout.lock_path())?)
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers)
            .thread_name(|index| format!("geoflat-worker-{index}"))
            .build()
            .map_err(|err| GeoflatError::WorkerPool(err.to_string()))?;
        let ctx = StageContext {
            layout: &self.layout,
            config: &self.config,
            client: &self.client,
            pool: &pool,
        };

        let chain = self.chain(target_index);
        let mut pending = Vec::new();
        for &index in chain.iter().rev() {
            if self.is_complete(index) {
                break;
            }
            pending.push(index);
        }

        let mut reports = Vec::with_capacity(chain.len());
        for &index in &chain {
            let stage = &self.stages[index];
            if !pending.contains(&index) {
                sink.event(ProgressEvent {
                    stage: Some(stage.name),
                    message: format!("{}: complete, skipping", stage.name),
                    elapsed: None,
                });
                tracing::info!(stage = %stage.name, "stage complete, skipping");
                reports.push(StageReport {
                    stage: stage.name,
                    outcome: StageOutcome::Skipped,
                    elapsed_ms: 0,
                });
                continue;
            }
            let elapsed = self.run_stage(stage, &ctx, sink)?;
            reports.push(StageReport {
                stage: stage.name,
                outcome: StageOutcome::Ran,
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
        }

        Ok(RunReport {
            accession: self.config.accession.to_string(),
            root: self.layout.root().to_string(),
            target: self.stages[target_index].name,
            stages: reports,
        })
    }

    fn run_stage(
        &self,
        stage: &Stage<C>,
        ctx: &StageContext<'_, C>,
        sink: &dyn ProgressSink,
    ) -> Result<Duration, GeoflatError> {
        if let Some(previous) = stage.predecessor.map(|index| &self.stages[index]) {
            if !(previous.complete)(ctx.layout, ctx.config) {
                return Err(GeoflatError::PredecessorIncomplete {
                    stage: stage.name.to_string(),
                    predecessor: previous.name.to_string(),
                });
            }
        }

        sink.event(ProgressEvent {
            stage: Some(stage.name),
            message: format!("{}: running", stage.name),
            elapsed: None,
        });
        tracing::info!(stage = %stage.name, "stage started");
        let started = Instant::now();
        (stage.run)(ctx)?;
        let elapsed = started.elapsed();

        if !(stage.complete)(ctx.layout, ctx.config) {
            return Err(GeoflatError::StageIncomplete(stage.name.to_string()));
        }
        sink.event(ProgressEvent {
            stage: Some(stage.name),
            message: format!("{}: done", stage.name),
            elapsed: Some(elapsed),
        });
        tracing::info!(stage = %stage.name, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
        Ok(elapsed)
    }

    /// Completion state of every stage, checked without running anything.
    pub fn status(&self) -> StatusReport {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| StageStatus {
                stage: stage.name,
                complete: self.is_complete(index),
                artifact: (stage.artifact)(&self.layout, &self.config).to_string(),
            })
            .collect();
        StatusReport {
            accession: self.config.accession.to_string(),
            root: self.layout.root().to_string(),
            stages,
            has_tsv_outputs: self.layout.has_tsv_outputs(),
        }
    }

    fn is_complete(&self, index: usize) -> bool {
        (self.stages[index].complete)(&self.layout, &self.config)
    }

    fn index_of(&self, name: StageName) -> Result<usize, GeoflatError> {
        self.stages
            .iter()
            .position(|stage| stage.name == name)
            .ok_or_else(|| GeoflatError::UnknownStage(name.to_string()))
    }

    /// Indices from the first stage of the chain up to `target`, in run order.
    fn chain(&self, target: usize) -> Vec<usize> {
        let mut chain = vec![target];
        let mut current = target;
        while let Some(previous) = self.stages[current].predecessor {
            if chain.contains(&previous) {
                break;
            }
            chain.push(previous);
            current = previous;
        }
        chain.reverse();
        chain
    }
}

/// resolve-url -> fetch-archive -> unpack-archive -> assemble-tables
pub fn standard_stages<C: GeoClient>() -> Vec<Stage<C>> {
    vec![
        Stage {
            name: StageName::ResolveUrl,
            predecessor: None,
            artifact: |layout, config| layout.url_path(&config.accession),
            complete: url_resolved,
            run: resolve_url,
        },
        Stage {
            name: StageName::FetchArchive,
            predecessor: Some(0),
            artifact: |layout, _| layout.archive_path(),
            complete: |layout, _| layout.archive_path().as_std_path().is_file(),
            run: fetch_archive,
        },
        Stage {
            name: StageName::UnpackArchive,
            predecessor: Some(1),
            artifact: |layout, _| layout.extracted_manifest_path(),
            complete: |layout, _| layout.extracted_manifest_path().as_std_path().is_file(),
            run: unpack_archive,
        },
        Stage {
            name: StageName::AssembleTables,
            predecessor: Some(2),
            artifact: |layout, _| layout.assembly_manifest_path(),
            complete: |layout, _| assemble::is_assembled(layout),
            run: assemble_tables,
        },
    ]
}

fn read_resolved_url(layout: &Layout, config: &ResolvedConfig) -> Result<Url, GeoflatError> {
    let path = layout.url_path(&config.accession);
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(format!("read {path}: {err}")))?;
    let trimmed = content.trim();
    Url::parse(trimmed).map_err(|err| GeoflatError::InvalidUrl(format!("{trimmed}: {err}")))
}

fn url_resolved(layout: &Layout, config: &ResolvedConfig) -> bool {
    read_resolved_url(layout, config).is_ok()
}

fn resolve_url<C: GeoClient>(ctx: &StageContext<'_, C>) -> Result<(), GeoflatError> {
    let page_url = ctx.config.landing_page_url()?;
    tracing::info!(url = %page_url, "fetching landing page");
    let html = ctx.client.fetch_page(&page_url)?;
    let link = extract_download_link(&html, &page_url)?;

    let path = ctx.layout.url_path(&ctx.config.accession);
    write_bytes_atomic(&path, link.as_str().as_bytes())?;
    tracing::info!(url = %link, path = %path, "download URL resolved");
    Ok(())
}

fn fetch_archive<C: GeoClient>(ctx: &StageContext<'_, C>) -> Result<(), GeoflatError> {
    let url = read_resolved_url(ctx.layout, ctx.config)?;
    let destination = ctx.layout.archive_path();
    tracing::info!(url = %url, destination = %destination, "downloading archive");
    let bytes = ctx.client.download(&url, &destination)?;
    tracing::info!(path = %destination, bytes, "archive downloaded");
    Ok(())
}

fn unpack_archive<C: GeoClient>(ctx: &StageContext<'_, C>) -> Result<(), GeoflatError> {
    let decompressed = archive::unpack_archive(
        &ctx.layout.archive_path(),
        &ctx.layout.output_dir(),
        &ctx.layout.base_dir(),
        ctx.pool,
    )?;
    let manifest = ctx.layout.extracted_manifest_path();
    archive::write_manifest(&manifest, &decompressed)?;
    tracing::info!(path = %manifest, files = decompressed.len(), "extraction manifest written");
    Ok(())
}

fn assemble_tables<C: GeoClient>(ctx: &StageContext<'_, C>) -> Result<(), GeoflatError> {
    let manifest = assemble::assemble(ctx.layout, &ctx.config.accession, ctx.pool)?;
    tracing::info!(
        sections = manifest.sections.len(),
        outputs = manifest.outputs.len(),
        "tables assembled"
    );
    Ok(())
}
