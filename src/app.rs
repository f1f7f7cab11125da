use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::catalog::SequencingRun;
use crate::config::ResolvedConfig;
use crate::domain::{LibraryLayout, PlatformClass, SubsampleTarget};
use crate::error::KiraError;
use crate::pairing::{PairingCoordinator, split_mates};
use crate::provenance::{FileRole, ProvenanceRecord};
use crate::resolver::MetadataResolver;
use crate::subsample::{CancelToken, Subsampler};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub organism: String,
    pub strategy: Option<String>,
    pub coverage_short: Option<f64>,
    pub coverage_long: Option<f64>,
    pub genome_size: Option<u64>,
    pub long_target: Option<SubsampleTarget>,
    pub output_dir: Utf8PathBuf,
    pub short: bool,
    pub long: bool,
}

impl IngestRequest {
    pub fn new(organism: impl Into<String>, output_dir: Utf8PathBuf) -> Self {
        Self {
            organism: organism.into(),
            strategy: None,
            coverage_short: None,
            coverage_long: None,
            genome_size: None,
            long_target: None,
            output_dir,
            short: true,
            long: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub organism: String,
    pub strategy: String,
    pub genome_size: u64,
    pub short: ClassOutcome,
    pub long: ClassOutcome,
    pub files: Vec<ProvenanceRecord>,
}

impl IngestResult {
    pub fn has_not_found(&self) -> bool {
        matches!(self.short, ClassOutcome::NotFound { .. })
            || matches!(self.long, ClassOutcome::NotFound { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClassOutcome {
    Fetched {
        run_accession: String,
        sample_accession: String,
        layout: LibraryLayout,
        target: SubsampleTarget,
        degraded: bool,
    },
    NotFound {
        message: String,
    },
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: Transport> {
    transport: T,
    config: ResolvedConfig,
    cancel: CancelToken,
}

impl<T: Transport> App<T> {
    pub fn new(transport: T, config: ResolvedConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn resolve(
        &self,
        organism: &str,
        class: PlatformClass,
        strategy: Option<&str>,
    ) -> Result<SequencingRun, KiraError> {
        let strategy = strategy.unwrap_or(self.config.strategy.as_str());
        MetadataResolver::new(&self.transport, &self.config).resolve(
            organism,
            class,
            strategy,
            self.config.max_candidates,
        )
    }

    pub fn ingest(
        &self,
        request: &IngestRequest,
        sink: &dyn ProgressSink,
    ) -> Result<IngestResult, KiraError> {
        let strategy = request
            .strategy
            .as_deref()
            .map(|value| value.trim().to_uppercase())
            .unwrap_or_else(|| self.config.strategy.clone());
        let genome_size = request
            .genome_size
            .unwrap_or_else(|| self.config.genome_sizes.lookup(&request.organism));
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; organism={} strategy={strategy} genome_size={genome_size}",
                request.organism
            ),
            elapsed: None,
        });

        let start = Instant::now();
        let short_run = if request.short {
            Some(self.resolve(&request.organism, PlatformClass::Short, Some(strategy.as_str())))
        } else {
            None
        };
        let long_run = if request.long {
            let sample = short_run
                .as_ref()
                .and_then(|run| run.as_ref().ok())
                .map(|run| run.sample_accession.as_str());
            Some(self.resolve_long(&request.organism, sample, &strategy))
        } else {
            None
        };
        sink.event(ProgressEvent {
            message: "phase=Resolve; done".to_string(),
            elapsed: Some(start.elapsed()),
        });

        let short_bases = self.config.needed_bases(
            genome_size,
            request.coverage_short.unwrap_or(self.config.coverage_short),
        );
        let long_target = request.long_target.unwrap_or_else(|| {
            SubsampleTarget::Bases(self.config.needed_bases(
                genome_size,
                request.coverage_long.unwrap_or(self.config.coverage_long),
            ))
        });

        let (short, long) = thread::scope(|scope| {
            let short_task = scope.spawn(|| match short_run {
                Some(Ok(run)) => self.download_short(&run, short_bases, &request.output_dir, sink),
                Some(Err(err)) => class_not_found(err),
                None => Ok((ClassOutcome::Skipped, Vec::new())),
            });
            let long_outcome = match long_run {
                Some(Ok(run)) => self.download_long(&run, long_target, &request.output_dir, sink),
                Some(Err(err)) => class_not_found(err),
                None => Ok((ClassOutcome::Skipped, Vec::new())),
            };
            let short_outcome = short_task.join().unwrap_or_else(|_| {
                Err(KiraError::Filesystem(
                    "short-read worker panicked".to_string(),
                ))
            });
            (short_outcome, long_outcome)
        });
        let (short, mut files) = short?;
        let (long, long_files) = long?;
        files.extend(long_files);

        sink.event(ProgressEvent {
            message: format!("phase=Done; files={}", files.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(IngestResult {
            organism: request.organism.clone(),
            strategy,
            genome_size,
            short,
            long,
            files,
        })
    }

    fn resolve_long(
        &self,
        organism: &str,
        sample: Option<&str>,
        strategy: &str,
    ) -> Result<SequencingRun, KiraError> {
        let resolver = MetadataResolver::new(&self.transport, &self.config);
        if let Some(sample) = sample.filter(|value| !value.is_empty()) {
            match resolver.resolve_same_sample(
                sample,
                PlatformClass::Long,
                strategy,
                self.config.max_candidates,
            ) {
                Ok(run) => return Ok(run),
                Err(KiraError::NotFound(reason)) => {
                    tracing::info!(sample, %reason, "no same-sample long-read run; searching by organism");
                }
                Err(err) if err.is_transport() || matches!(err, KiraError::MetadataInvalid(_)) => {
                    tracing::warn!(sample, %err, "same-sample long-read search failed; searching by organism");
                }
                Err(err) => return Err(err),
            }
        }
        let run = resolver.resolve(
            organism,
            PlatformClass::Long,
            strategy,
            self.config.max_candidates,
        )?;
        if let Some(sample) = sample {
            if !run.sample_accession.is_empty() && run.sample_accession != sample {
                tracing::warn!(
                    short_sample = sample,
                    long_sample = run.sample_accession.as_str(),
                    "short and long reads come from different samples; treating them as biological replicates"
                );
            }
        }
        Ok(run)
    }

    fn download_short(
        &self,
        run: &SequencingRun,
        total_bases: u64,
        output_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<(ClassOutcome, Vec<ProvenanceRecord>), KiraError> {
        let urls = run.read_urls().unwrap_or_default();
        let (mate1_urls, mate2_urls) = split_mates(urls);
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Short; run={} bases={total_bases}", run.run_accession),
            elapsed: None,
        });

        if run.layout != LibraryLayout::Single && !mate2_urls.is_empty() {
            let mate1_path = output_dir.join(format!("{}_R1.fastq.gz", run.run_accession));
            let mate2_path = output_dir.join(format!("{}_R2.fastq.gz", run.run_accession));
            let paired = PairingCoordinator::new(&self.transport, &self.config)
                .with_cancel(self.cancel.clone())
                .fetch_paired_short_reads(
                    run,
                    &mate1_urls,
                    &mate2_urls,
                    total_bases,
                    mate1_path.as_std_path(),
                    mate2_path.as_std_path(),
                )?;
            let files = vec![
                ProvenanceRecord::build(run, FileRole::ShortR1, &paired.mate1)?,
                ProvenanceRecord::build(run, FileRole::ShortR2, &paired.mate2)?,
            ];
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Short; records={} degraded={}",
                    paired.mate1.records, paired.degraded
                ),
                elapsed: Some(start.elapsed()),
            });
            return Ok((
                ClassOutcome::Fetched {
                    run_accession: run.run_accession.to_string(),
                    sample_accession: run.sample_accession.clone(),
                    layout: run.layout,
                    target: paired.mate1.target,
                    degraded: paired.degraded,
                },
                files,
            ));
        }

        let path = output_dir.join(format!("{}.fastq.gz", run.run_accession));
        let target = SubsampleTarget::Bases(total_bases);
        let result = Subsampler::new(&self.transport, &self.config)
            .with_cancel(self.cancel.clone())
            .subsample(urls, target, path.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("phase=Short; records={} single-end", result.records),
            elapsed: Some(start.elapsed()),
        });
        Ok((
            ClassOutcome::Fetched {
                run_accession: run.run_accession.to_string(),
                sample_accession: run.sample_accession.clone(),
                layout: run.layout,
                target,
                degraded: false,
            },
            vec![ProvenanceRecord::build(run, FileRole::ShortR1, &result)?],
        ))
    }

    fn download_long(
        &self,
        run: &SequencingRun,
        target: SubsampleTarget,
        output_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<(ClassOutcome, Vec<ProvenanceRecord>), KiraError> {
        let urls = run.read_urls().unwrap_or_default();
        let path = output_dir.join(format!("{}_long.fastq.gz", run.run_accession));
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Long; run={} {target}", run.run_accession),
            elapsed: None,
        });
        let result = Subsampler::new(&self.transport, &self.config)
            .with_cancel(self.cancel.clone())
            .subsample(urls, target, path.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("phase=Long; records={}", result.records),
            elapsed: Some(start.elapsed()),
        });
        Ok((
            ClassOutcome::Fetched {
                run_accession: run.run_accession.to_string(),
                sample_accession: run.sample_accession.clone(),
                layout: run.layout,
                target,
                degraded: false,
            },
            vec![ProvenanceRecord::build(run, FileRole::LongRead, &result)?],
        ))
    }
}

fn class_not_found(
    err: KiraError,
) -> Result<(ClassOutcome, Vec<ProvenanceRecord>), KiraError> {
    match err {
        KiraError::NotFound(message) => {
            tracing::warn!(%message, "no run found");
            Ok((ClassOutcome::NotFound { message }, Vec::new()))
        }
        other => Err(other),
    }
}
