use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::catalog::SequencingRun;
use crate::config::ResolvedConfig;
use crate::domain::SubsampleTarget;
use crate::error::KiraError;
use crate::probe::{LengthProber, ProbeOutcome};
use crate::subsample::{CancelToken, SubsampleResult, Subsampler};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairingState {
    Probing,
    Probed,
    ProbeFailed,
    DownloadingMate1,
    SyncingMate2,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairedResult {
    pub mate1: SubsampleResult,
    pub mate2: SubsampleResult,
    pub mate1_probe: ProbeOutcome,
    pub mate2_probe: ProbeOutcome,
    pub degraded: bool,
    pub records_needed: Option<u64>,
}

pub struct PairingCoordinator<T: Transport> {
    transport: T,
    config: ResolvedConfig,
    cancel: CancelToken,
}

impl<T: Transport> PairingCoordinator<T> {
    pub fn new(transport: T, config: &ResolvedConfig) -> Self {
        Self {
            transport,
            config: config.clone(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn fetch_paired_short_reads(
        &self,
        run: &SequencingRun,
        mate1_urls: &[String],
        mate2_urls: &[String],
        total_base_target: u64,
        mate1_path: &Path,
        mate2_path: &Path,
    ) -> Result<PairedResult, KiraError> {
        let mut tracker = StateTracker::new(run);
        let result = self.run_pairing(
            &mut tracker,
            mate1_urls,
            mate2_urls,
            total_base_target,
            mate1_path,
            mate2_path,
        );
        if result.is_err() {
            tracker.enter(PairingState::Failed);
            for path in &tracker.written {
                remove_written(path);
            }
        }
        result
    }

    fn run_pairing(
        &self,
        tracker: &mut StateTracker,
        mate1_urls: &[String],
        mate2_urls: &[String],
        total_base_target: u64,
        mate1_path: &Path,
        mate2_path: &Path,
    ) -> Result<PairedResult, KiraError> {
        if total_base_target == 0 {
            return Err(KiraError::InvalidTarget(
                "paired base target must be positive".to_string(),
            ));
        }
        let prober = LengthProber::new(&self.transport).with_cancel(self.cancel.clone());
        let subsampler =
            Subsampler::new(&self.transport, &self.config).with_cancel(self.cancel.clone());
        let probe_records = self.config.subsample.probe_records;

        let mate1_probe = prober.probe_mean_record_length(mate1_urls, probe_records)?;
        let mate2_probe = prober.probe_mean_record_length(mate2_urls, probe_records)?;
        let plan = plan_mate1(total_base_target, mate1_probe, mate2_probe);
        let degraded = plan.records_needed.is_none();
        if degraded {
            tracker.enter(PairingState::ProbeFailed);
            tracing::warn!(
                run = tracker.run.as_str(),
                target = %plan.target,
                "length probe unavailable; splitting base target evenly between mates (length imbalance is not corrected)"
            );
        } else {
            tracker.enter(PairingState::Probed);
        }

        tracker.enter(PairingState::DownloadingMate1);
        let mate1 = subsampler.subsample(mate1_urls, plan.target, mate1_path)?;
        tracker.written.push(mate1.path.clone());
        if mate1.records == 0 {
            return Err(KiraError::NotFound(format!(
                "mate 1 of {} yielded no records",
                tracker.run
            )));
        }

        tracker.enter(PairingState::SyncingMate2);
        let mate2 =
            subsampler.subsample(mate2_urls, SubsampleTarget::Records(mate1.records), mate2_path)?;
        tracker.written.push(mate2.path.clone());
        if mate2.records == 0 {
            return Err(KiraError::NotFound(format!(
                "mate 2 of {} yielded no records",
                tracker.run
            )));
        }
        let mut mate1 = mate1;
        if mate2.records < mate1.records {
            tracing::warn!(
                run = tracker.run.as_str(),
                mate1 = mate1.records,
                mate2 = mate2.records,
                "mate 2 source is shorter; trimming mate 1 to match"
            );
            mate1 = subsampler.subsample(
                mate1_urls,
                SubsampleTarget::Records(mate2.records),
                mate1_path,
            )?;
            if mate1.records != mate2.records {
                return Err(KiraError::Decode(format!(
                    "mate 1 of {} changed between reads: {} records, mate 2 has {}",
                    tracker.run, mate1.records, mate2.records
                )));
            }
        }

        tracker.enter(PairingState::Done);
        Ok(PairedResult {
            mate1,
            mate2,
            mate1_probe,
            mate2_probe,
            degraded,
            records_needed: plan.records_needed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mate1Plan {
    pub target: SubsampleTarget,
    pub records_needed: Option<u64>,
}

pub fn plan_mate1(total_base_target: u64, mate1: ProbeOutcome, mate2: ProbeOutcome) -> Mate1Plan {
    if let (Some(mean1), Some(mean2)) = (mate1.mean_length(), mate2.mean_length()) {
        let pair_length = mean1 + mean2;
        if pair_length > 0.0 {
            let records_needed = ((total_base_target as f64 / pair_length).ceil() as u64).max(1);
            return Mate1Plan {
                target: SubsampleTarget::Records(records_needed),
                records_needed: Some(records_needed),
            };
        }
    }
    Mate1Plan {
        target: SubsampleTarget::Bases((total_base_target / 2).max(1)),
        records_needed: None,
    }
}

/// Links named `_1.fastq`/`_R1` and `_2.fastq`/`_R2` are matched first; otherwise the first
/// and second links are used.
pub fn split_mates(urls: &[String]) -> (Vec<String>, Vec<String>) {
    static MATE: OnceLock<Regex> = OnceLock::new();
    let pattern = MATE.get_or_init(|| {
        Regex::new(r"(?i)(?:_([12])\.f(?:ast)?q|_r([12])(?:[_.]|$))")
            .unwrap_or_else(|err| unreachable!("invalid mate pattern: {err}"))
    });
    let mut mate1 = Vec::new();
    let mut mate2 = Vec::new();
    for url in urls {
        let name = url.rsplit('/').next().unwrap_or(url);
        let mate = pattern
            .captures(name)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str());
        match mate {
            Some("1") => mate1.push(url.clone()),
            Some("2") => mate2.push(url.clone()),
            _ => {}
        }
    }
    if mate1.is_empty() {
        if let Some(first) = urls.first() {
            mate1.push(first.clone());
        }
    }
    if mate2.is_empty() {
        if let Some(second) = urls.get(1) {
            mate2.push(second.clone());
        }
    }
    (mate1, mate2)
}

struct StateTracker {
    run: String,
    state: PairingState,
    written: Vec<PathBuf>,
}

impl StateTracker {
    fn new(run: &SequencingRun) -> Self {
        tracing::info!(run = %run.run_accession, state = ?PairingState::Probing, "pairing");
        Self {
            run: run.run_accession.to_string(),
            state: PairingState::Probing,
            written: Vec::new(),
        }
    }

    fn enter(&mut self, next: PairingState) {
        debug_assert_ne!(self.state, next, "pairing state re-entered");
        tracing::info!(run = self.run.as_str(), from = ?self.state, to = ?next, "pairing");
        self.state = next;
    }
}

fn remove_written(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), %err, "failed to remove unpaired output");
    }
}
