use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::{ResolvedConfig, SubsampleSettings};
use crate::domain::{BYTES_PER_MB, SubsampleTarget};
use crate::error::KiraError;
use crate::fastq::{FastqRecord, RecordReader};
use crate::transport::Transport;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), KiraError> {
        if self.is_cancelled() {
            return Err(KiraError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamProgress {
    pub records: u64,
    pub bases: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    SourceExhausted,
    HardCap,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubsampleResult {
    pub path: PathBuf,
    pub urls: Vec<String>,
    pub target: SubsampleTarget,
    pub records: u64,
    pub bases: u64,
    pub output_bytes: u64,
    pub stop_reason: StopReason,
}

type Output = GzEncoder<BufWriter<NamedTempFile>>;

pub struct Subsampler<T: Transport> {
    transport: T,
    settings: SubsampleSettings,
    cancel: CancelToken,
}

impl<T: Transport> Subsampler<T> {
    pub fn new(transport: T, config: &ResolvedConfig) -> Self {
        Self {
            transport,
            settings: config.subsample.clone(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The file is written under a temporary name next to `output` and renamed only on success.
    pub fn subsample(
        &self,
        urls: &[String],
        target: SubsampleTarget,
        output: &Path,
    ) -> Result<SubsampleResult, KiraError> {
        target.validate()?;
        if urls.is_empty() {
            return Err(KiraError::InvalidTarget(format!(
                "no source links for {}",
                output.display()
            )));
        }
        tracing::info!(
            output = %output.display(),
            %target,
            parts = urls.len(),
            "subsampling"
        );

        let parent = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".kira-stream")
            .suffix(".part")
            .tempfile_in(&parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut out = GzEncoder::new(BufWriter::new(temp), Compression::default());

        let (progress, stop_reason) = self.stream_records(urls, target, &mut out)?;

        let temp = out
            .finish()
            .and_then(|writer| writer.into_inner().map_err(|err| err.into_error()))
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let output_bytes = temp
            .as_file()
            .metadata()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?
            .len();
        temp.persist(output)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        tracing::info!(
            output = %output.display(),
            records = progress.records,
            bases = progress.bases,
            uncompressed_bytes = progress.bytes_written,
            output_bytes,
            reason = ?stop_reason,
            "subsample complete"
        );
        Ok(SubsampleResult {
            path: output.to_path_buf(),
            urls: urls.to_vec(),
            target,
            records: progress.records,
            bases: progress.bases,
            output_bytes,
            stop_reason,
        })
    }

    fn stream_records(
        &self,
        urls: &[String],
        target: SubsampleTarget,
        out: &mut Output,
    ) -> Result<(StreamProgress, StopReason), KiraError> {
        let mut reader = RecordReader::new(&self.transport, urls);
        let mut record = FastqRecord::default();
        let mut progress = StreamProgress::default();
        let mut size_check = SizeCheck::new(target, &self.settings);

        loop {
            self.cancel.check()?;
            if !reader.read_record(&mut record)? {
                return Ok((progress, StopReason::SourceExhausted));
            }
            record
                .write_to(out)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            progress.records += 1;
            progress.bases += record.bases();
            progress.bytes_written += (record.header.len()
                + record.sequence.len()
                + record.separator.len()
                + record.quality.len()) as u64;

            let reached = match target {
                SubsampleTarget::Records(limit) => progress.records >= limit,
                SubsampleTarget::Bases(limit) => progress.bases >= limit,
                SubsampleTarget::Megabytes(_) => size_check.reached(progress.records, out)?,
            };
            if reached {
                return Ok((progress, StopReason::TargetReached));
            }

            if let Some(cap) = self.settings.hard_cap_bytes {
                if progress.records % self.settings.hard_cap_check_interval.max(1) == 0 {
                    let size = on_disk_size(out)?;
                    if size >= cap {
                        tracing::warn!(
                            records = progress.records,
                            size,
                            cap,
                            "hard byte cap reached; stopping early"
                        );
                        return Ok((progress, StopReason::HardCap));
                    }
                }
            }
        }
    }
}

struct SizeCheck {
    target_bytes: u64,
    near_bytes: u64,
    interval: u64,
    every_record: bool,
}

impl SizeCheck {
    fn new(target: SubsampleTarget, settings: &SubsampleSettings) -> Self {
        let target_bytes = match target {
            SubsampleTarget::Megabytes(mb) => mb.saturating_mul(BYTES_PER_MB),
            _ => u64::MAX,
        };
        Self {
            target_bytes,
            near_bytes: (target_bytes as f64 * settings.near_target_ratio) as u64,
            interval: settings.size_check_interval.max(1),
            every_record: false,
        }
    }

    fn due(&self, records: u64) -> bool {
        self.every_record || records % self.interval == 0
    }

    fn observe(&mut self, records: u64, size: u64) -> bool {
        if size >= self.target_bytes {
            return true;
        }
        if !self.every_record && size >= self.near_bytes {
            tracing::debug!(records, size, "output near target; checking every record");
            self.every_record = true;
        }
        false
    }

    fn reached(&mut self, records: u64, out: &mut Output) -> Result<bool, KiraError> {
        if !self.due(records) {
            return Ok(false);
        }
        let size = on_disk_size(out)?;
        Ok(self.observe(records, size))
    }
}

fn on_disk_size(out: &mut Output) -> Result<u64, KiraError> {
    out.flush()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let metadata = out
        .get_ref()
        .get_ref()
        .as_file()
        .metadata()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(metadata.len())
}
