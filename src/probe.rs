use serde::Serialize;

use crate::error::KiraError;
use crate::fastq::{FastqRecord, RecordReader};
use crate::subsample::CancelToken;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Measured { mean_length: f64, records: u64 },
    /// No complete record before the stream ended; callers fall back to a degraded plan.
    Unavailable,
}

impl ProbeOutcome {
    pub fn mean_length(&self) -> Option<f64> {
        match self {
            ProbeOutcome::Measured { mean_length, .. } => Some(*mean_length),
            ProbeOutcome::Unavailable => None,
        }
    }
}

pub struct LengthProber<T: Transport> {
    transport: T,
    cancel: CancelToken,
}

impl<T: Transport> LengthProber<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Only the first part is read; the connection is dropped as soon as the prefix is consumed.
    pub fn probe_mean_record_length(
        &self,
        urls: &[String],
        max_records: u64,
    ) -> Result<ProbeOutcome, KiraError> {
        let Some(first) = urls.first() else {
            return Ok(ProbeOutcome::Unavailable);
        };
        let parts = std::slice::from_ref(first);
        let mut reader = RecordReader::new(&self.transport, parts);
        let mut record = FastqRecord::default();
        let mut total_bases = 0u64;

        while reader.records_read() < max_records {
            self.cancel.check()?;
            if !reader.read_record(&mut record)? {
                break;
            }
            total_bases += record.bases();
        }

        let records = reader.records_read();
        if records == 0 {
            tracing::warn!(url = first.as_str(), "probe read no complete records");
            return Ok(ProbeOutcome::Unavailable);
        }
        let mean_length = total_bases as f64 / records as f64;
        tracing::info!(
            url = first.as_str(),
            records,
            mean_length,
            "probed mean record length"
        );
        Ok(ProbeOutcome::Measured {
            mean_length,
            records,
        })
    }
}
