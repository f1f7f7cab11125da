use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::catalog::SequencingRun;
use crate::error::KiraError;
use crate::subsample::SubsampleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileRole {
    ShortR1,
    ShortR2,
    LongRead,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceRecord {
    pub filename: String,
    pub path: String,
    pub role: FileRole,
    pub run_accession: String,
    pub sample_accession: String,
    pub study_accession: String,
    pub platform: String,
    pub organism: String,
    pub source_urls: Vec<String>,
    pub target_mode: String,
    pub target_value: u64,
    pub records: u64,
    pub bases: u64,
    pub output_bytes: u64,
    pub sha256: String,
    pub created_utc: String,
}

impl ProvenanceRecord {
    pub fn build(
        run: &SequencingRun,
        role: FileRole,
        result: &SubsampleResult,
    ) -> Result<Self, KiraError> {
        let filename = result
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self {
            filename,
            path: result.path.display().to_string(),
            role,
            run_accession: run.run_accession.to_string(),
            sample_accession: run.sample_accession.clone(),
            study_accession: run.study_accession.clone(),
            platform: run.platform.clone(),
            organism: run.organism.clone(),
            source_urls: result.urls.clone(),
            target_mode: result.target.mode().to_string(),
            target_value: result.target.value(),
            records: result.records,
            bases: result.bases,
            output_bytes: result.output_bytes,
            sha256: sha256_file(&result.path)?,
            created_utc: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        })
    }
}

pub fn sha256_file(path: &Path) -> Result<String, KiraError> {
    let mut file = File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8 * 1024 * 1024];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(KiraError::Filesystem(err.to_string())),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
