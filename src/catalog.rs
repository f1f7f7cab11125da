use std::collections::HashMap;

use serde::Serialize;

use crate::domain::{LibraryLayout, RunAccession};
use crate::error::KiraError;

pub const RUN_FIELDS: &str = "run_accession,sample_accession,study_accession,scientific_name,instrument_platform,instrument_model,library_layout,library_strategy,fastq_ftp,submitted_ftp,submitted_format";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequencingRun {
    pub run_accession: RunAccession,
    pub sample_accession: String,
    pub study_accession: String,
    pub organism: String,
    pub platform: String,
    pub instrument_model: String,
    pub layout: LibraryLayout,
    pub strategy: String,
    pub fastq_urls: Vec<String>,
    pub submitted_urls: Vec<String>,
    pub submitted_format: String,
}

impl SequencingRun {
    pub fn read_urls(&self) -> Option<&[String]> {
        if !self.fastq_urls.is_empty() {
            return Some(&self.fastq_urls);
        }
        if !self.submitted_urls.is_empty() && is_fastq_format(&self.submitted_format) {
            return Some(&self.submitted_urls);
        }
        None
    }

    pub fn is_usable(&self) -> bool {
        self.read_urls().is_some()
    }
}

fn is_fastq_format(format: &str) -> bool {
    format
        .split([';', ','])
        .any(|item| item.trim().eq_ignore_ascii_case("fastq"))
}

pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let rest = trimmed
        .strip_prefix("ftp://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed);
    format!("https://{rest}")
}

pub fn split_links(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(normalize_link)
        .collect()
}

struct Table {
    header: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn parse(text: &str) -> Result<Self, KiraError> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let header_line = lines
            .next()
            .ok_or_else(|| KiraError::MetadataInvalid("empty catalog response".to_string()))?;
        let header = header_line
            .split('\t')
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect::<HashMap<_, _>>();
        if !header.contains_key("run_accession") {
            return Err(KiraError::MetadataInvalid(format!(
                "missing run_accession column in header: {header_line}"
            )));
        }
        let rows = lines
            .map(|line| line.split('\t').map(|cell| cell.trim().to_string()).collect())
            .collect();
        Ok(Self { header, rows })
    }

    fn cell<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        self.header
            .get(name)
            .and_then(|idx| row.get(*idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

pub fn parse_run_summaries(text: &str) -> Result<Vec<RunAccession>, KiraError> {
    let table = Table::parse(text)?;
    let mut out = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let raw = table.cell(row, "run_accession");
        match raw.parse::<RunAccession>() {
            Ok(id) => out.push(id),
            Err(_) => tracing::warn!(value = raw, "skipping catalog row with invalid run accession"),
        }
    }
    Ok(out)
}

pub fn parse_run(text: &str) -> Result<SequencingRun, KiraError> {
    let table = Table::parse(text)?;
    let row = table
        .rows
        .first()
        .ok_or_else(|| KiraError::MetadataInvalid("catalog returned no rows".to_string()))?;
    let run_accession = table
        .cell(row, "run_accession")
        .parse::<RunAccession>()
        .map_err(|err| KiraError::MetadataInvalid(err.to_string()))?;
    Ok(SequencingRun {
        run_accession,
        sample_accession: table.cell(row, "sample_accession").to_string(),
        study_accession: table.cell(row, "study_accession").to_string(),
        organism: table.cell(row, "scientific_name").to_string(),
        platform: table.cell(row, "instrument_platform").to_string(),
        instrument_model: table.cell(row, "instrument_model").to_string(),
        layout: LibraryLayout::parse(table.cell(row, "library_layout")),
        strategy: table.cell(row, "library_strategy").to_string(),
        fastq_urls: split_links(table.cell(row, "fastq_ftp")),
        submitted_urls: split_links(table.cell(row, "submitted_ftp")),
        submitted_format: table.cell(row, "submitted_format").to_string(),
    })
}
