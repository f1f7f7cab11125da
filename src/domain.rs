use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunAccession(String);

impl RunAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let has_prefix = ["SRR", "ERR", "DRR"]
            .iter()
            .any(|prefix| normalized.starts_with(prefix));
        let digits = normalized.get(3..).unwrap_or("");
        if !has_prefix || digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(KiraError::InvalidRunAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlatformClass {
    Short,
    Long,
}

impl PlatformClass {
    pub fn platforms(self) -> &'static [&'static str] {
        match self {
            PlatformClass::Short => &["ILLUMINA", "ION_TORRENT"],
            PlatformClass::Long => &["OXFORD_NANOPORE", "PACBIO_SMRT"],
        }
    }
}

impl fmt::Display for PlatformClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformClass::Short => write!(f, "SHORT"),
            PlatformClass::Long => write!(f, "LONG"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LibraryLayout {
    Paired,
    Single,
    Unknown,
}

impl LibraryLayout {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PAIRED" => LibraryLayout::Paired,
            "SINGLE" => LibraryLayout::Single,
            _ => LibraryLayout::Unknown,
        }
    }
}

impl fmt::Display for LibraryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryLayout::Paired => write!(f, "PAIRED"),
            LibraryLayout::Single => write!(f, "SINGLE"),
            LibraryLayout::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "value", rename_all = "UPPERCASE")]
pub enum SubsampleTarget {
    Records(u64),
    Bases(u64),
    #[serde(rename = "MB")]
    Megabytes(u64),
}

impl SubsampleTarget {
    pub fn mode(&self) -> &'static str {
        match self {
            SubsampleTarget::Records(_) => "RECORDS",
            SubsampleTarget::Bases(_) => "BASES",
            SubsampleTarget::Megabytes(_) => "MB",
        }
    }

    pub fn value(&self) -> u64 {
        match self {
            SubsampleTarget::Records(value)
            | SubsampleTarget::Bases(value)
            | SubsampleTarget::Megabytes(value) => *value,
        }
    }

    pub fn validate(&self) -> Result<(), KiraError> {
        if self.value() == 0 {
            return Err(KiraError::InvalidTarget(format!(
                "{} target must be positive",
                self.mode()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SubsampleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.mode(), self.value())
    }
}
