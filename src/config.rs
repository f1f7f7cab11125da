use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-stream.json";
pub const ENA_PORTAL_API: &str = "https://www.ebi.ac.uk/ena/portal/api";
pub const DEFAULT_GENOME_SIZE: u64 = 5_000_000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub max_candidates: Option<usize>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub coverage: Option<CoverageEntry>,
    #[serde(default)]
    pub genome_sizes: BTreeMap<String, u64>,
    #[serde(default)]
    pub default_genome_size: Option<u64>,
    #[serde(default)]
    pub subsample: Option<SubsampleEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CoverageEntry {
    #[serde(default)]
    pub short: Option<f64>,
    #[serde(default)]
    pub long: Option<f64>,
    #[serde(default)]
    pub inflation: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SubsampleEntry {
    #[serde(default)]
    pub probe_records: Option<u64>,
    #[serde(default)]
    pub size_check_interval: Option<u64>,
    #[serde(default)]
    pub near_target_ratio: Option<f64>,
    #[serde(default)]
    pub hard_cap_mb: Option<u64>,
    #[serde(default)]
    pub hard_cap_check_interval: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubsampleSettings {
    pub probe_records: u64,
    pub size_check_interval: u64,
    pub near_target_ratio: f64,
    pub hard_cap_bytes: Option<u64>,
    pub hard_cap_check_interval: u64,
}

impl Default for SubsampleSettings {
    fn default() -> Self {
        Self {
            probe_records: 5000,
            size_check_interval: 5000,
            near_target_ratio: 0.9,
            hard_cap_bytes: None,
            hard_cap_check_interval: 50_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenomeSizes {
    sizes: BTreeMap<String, u64>,
    default_size: u64,
}

impl GenomeSizes {
    pub fn new(sizes: BTreeMap<String, u64>, default_size: u64) -> Self {
        let sizes = sizes
            .into_iter()
            .map(|(name, size)| (normalize_organism(&name), size))
            .collect();
        Self {
            sizes,
            default_size,
        }
    }

    pub fn get(&self, organism: &str) -> Option<u64> {
        self.sizes.get(&normalize_organism(organism)).copied()
    }

    pub fn lookup(&self, organism: &str) -> u64 {
        match self.get(organism) {
            Some(size) => size,
            None => {
                tracing::warn!(
                    organism,
                    default_size = self.default_size,
                    "genome size unknown; using default"
                );
                self.default_size
            }
        }
    }
}

impl Default for GenomeSizes {
    fn default() -> Self {
        Self::new(builtin_genome_sizes(), DEFAULT_GENOME_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalog_url: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Whole-request limit, body included; `None` leaves long streams unbounded.
    pub request_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub max_candidates: usize,
    pub strategy: String,
    pub coverage_short: f64,
    pub coverage_long: f64,
    pub coverage_inflation: f64,
    pub genome_sizes: GenomeSizes,
    pub subsample: SubsampleSettings,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            catalog_url: ENA_PORTAL_API.to_string(),
            user_agent: format!("kira-stream/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            retry: RetryPolicy::default(),
            max_candidates: 200,
            strategy: "WGS".to_string(),
            coverage_short: 50.0,
            coverage_long: 30.0,
            coverage_inflation: 1.1,
            genome_sizes: GenomeSizes::default(),
            subsample: SubsampleSettings::default(),
        }
    }
}

impl ResolvedConfig {
    pub fn needed_bases(&self, genome_size: u64, coverage: f64) -> u64 {
        (genome_size as f64 * coverage * self.coverage_inflation).round() as u64
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match default_config_path() {
                Some(found) => found,
                None => return Ok(ResolvedConfig::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();

        let retry = config.retry.unwrap_or_default();
        let retry = RetryPolicy {
            max_attempts: retry.max_attempts.unwrap_or(defaults.retry.max_attempts),
            base_delay: retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
        };
        if retry.max_attempts == 0 {
            return Err(KiraError::ConfigParse(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        let coverage = config.coverage.unwrap_or_default();
        let coverage_short = coverage.short.unwrap_or(defaults.coverage_short);
        let coverage_long = coverage.long.unwrap_or(defaults.coverage_long);
        let coverage_inflation = coverage.inflation.unwrap_or(defaults.coverage_inflation);
        if coverage_short <= 0.0 || coverage_long <= 0.0 || coverage_inflation <= 0.0 {
            return Err(KiraError::ConfigParse(
                "coverage values must be positive".to_string(),
            ));
        }

        let mut sizes = builtin_genome_sizes();
        sizes.extend(config.genome_sizes);
        let genome_sizes = GenomeSizes::new(
            sizes,
            config.default_genome_size.unwrap_or(DEFAULT_GENOME_SIZE),
        );

        let sub = config.subsample.unwrap_or_default();
        let base = defaults.subsample;
        let subsample = SubsampleSettings {
            probe_records: sub.probe_records.unwrap_or(base.probe_records).max(1),
            size_check_interval: sub
                .size_check_interval
                .unwrap_or(base.size_check_interval)
                .max(1),
            near_target_ratio: sub.near_target_ratio.unwrap_or(base.near_target_ratio),
            hard_cap_bytes: sub
                .hard_cap_mb
                .map(|mb| mb * crate::domain::BYTES_PER_MB),
            hard_cap_check_interval: sub
                .hard_cap_check_interval
                .unwrap_or(base.hard_cap_check_interval)
                .max(1),
        };
        if !(0.0..=1.0).contains(&subsample.near_target_ratio) {
            return Err(KiraError::ConfigParse(
                "subsample.near_target_ratio must be within 0..=1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            catalog_url: config.catalog_url.unwrap_or(defaults.catalog_url),
            user_agent: defaults.user_agent,
            connect_timeout: config
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: config.timeout_secs.map(Duration::from_secs),
            retry,
            max_candidates: config.max_candidates.unwrap_or(defaults.max_candidates).max(1),
            strategy: config
                .strategy
                .map(|value| value.trim().to_uppercase())
                .unwrap_or(defaults.strategy),
            coverage_short,
            coverage_long,
            coverage_inflation,
            genome_sizes,
            subsample,
        })
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    BaseDirs::new()
        .map(|dirs| {
            dirs.config_dir()
                .join("kira-stream")
                .join(DEFAULT_CONFIG_FILE)
        })
        .filter(|path| path.exists())
}

pub fn normalize_organism(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn builtin_genome_sizes() -> BTreeMap<String, u64> {
    [
        ("escherichia coli", 4_600_000),
        ("e. coli", 4_600_000),
        ("staphylococcus aureus", 2_800_000),
        ("s. aureus", 2_800_000),
        ("bacillus subtilis", 4_200_000),
        ("pseudomonas aeruginosa", 6_300_000),
        ("saccharomyces cerevisiae", 12_000_000),
        ("homo sapiens", 3_200_000_000),
        ("human", 3_200_000_000),
    ]
    .into_iter()
    .map(|(name, size)| (name.to_string(), size))
    .collect()
}
