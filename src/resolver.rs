use crate::catalog::{self, RUN_FIELDS, SequencingRun};
use crate::config::{ResolvedConfig, normalize_organism};
use crate::domain::{PlatformClass, RunAccession};
use crate::error::KiraError;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub label: &'static str,
    pub expression: String,
}

pub struct MetadataResolver<T: Transport> {
    transport: T,
    catalog_url: String,
}

impl<T: Transport> MetadataResolver<T> {
    pub fn new(transport: T, config: &ResolvedConfig) -> Self {
        Self {
            transport,
            catalog_url: config.catalog_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn resolve(
        &self,
        organism: &str,
        class: PlatformClass,
        strategy: &str,
        max_candidates: usize,
    ) -> Result<SequencingRun, KiraError> {
        let variants = build_query_variants(organism, class, strategy);
        for variant in &variants {
            if let Some(run) = self.first_valid(variant, Some(organism), class, max_candidates)? {
                return Ok(run);
            }
            tracing::info!(query = variant.label, %class, "query exhausted without a usable run");
        }
        Err(KiraError::NotFound(format!(
            "{organism} ({class}, {strategy}): {} query variant(s) exhausted",
            variants.len()
        )))
    }

    pub fn resolve_same_sample(
        &self,
        sample_id: &str,
        class: PlatformClass,
        strategy: &str,
        max_candidates: usize,
    ) -> Result<SequencingRun, KiraError> {
        let variant = CandidateQuery {
            label: "same-sample",
            expression: format!(
                "sample_accession=\"{}\" AND {}{}",
                sample_id.trim(),
                platform_clause(class.platforms()),
                strategy_clause(strategy)
            ),
        };
        self.first_valid(&variant, None, class, max_candidates)?
            .ok_or_else(|| {
                KiraError::NotFound(format!("no {class} run for sample {sample_id}"))
            })
    }

    fn first_valid(
        &self,
        variant: &CandidateQuery,
        organism: Option<&str>,
        class: PlatformClass,
        max_candidates: usize,
    ) -> Result<Option<SequencingRun>, KiraError> {
        let candidates = self.search(variant, max_candidates)?;
        tracing::info!(
            query = variant.label,
            candidates = candidates.len(),
            "catalog search returned"
        );
        for accession in candidates {
            match self.validate(&accession, organism, class) {
                Ok(run) => {
                    tracing::info!(
                        run = %run.run_accession,
                        sample = run.sample_accession.as_str(),
                        platform = run.platform.as_str(),
                        "selected run"
                    );
                    return Ok(Some(run));
                }
                Err(reason) => {
                    tracing::warn!(run = %accession, %reason, "skipping candidate");
                }
            }
        }
        Ok(None)
    }

    fn search(
        &self,
        variant: &CandidateQuery,
        max_candidates: usize,
    ) -> Result<Vec<RunAccession>, KiraError> {
        let url = format!("{}/search", self.catalog_url);
        let limit = max_candidates.to_string();
        let text = self.transport.fetch_text(
            &url,
            &[
                ("result", "read_run"),
                ("query", variant.expression.as_str()),
                ("fields", "run_accession"),
                ("format", "tsv"),
                ("limit", limit.as_str()),
            ],
        )?;
        // zero hits come back as an empty body rather than a bare header
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut runs = catalog::parse_run_summaries(&text)?;
        runs.truncate(max_candidates);
        Ok(runs)
    }

    pub fn fetch_run(&self, accession: &RunAccession) -> Result<SequencingRun, KiraError> {
        let url = format!("{}/filereport", self.catalog_url);
        let text = self.transport.fetch_text(
            &url,
            &[
                ("accession", accession.as_str()),
                ("result", "read_run"),
                ("fields", RUN_FIELDS),
                ("format", "tsv"),
            ],
        )?;
        catalog::parse_run(&text)
    }

    fn validate(
        &self,
        accession: &RunAccession,
        organism: Option<&str>,
        class: PlatformClass,
    ) -> Result<SequencingRun, String> {
        let run = self
            .fetch_run(accession)
            .map_err(|err| format!("metadata unavailable: {err}"))?;
        if let Some(organism) = organism {
            if !organism_matches(organism, &run.organism) {
                return Err(format!("organism mismatch: {}", run.organism));
            }
        }
        if !run.platform.is_empty() && !platform_matches(class, &run.platform) {
            return Err(format!("platform {} is not {class}", run.platform));
        }
        if !run.is_usable() {
            return Err("no FASTQ links".to_string());
        }
        Ok(run)
    }
}

pub fn build_query_variants(
    organism: &str,
    class: PlatformClass,
    strategy: &str,
) -> Vec<CandidateQuery> {
    let base = format!(
        "scientific_name=\"{}\"{}",
        organism.split_whitespace().collect::<Vec<_>>().join(" "),
        strategy_clause(strategy)
    );
    match class {
        PlatformClass::Short => vec![
            CandidateQuery {
                label: "illumina-paired",
                expression: format!(
                    "{base} AND instrument_platform=\"ILLUMINA\" AND library_layout=\"PAIRED\""
                ),
            },
            CandidateQuery {
                label: "short-any-layout",
                expression: format!("{base} AND {}", platform_clause(class.platforms())),
            },
        ],
        PlatformClass::Long => vec![CandidateQuery {
            label: "long-read",
            expression: format!("{base} AND {}", platform_clause(class.platforms())),
        }],
    }
}

fn platform_clause(platforms: &[&str]) -> String {
    let parts = platforms
        .iter()
        .map(|platform| format!("instrument_platform=\"{platform}\""))
        .collect::<Vec<_>>();
    format!("({})", parts.join(" OR "))
}

fn strategy_clause(strategy: &str) -> String {
    let strategy = strategy.trim();
    if strategy.is_empty() {
        String::new()
    } else {
        format!(" AND library_strategy=\"{}\"", strategy.to_uppercase())
    }
}

pub fn organism_matches(requested: &str, reported: &str) -> bool {
    normalize_organism(requested) == normalize_organism(reported)
}

fn platform_matches(class: PlatformClass, platform: &str) -> bool {
    let platform = platform.trim().to_ascii_uppercase();
    class.platforms().iter().any(|known| *known == platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organism_match_is_exact_modulo_case_and_spacing() {
        assert!(organism_matches(
            "Staphylococcus aureus",
            "staphylococcus   aureus"
        ));
        assert!(organism_matches(" E. coli", "e. COLI "));
        assert!(!organism_matches(
            "Staphylococcus aureus",
            "Staphylococcus aureus subsp. aureus"
        ));
        assert!(!organism_matches("Staphylococcus", "Staphylococcus aureus"));
    }

    #[test]
    fn short_variants_tighten_first() {
        let variants = build_query_variants("Staphylococcus  aureus", PlatformClass::Short, "wgs");
        assert_eq!(variants.len(), 2);
        assert_eq!(
            variants[0].expression,
            "scientific_name=\"Staphylococcus aureus\" AND library_strategy=\"WGS\" AND instrument_platform=\"ILLUMINA\" AND library_layout=\"PAIRED\""
        );
        assert!(variants[1].expression.ends_with(
            "(instrument_platform=\"ILLUMINA\" OR instrument_platform=\"ION_TORRENT\")"
        ));
    }

    #[test]
    fn long_is_single_variant() {
        let variants = build_query_variants("Escherichia coli", PlatformClass::Long, "");
        assert_eq!(variants.len(), 1);
        assert_eq!(
            variants[0].expression,
            "scientific_name=\"Escherichia coli\" AND (instrument_platform=\"OXFORD_NANOPORE\" OR instrument_platform=\"PACBIO_SMRT\")"
        );
    }

    #[test]
    fn platform_check() {
        assert!(platform_matches(PlatformClass::Short, "illumina"));
        assert!(!platform_matches(PlatformClass::Short, "OXFORD_NANOPORE"));
    }
}
