#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use kira_readstream::catalog::RUN_FIELDS;
use kira_readstream::config::ResolvedConfig;
use kira_readstream::error::KiraError;
use kira_readstream::transport::{ByteStream, Transport};

pub const CATALOG: &str = "https://catalog.test/api";

/// In-memory catalog and file host.
#[derive(Default)]
pub struct MockTransport {
    searches: HashMap<String, String>,
    reports: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
    served: Arc<AtomicU64>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search response listing `accessions` for the exact query expression.
    pub fn search(mut self, expression: &str, accessions: &[&str]) -> Self {
        let mut body = String::from("run_accession\n");
        for accession in accessions {
            body.push_str(accession);
            body.push('\n');
        }
        self.searches.insert(expression.to_string(), body);
        self
    }

    pub fn report(mut self, row: RunRow) -> Self {
        self.reports.insert(row.accession.clone(), row.to_tsv());
        self
    }

    pub fn file(mut self, url: &str, body: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), body);
        self
    }

    /// Requests for this URL, accession or search expression fail as if retries ran out.
    pub fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Bytes handed out through file streams so far.
    pub fn bytes_served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    fn exhausted(url: &str) -> KiraError {
        KiraError::TransportExhausted {
            url: url.to_string(),
            attempts: 4,
            cause: "connection reset".to_string(),
        }
    }
}

impl Transport for MockTransport {
    fn fetch(
        &self,
        url: &str,
        query: &[(&str, &str)],
        _headers: &[(&str, &str)],
    ) -> Result<ByteStream, KiraError> {
        let param = |name: &str| {
            query
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
                .unwrap_or_default()
        };

        if url == format!("{CATALOG}/search") {
            let expression = param("query");
            self.calls.lock().unwrap().push(format!("search {expression}"));
            if self.failing.contains(&expression) {
                return Err(Self::exhausted(url));
            }
            // the portal answers a search without hits with an empty body
            let body = self.searches.get(&expression).cloned().unwrap_or_default();
            return Ok(Box::new(Cursor::new(body.into_bytes())));
        }

        if url == format!("{CATALOG}/filereport") {
            let accession = param("accession");
            self.calls.lock().unwrap().push(format!("report {accession}"));
            if self.failing.contains(&accession) {
                return Err(Self::exhausted(url));
            }
            return match self.reports.get(&accession) {
                Some(body) => Ok(Box::new(Cursor::new(body.clone().into_bytes()))),
                None => Err(KiraError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                    message: "no such run".to_string(),
                }),
            };
        }

        self.calls.lock().unwrap().push(format!("file {url}"));
        if self.failing.contains(url) {
            return Err(Self::exhausted(url));
        }
        let body = self.files.get(url).cloned().ok_or_else(|| KiraError::HttpStatus {
            url: url.to_string(),
            status: 404,
            message: "missing".to_string(),
        })?;
        Ok(Box::new(CountingReader {
            inner: Cursor::new(body),
            served: Arc::clone(&self.served),
        }))
    }
}

struct CountingReader {
    inner: Cursor<Vec<u8>>,
    served: Arc<AtomicU64>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.served.fetch_add(read as u64, Ordering::SeqCst);
        Ok(read)
    }
}

/// One filereport row.
#[derive(Clone)]
pub struct RunRow {
    pub accession: String,
    pub sample: String,
    pub organism: String,
    pub platform: String,
    pub layout: String,
    pub fastq: Vec<String>,
}

impl RunRow {
    pub fn new(accession: &str, organism: &str, platform: &str) -> Self {
        Self {
            accession: accession.to_string(),
            sample: "SAMEA0000001".to_string(),
            organism: organism.to_string(),
            platform: platform.to_string(),
            layout: "PAIRED".to_string(),
            fastq: Vec::new(),
        }
    }

    pub fn sample(mut self, sample: &str) -> Self {
        self.sample = sample.to_string();
        self
    }

    pub fn layout(mut self, layout: &str) -> Self {
        self.layout = layout.to_string();
        self
    }

    /// Links as the catalog lists them, without a scheme.
    pub fn fastq(mut self, links: &[&str]) -> Self {
        self.fastq = links.iter().map(|link| link.to_string()).collect();
        self
    }

    fn to_tsv(&self) -> String {
        let header = RUN_FIELDS.replace(',', "\t");
        let cells = RUN_FIELDS
            .split(',')
            .map(|field| match field {
                "run_accession" => self.accession.clone(),
                "sample_accession" => self.sample.clone(),
                "study_accession" => "PRJEB0001".to_string(),
                "scientific_name" => self.organism.clone(),
                "instrument_platform" => self.platform.clone(),
                "instrument_model" => "model".to_string(),
                "library_layout" => self.layout.clone(),
                "library_strategy" => "WGS".to_string(),
                "fastq_ftp" => self.fastq.join(";"),
                _ => String::new(),
            })
            .collect::<Vec<_>>();
        format!("{header}\n{}\n", cells.join("\t"))
    }
}

pub fn test_config() -> ResolvedConfig {
    ResolvedConfig {
        catalog_url: CATALOG.to_string(),
        ..ResolvedConfig::default()
    }
}

/// `count` records named `{name}.{n}` with sequences of `length` bases.
pub fn fastq(name: &str, count: usize, length: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for idx in 1..=count {
        let sequence = "ACGT".repeat(length / 4 + 1);
        out.extend_from_slice(format!("@{name}.{idx}\n").as_bytes());
        out.extend_from_slice(&sequence.as_bytes()[..length]);
        out.extend_from_slice(b"\n+\n");
        out.extend_from_slice("I".repeat(length).as_bytes());
        out.push(b'\n');
    }
    out
}

/// Records with pseudo-random bases and qualities, so they compress poorly.
pub fn noisy_fastq(name: &str, count: usize, length: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };
    let mut out = Vec::new();
    for idx in 1..=count {
        out.extend_from_slice(format!("@{name}.{idx}\n").as_bytes());
        for _ in 0..length {
            out.push(b"ACGT"[(next() % 4) as usize]);
        }
        out.extend_from_slice(b"\n+\n");
        for _ in 0..length {
            out.push(b'!' + (next() % 40) as u8);
        }
        out.push(b'\n');
    }
    out
}

pub fn gz(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Decompressed text lines of a gzipped output file.
pub fn read_gz_lines(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut text = String::new();
    MultiGzDecoder::new(file).read_to_string(&mut text).unwrap();
    text.lines().map(str::to_string).collect()
}

/// Record headers of a gzipped output file, in order.
pub fn read_headers(path: &Path) -> Vec<String> {
    read_gz_lines(path)
        .chunks(4)
        .map(|chunk| chunk[0].clone())
        .collect()
}

/// Names left in `dir`, sorted.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    names.sort();
    names
}
