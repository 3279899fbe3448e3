// src/artifact.rs
//! Run artifacts on disk and the canonical output files.
//!
//! Layout under the output directory:
//!
//! ```text
//! raw/run_<start>_to_<end>_<created>/{mentions.csv,cooccurrences.csv,domains.csv,manifest.json}
//! uncertainty_mentions.csv
//! uncertainty_cooccurrences.csv
//! word_cloud_data.json
//! domain_distribution.csv
//! uncertainty_timeseries.json
//! ```
//!
//! Runs are written into a dot-prefixed staging directory and renamed into
//! place once complete; listing skips dot entries, so readers only ever see
//! whole artifacts.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{Reader, Writer};
use serde::Serialize;

use crate::errors::ArtifactError;
use crate::model::{
    CanonicalDataset, CoOccurrenceRecord, DomainRecord, Mention, RunArtifact, RunManifest,
    TimeSeriesPoint, TERM_SEPARATOR,
};

pub const RAW_DIR: &str = "raw";
pub const RUN_PREFIX: &str = "run_";

const RUN_MENTIONS: &str = "mentions.csv";
const RUN_COOCCURRENCES: &str = "cooccurrences.csv";
const RUN_DOMAINS: &str = "domains.csv";
const RUN_MANIFEST: &str = "manifest.json";

pub const CANONICAL_MENTIONS: &str = "uncertainty_mentions.csv";
pub const CANONICAL_COOCCURRENCES: &str = "uncertainty_cooccurrences.csv";
pub const CANONICAL_WORD_CLOUD: &str = "word_cloud_data.json";
pub const CANONICAL_DOMAINS: &str = "domain_distribution.csv";
pub const CANONICAL_TIMESERIES: &str = "uncertainty_timeseries.json";

const MENTION_HEADER: [&str; 6] = ["date", "url", "domain", "keyword", "terms", "context"];

/// Where one artifact lives; `id` is the run id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArtifactLocation {
    pub id: String,
    pub path: PathBuf,
}

/// Source of run artifacts for the aggregator.
pub trait ArtifactProvider {
    /// Every complete artifact currently present, in a stable order.
    fn list(&self) -> Result<Vec<ArtifactLocation>, ArtifactError>;
    fn load(&self, loc: &ArtifactLocation) -> Result<RunArtifact, ArtifactError>;
}

/// Artifacts under `<output>/raw`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `<output_dir>/raw`.
    pub fn under_output(output_dir: &Path) -> Self {
        Self::new(output_dir.join(RAW_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write-then-publish: staging directory first, one rename at the end.
    pub fn write_run(&self, artifact: &RunArtifact) -> Result<PathBuf, ArtifactError> {
        let id = &artifact.manifest.run_id;
        fs::create_dir_all(&self.root).map_err(|e| ArtifactError::io(&self.root, e))?;

        let final_dir = self.root.join(id);
        if final_dir.exists() {
            return Err(ArtifactError::io(
                &final_dir,
                io::Error::new(io::ErrorKind::AlreadyExists, "run directory already exists"),
            ));
        }
        let staging = self.root.join(format!(".staging_{id}"));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| ArtifactError::io(&staging, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| ArtifactError::io(&staging, e))?;

        write_file(&staging.join(RUN_MENTIONS), &mentions_csv(&artifact.mentions)?)?;
        write_file(
            &staging.join(RUN_COOCCURRENCES),
            &table_csv(
                ["term", "frequency"],
                artifact.cooccurrences.iter().map(|r| (r.term.as_str(), r.frequency)),
            )?,
        )?;
        write_file(
            &staging.join(RUN_DOMAINS),
            &table_csv(
                ["domain", "mention_count"],
                artifact.domains.iter().map(|r| (r.domain.as_str(), r.mention_count)),
            )?,
        )?;
        let manifest = staging.join(RUN_MANIFEST);
        write_file(&manifest, &json_bytes(&manifest, &artifact.manifest)?)?;

        fs::rename(&staging, &final_dir).map_err(|e| ArtifactError::io(&final_dir, e))?;
        Ok(final_dir)
    }
}

impl ArtifactProvider for FsArtifactStore {
    fn list(&self) -> Result<Vec<ArtifactLocation>, ArtifactError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArtifactError::io(&self.root, e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArtifactError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(RUN_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            out.push(ArtifactLocation {
                id: name,
                path: entry.path(),
            });
        }
        out.sort();
        Ok(out)
    }

    fn load(&self, loc: &ArtifactLocation) -> Result<RunArtifact, ArtifactError> {
        let manifest_path = loc.path.join(RUN_MANIFEST);
        let raw = read_file(&manifest_path)?;
        let manifest: RunManifest = serde_json::from_slice(&raw)
            .map_err(|e| ArtifactError::corrupt(&manifest_path, e))?;

        let mentions = read_mentions_csv(&loc.path.join(RUN_MENTIONS))?;

        let cooccurrences = read_table_csv(&loc.path.join(RUN_COOCCURRENCES))?
            .into_iter()
            .map(|(term, frequency)| CoOccurrenceRecord { term, frequency })
            .collect();
        let domains = read_table_csv(&loc.path.join(RUN_DOMAINS))?
            .into_iter()
            .map(|(domain, mention_count)| DomainRecord {
                domain,
                mention_count,
            })
            .collect();

        Ok(RunArtifact {
            manifest,
            mentions,
            cooccurrences,
            domains,
        })
    }
}

/// Artifacts held in memory; `None` entries behave like corrupt files.
#[derive(Debug, Default, Clone)]
pub struct InMemoryArtifacts {
    items: Vec<(String, Option<RunArtifact>)>,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, artifact: RunArtifact) {
        self.items.push((artifact.manifest.run_id.clone(), Some(artifact)));
    }

    pub fn push_corrupt(&mut self, id: impl Into<String>) {
        self.items.push((id.into(), None));
    }
}

impl ArtifactProvider for InMemoryArtifacts {
    fn list(&self) -> Result<Vec<ArtifactLocation>, ArtifactError> {
        let mut out: Vec<ArtifactLocation> = self
            .items
            .iter()
            .map(|(id, _)| ArtifactLocation {
                id: id.clone(),
                path: PathBuf::from(id),
            })
            .collect();
        out.sort();
        Ok(out)
    }

    fn load(&self, loc: &ArtifactLocation) -> Result<RunArtifact, ArtifactError> {
        match self.items.iter().find(|(id, _)| *id == loc.id) {
            Some((_, Some(a))) => Ok(a.clone()),
            Some((_, None)) => Err(ArtifactError::corrupt(&loc.path, "unreadable")),
            None => Err(ArtifactError::io(
                &loc.path,
                io::Error::new(io::ErrorKind::NotFound, "no such artifact"),
            )),
        }
    }
}

#[derive(Serialize)]
struct WordCloudEntry<'a> {
    text: &'a str,
    value: u64,
}

/// Replace the canonical files in `dir`.
///
/// Every file is first written and synced under a dot-prefixed temp name;
/// only once all of them are on disk are they renamed over the previous
/// versions, mentions last. A failed pass leaves the previous set untouched.
/// The renames are separate, so a reader racing a pass can briefly pair new
/// tables with the previous mentions file.
pub fn write_canonical(
    dir: &Path,
    dataset: &CanonicalDataset,
    series: &[TimeSeriesPoint],
    word_cloud_max: usize,
) -> Result<(), ArtifactError> {
    fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;

    let cloud: Vec<WordCloudEntry> = dataset
        .cooccurrences
        .iter()
        .take(word_cloud_max)
        .map(|r| WordCloudEntry {
            text: &r.term,
            value: r.frequency,
        })
        .collect();

    let cloud_path = dir.join(CANONICAL_WORD_CLOUD);
    let series_path = dir.join(CANONICAL_TIMESERIES);
    let files = [
        (
            dir.join(CANONICAL_COOCCURRENCES),
            table_csv(
                ["word", "co_occurrences_with_uncertainty"],
                dataset.cooccurrences.iter().map(|r| (r.term.as_str(), r.frequency)),
            )?,
        ),
        (
            dir.join(CANONICAL_DOMAINS),
            table_csv(
                ["domain", "mention_count"],
                dataset.domains.iter().map(|r| (r.domain.as_str(), r.mention_count)),
            )?,
        ),
        (cloud_path.clone(), json_bytes(&cloud_path, &cloud)?),
        (series_path.clone(), json_bytes(&series_path, series)?),
        (dir.join(CANONICAL_MENTIONS), mentions_csv(&dataset.mentions)?),
    ];

    let mut staged = Vec::with_capacity(files.len());
    for (path, bytes) in &files {
        let tmp = temp_path(path);
        if let Err(e) = write_file(&tmp, bytes) {
            for (t, _) in &staged {
                let _ = fs::remove_file(t);
            }
            return Err(e);
        }
        staged.push((tmp, path));
    }
    for (tmp, path) in staged {
        fs::rename(&tmp, path).map_err(|e| ArtifactError::io(path, e))?;
    }
    Ok(())
}

pub fn load_canonical_mentions(dir: &Path) -> Result<Vec<Mention>, ArtifactError> {
    read_mentions_csv(&dir.join(CANONICAL_MENTIONS))
}

pub fn load_canonical_cooccurrences(dir: &Path) -> Result<Vec<CoOccurrenceRecord>, ArtifactError> {
    Ok(read_table_csv(&dir.join(CANONICAL_COOCCURRENCES))?
        .into_iter()
        .map(|(term, frequency)| CoOccurrenceRecord { term, frequency })
        .collect())
}

pub fn load_canonical_domains(dir: &Path) -> Result<Vec<DomainRecord>, ArtifactError> {
    Ok(read_table_csv(&dir.join(CANONICAL_DOMAINS))?
        .into_iter()
        .map(|(domain, mention_count)| DomainRecord {
            domain,
            mention_count,
        })
        .collect())
}

fn mentions_csv(mentions: &[Mention]) -> Result<Vec<u8>, ArtifactError> {
    let mut w = Writer::from_writer(Vec::new());
    w.write_record(MENTION_HEADER).map_err(csv_write_err)?;
    for m in mentions {
        if let Some(bad) = m.co_occurring_terms.iter().find(|t| t.contains(TERM_SEPARATOR)) {
            return Err(ArtifactError::io(
                "<csv buffer>",
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("term {bad:?} contains the separator {TERM_SEPARATOR:?}"),
                ),
            ));
        }
        let terms = m
            .co_occurring_terms
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(&TERM_SEPARATOR.to_string());
        w.write_record([
            m.date.format("%Y-%m-%d").to_string(),
            m.url.clone(),
            m.source_domain.clone(),
            m.matched_keyword.clone(),
            terms,
            m.context_snippet(),
        ])
        .map_err(csv_write_err)?;
    }
    finish_csv(w)
}

fn table_csv<'a, I>(header: [&str; 2], rows: I) -> Result<Vec<u8>, ArtifactError>
where
    I: IntoIterator<Item = (&'a str, u64)>,
{
    let mut w = Writer::from_writer(Vec::new());
    w.write_record(header).map_err(csv_write_err)?;
    for (name, count) in rows {
        w.write_record([name, count.to_string().as_str()])
            .map_err(csv_write_err)?;
    }
    finish_csv(w)
}

fn read_mentions_csv(path: &Path) -> Result<Vec<Mention>, ArtifactError> {
    let raw = read_file(path)?;
    let mut reader = Reader::from_reader(raw.as_slice());
    let mut out = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| ArtifactError::corrupt(path, e))?;
        if record.len() < MENTION_HEADER.len() {
            return Err(ArtifactError::corrupt(
                path,
                format!("row {}: expected {} columns", i + 1, MENTION_HEADER.len()),
            ));
        }
        let date = NaiveDate::parse_from_str(&record[0], "%Y-%m-%d")
            .map_err(|e| ArtifactError::corrupt(path, format!("row {}: date: {e}", i + 1)))?;
        out.push(Mention {
            date,
            url: record[1].to_string(),
            source_domain: record[2].to_string(),
            matched_keyword: record[3].to_string(),
            co_occurring_terms: record[4]
                .split(TERM_SEPARATOR)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            context_window: record[5].split_whitespace().map(str::to_string).collect(),
        });
    }
    Ok(out)
}

fn read_table_csv(path: &Path) -> Result<Vec<(String, u64)>, ArtifactError> {
    let raw = read_file(path)?;
    let mut reader = Reader::from_reader(raw.as_slice());
    let mut out = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| ArtifactError::corrupt(path, e))?;
        if record.len() < 2 {
            return Err(ArtifactError::corrupt(path, format!("row {}: expected 2 columns", i + 1)));
        }
        let count: u64 = record[1]
            .trim()
            .parse()
            .map_err(|e| ArtifactError::corrupt(path, format!("row {}: count: {e}", i + 1)))?;
        out.push((record[0].to_string(), count));
    }
    Ok(out)
}

fn csv_write_err(e: csv::Error) -> ArtifactError {
    ArtifactError::io("<csv buffer>", io::Error::from(e))
}

fn finish_csv(w: Writer<Vec<u8>>) -> Result<Vec<u8>, ArtifactError> {
    w.into_inner()
        .map_err(|e| ArtifactError::io("<csv buffer>", io::Error::other(e.to_string())))
}

fn json_bytes<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<Vec<u8>, ArtifactError> {
    let mut out = serde_json::to_vec_pretty(value)
        .map_err(|e| ArtifactError::io(path, io::Error::other(e)))?;
    out.push(b'\n');
    Ok(out)
}

/// Missing files inside an artifact make it corrupt; other errors are i/o.
fn read_file(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ArtifactError::corrupt(path, "missing file"),
        _ => ArtifactError::io(path, e),
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut f = File::create(path).map_err(|e| ArtifactError::io(path, e))?;
    f.write_all(bytes).map_err(|e| ArtifactError::io(path, e))?;
    f.sync_all().map_err(|e| ArtifactError::io(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
