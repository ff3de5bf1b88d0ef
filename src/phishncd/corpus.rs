use crate::phishncd::error::{ClassifyError, Result};
use crate::phishncd::preprocess::{Artifact, ArtifactKind};
use crate::phishncd::similarity::SimilarityScore;
use crate::phishncd::stats::RunStats;
use atomic_counter::AtomicCounter;
use rayon::prelude::*;
use serde_json::Value;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Closest reference entry of one corpus.
#[derive(Clone, Debug, PartialEq)]
pub struct BestMatch {
    pub file: Option<String>,
    pub score: SimilarityScore,
}

impl BestMatch {
    pub fn none() -> Self {
        Self {
            file: None,
            score: SimilarityScore::unmatched(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.file.is_some()
    }

    pub fn file_json(&self) -> Value {
        self.file.clone().map_or(Value::Null, Value::String)
    }

    pub fn scores_json(&self) -> Value {
        if self.is_match() {
            self.score.to_json()
        } else {
            Value::Null
        }
    }
}

/// A scored corpus entry tagged with its position in scan order.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub index: usize,
    pub file: String,
    pub score: SimilarityScore,
}

/// The candidate with the lowest NCD; on equal NCD the earlier entry in scan
/// order. Independent of the order candidates arrive in.
pub fn select_best<I>(candidates: I) -> BestMatch
where
    I: IntoIterator<Item = Candidate>,
{
    candidates
        .into_iter()
        .reduce(closer)
        .map_or_else(BestMatch::none, Candidate::into_best)
}

fn closer(left: Candidate, right: Candidate) -> Candidate {
    match left
        .score
        .ncd
        .total_cmp(&right.score.ncd)
        .then(left.index.cmp(&right.index))
    {
        Ordering::Greater => right,
        _ => left,
    }
}

impl Candidate {
    fn into_best(self) -> BestMatch {
        BestMatch {
            file: Some(self.file),
            score: self.score,
        }
    }
}

/// Regular files of a corpus directory sorted by file name.
pub fn list_corpus(dir: &Path, kind: &ArtifactKind) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Err(ClassifyError::Config(format!(
            "corpus directory {} not found",
            dir.display()
        )));
    }
    let mut entries = Vec::new();
    for entry_result in std::fs::read_dir(dir)? {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Unable to read directory entry in {}: {}", dir.display(), err);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() || !kind.accepts(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((name, path));
    }
    entries.sort_by(|left, right| left.0.cmp(&right.0));
    Ok(entries)
}

/// Finds the reference entry closest to a query in one labeled directory.
pub struct CorpusScanner<'a> {
    kind: ArtifactKind,
    stats: &'a RunStats,
}

impl<'a> CorpusScanner<'a> {
    pub fn new(kind: ArtifactKind, stats: &'a RunStats) -> Self {
        Self { kind, stats }
    }

    /// Entries that cannot be read or canonicalized are skipped. A missing
    /// directory behaves as an empty corpus.
    pub fn scan(&self, dir: &Path, query: &Artifact) -> BestMatch {
        let entries = match list_corpus(dir, &self.kind) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("{}; treating it as empty", err);
                return BestMatch::none();
            }
        };

        let candidates: Vec<Candidate> = entries
            .par_iter()
            .enumerate()
            .filter_map(|(index, (file, path))| {
                let reference = match self.load(path) {
                    Ok(reference) => reference,
                    Err(err) => {
                        self.stats.entries_skipped.inc();
                        log::warn!("Skipping corpus entry {}: {}", path.display(), err);
                        return None;
                    }
                };
                self.stats.entries_scanned.inc();
                self.stats
                    .bytes_compared
                    .add(query.canonical.len() + reference.canonical.len());
                let score = query.compare(&reference);
                log::debug!("{} ncd={:.4} {}", self.kind.as_str(), score.ncd, file);
                Some(Candidate {
                    index,
                    file: file.clone(),
                    score,
                })
            })
            .collect();
        let best = select_best(candidates);
        if let Some(file) = best.file.as_deref() {
            let entry = dir.join(file);
            self.stats
                .record_best(entry.to_string_lossy().as_ref(), best.score.ncd);
        }

        log::info!(
            "Scanned {} {} entries in {}, best match {:?}",
            entries.len(),
            self.kind.as_str(),
            dir.display(),
            best.file
        );
        best
    }

    fn load(&self, path: &Path) -> Result<Artifact> {
        let raw = std::fs::read(path)?;
        self.kind.canonicalize(raw.as_slice())
    }
}
