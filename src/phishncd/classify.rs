use crate::phishncd::corpus::{BestMatch, CorpusScanner};
use crate::phishncd::error::{ClassifyError, Result};
use crate::phishncd::fetch::PageFetcher;
use crate::phishncd::known_phish::KnownPhishList;
use crate::phishncd::preprocess::{canonicalize_markup, Artifact, ArtifactKind};
use crate::phishncd::similarity::finite_number;
use crate::phishncd::stats::RunStats;
use atomic_counter::AtomicCounter;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Legitimate,
    Phished,
    Unknown,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legitimate => "LEGITIMATE",
            Self::Phished => "PHISHED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// `UNKNOWN` is reported as `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Unknown => Value::Null,
            _ => Value::String(self.as_str().to_string()),
        }
    }
}

/// `max(0, 1 - ncd)`; an absent or non-finite distance contributes nothing.
pub fn ncd_to_similarity(ncd: f64) -> f64 {
    if !ncd.is_finite() {
        return 0.0;
    }
    (1.0 - ncd).max(0.0)
}

/// Fused score of a category: NCD similarity plus the DOM and link
/// similarity of the same NCD-selected entry.
pub fn fused_total(best: &BestMatch) -> f64 {
    if !best.is_match() {
        return 0.0;
    }
    ncd_to_similarity(best.score.ncd)
        + best.score.dom.unwrap_or(0.0)
        + best.score.links.unwrap_or(0.0)
}

/// The strictly greater positive total wins.
pub fn decide_totals(legit_total: f64, phish_total: f64) -> Decision {
    if legit_total > phish_total && legit_total > 0.0 {
        Decision::Legitimate
    } else if phish_total > legit_total && phish_total > 0.0 {
        Decision::Phished
    } else {
        Decision::Unknown
    }
}

/// The strictly smaller minimal distance wins.
pub fn decide_distances(legit_ncd: f64, phish_ncd: f64) -> Decision {
    if legit_ncd < phish_ncd {
        Decision::Legitimate
    } else if phish_ncd < legit_ncd {
        Decision::Phished
    } else {
        Decision::Unknown
    }
}

/// The `url` field of a `{"url": "..."}` request.
pub fn parse_url_request(raw: &str) -> Result<String> {
    let invalid = || ClassifyError::Validation("Missing or invalid 'url' field".to_string());
    let request: Value = serde_json::from_str(raw).map_err(|_| invalid())?;
    request
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_owned)
        .ok_or_else(invalid)
}

const NO_REFERENCE_PAGES: &str = "No reference HTML pages available for similarity comparison.";
const UNLISTED_NO_REFERENCE_PAGES: &str =
    "URL not in phishing list, and no reference HTML pages available for similarity comparison.";

/// A labeled pair of corpus directories.
#[derive(Clone, Debug)]
pub struct CorpusPair {
    pub legit: PathBuf,
    pub phish: PathBuf,
}

#[derive(Clone, Debug)]
pub struct UrlReport {
    pub url: String,
    pub known_phish: bool,
    pub legit: BestMatch,
    pub phish: BestMatch,
    pub legit_total: f64,
    pub phish_total: f64,
    pub decision: Decision,
    pub message: String,
}

impl UrlReport {
    fn unscanned(url: &str) -> Self {
        Self {
            url: url.to_string(),
            known_phish: false,
            legit: BestMatch::none(),
            phish: BestMatch::none(),
            legit_total: 0.0,
            phish_total: 0.0,
            decision: Decision::Unknown,
            message: String::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "url": self.url,
            "known_phish": self.known_phish,
            "best_legit_file": self.legit.file_json(),
            "best_phish_file": self.phish.file_json(),
            "best_legit_scores": self.legit.scores_json(),
            "best_phish_scores": self.phish.scores_json(),
            "legit_total_score": finite_number(self.legit_total),
            "phish_total_score": finite_number(self.phish_total),
            "decision": self.decision.to_json(),
            "message": self.message,
        })
    }
}

/// Scores captured markup against both corpora and fuses the result.
pub struct PageClassifier<'a> {
    corpora: CorpusPair,
    stats: &'a RunStats,
}

impl<'a> PageClassifier<'a> {
    pub fn new(corpora: CorpusPair, stats: &'a RunStats) -> Self {
        Self { corpora, stats }
    }

    /// Classify a saved document. No fetch and no known-phish check.
    pub fn classify(&self, label: &str, html: &str) -> UrlReport {
        self.stats.requests.inc();
        self.score(UrlReport::unscanned(label), html, NO_REFERENCE_PAGES)
    }

    /// `no_references` becomes the message when both corpora are empty.
    fn score(&self, mut report: UrlReport, html: &str, no_references: &str) -> UrlReport {
        let query = canonicalize_markup(html);
        self.stats.record_query(query.canonical.as_slice());

        let scanner = CorpusScanner::new(ArtifactKind::Markup, self.stats);
        let (legit, phish) = rayon::join(
            || scanner.scan(&self.corpora.legit, &query),
            || scanner.scan(&self.corpora.phish, &query),
        );
        report.legit = legit;
        report.phish = phish;

        if !report.legit.is_match() && !report.phish.is_match() {
            report.message = no_references.to_string();
            return report;
        }

        report.legit_total = fused_total(&report.legit);
        report.phish_total = fused_total(&report.phish);
        report.decision = decide_totals(report.legit_total, report.phish_total);
        report.message = match report.decision {
            Decision::Legitimate => format!(
                "Classified as LEGITIMATE (Legit score={:.3}, Phish score={:.3})",
                report.legit_total, report.phish_total
            ),
            Decision::Phished => format!(
                "Classified as PHISHED (Phish score={:.3}, Legit score={:.3})",
                report.phish_total, report.legit_total
            ),
            Decision::Unknown => "No strong evidence from similarity metrics.".to_string(),
        };
        report
    }
}

/// Classifies URLs: known-phish fast path, then fetch and page scoring.
pub struct UrlClassifier<'a, F: PageFetcher> {
    pages: PageClassifier<'a>,
    known_phish: &'a KnownPhishList,
    fetcher: F,
}

impl<'a, F: PageFetcher> UrlClassifier<'a, F> {
    pub fn new(
        corpora: CorpusPair,
        known_phish: &'a KnownPhishList,
        fetcher: F,
        stats: &'a RunStats,
    ) -> Self {
        Self {
            pages: PageClassifier::new(corpora, stats),
            known_phish,
            fetcher,
        }
    }

    pub fn classify_url(&self, url: &str) -> UrlReport {
        let stats = self.pages.stats;
        stats.requests.inc();
        let mut report = UrlReport::unscanned(url);

        if self.known_phish.contains(url) {
            stats.known_phish_hits.inc();
            report.known_phish = true;
            report.decision = Decision::Phished;
            report.message = "URL found in known phishing dataset.".to_string();
            return report;
        }

        let html = match self.fetcher.fetch(url) {
            Ok(html) => html,
            Err(err) => {
                stats.fetch_failures.inc();
                log::warn!("Unable to fetch {}: {}", url, err);
                report.message = format!("Could not fetch URL content: {}", err);
                return report;
            }
        };
        self.pages.score(report, html.as_str(), UNLISTED_NO_REFERENCE_PAGES)
    }
}

#[derive(Clone, Debug)]
pub struct ImageReport {
    pub legit: BestMatch,
    pub phish: BestMatch,
    pub decision: Decision,
    pub message: String,
}

impl ImageReport {
    pub fn to_json(&self) -> Value {
        json!({
            "best_legit_file": self.legit.file_json(),
            "best_legit_ncd": finite_number(self.legit.score.ncd),
            "best_phish_file": self.phish.file_json(),
            "best_phish_ncd": finite_number(self.phish.score.ncd),
            "decision": self.decision.to_json(),
            "message": self.message,
        })
    }
}

/// Classifies images by the smaller minimal distance to either corpus.
pub struct ImageClassifier<'a> {
    corpora: CorpusPair,
    kind: ArtifactKind,
    stats: &'a RunStats,
}

impl<'a> ImageClassifier<'a> {
    pub fn new(corpora: CorpusPair, size: u32, stats: &'a RunStats) -> Self {
        Self {
            corpora,
            kind: ArtifactKind::Image { size },
            stats,
        }
    }

    /// Fails only when the query itself cannot be decoded.
    pub fn classify(&self, raw: &[u8]) -> Result<ImageReport> {
        self.stats.requests.inc();
        let query: Artifact = self.kind.canonicalize(raw).map_err(|err| match err {
            ClassifyError::Decode(message) => {
                ClassifyError::Decode(format!("query image: {}", message))
            }
            other => other,
        })?;
        self.stats.record_query(query.canonical.as_slice());

        let scanner = CorpusScanner::new(self.kind, self.stats);
        let (legit, phish) = rayon::join(
            || scanner.scan(&self.corpora.legit, &query),
            || scanner.scan(&self.corpora.phish, &query),
        );

        let decision = decide_distances(legit.score.ncd, phish.score.ncd);
        let message = match decision {
            Decision::Legitimate => format!(
                "Classified as LEGITIMATE (lowest NCD = {:.4})",
                legit.score.ncd
            ),
            Decision::Phished => format!(
                "Classified as PHISHED (lowest NCD = {:.4})",
                phish.score.ncd
            ),
            Decision::Unknown if !legit.is_match() && !phish.is_match() => {
                "No reference images available for similarity comparison.".to_string()
            }
            Decision::Unknown => format!(
                "Legit and phish references are equally close (NCD = {:.4})",
                legit.score.ncd
            ),
        };

        Ok(ImageReport {
            legit,
            phish,
            decision,
            message,
        })
    }
}
