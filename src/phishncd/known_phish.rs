use crate::phishncd::util::{read_lossy_lines, url_host};
use std::collections::HashSet;
use std::path::Path;

/// Immutable set of URLs already known to be phishing.
///
/// Loaded once at startup and shared read-only with every request.
#[derive(Clone, Debug, Default)]
pub struct KnownPhishList {
    entries: HashSet<String>,
}

impl KnownPhishList {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = lines
            .into_iter()
            .filter_map(|line| normalize(line.as_ref()))
            .collect();
        Self { entries }
    }

    /// Read a newline-delimited list. A missing or unreadable file yields an
    /// empty list with a warning.
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            log::warn!("Phish list file not found at {}", path.display());
            return Self::default();
        }
        match read_lossy_lines(path) {
            Ok(lines) => {
                let list = Self::from_lines(lines);
                log::info!(
                    "Loaded {} phishing URLs from {}",
                    list.len(),
                    path.display()
                );
                list
            }
            Err(err) => {
                log::warn!("Unable to read phish list {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact match on the normalized URL, or the URL's host appearing
    /// anywhere inside a listed entry.
    ///
    /// The host test is loose: `example.com` also hits an entry
    /// such as `http://login.example.com.evil.test/`.
    pub fn contains(&self, url: &str) -> bool {
        let Some(normalized) = normalize(url) else {
            return false;
        };
        if self.entries.contains(normalized.as_str()) {
            return true;
        }
        let Some(host) = url_host(normalized.as_str()) else {
            return false;
        };
        self.entries
            .iter()
            .any(|entry| entry.contains(host.as_str()))
    }
}

fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}
