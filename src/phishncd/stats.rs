use crate::phishncd::util::{format_size, xxh3_64_hex};
use atomic_counter::{AtomicCounter, ConsistentCounter};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Run-wide counters. Only ever incremented, so they are safe to share across
/// the scan workers.
pub struct RunStats {
    pub requests: ConsistentCounter,
    pub invalid_requests: ConsistentCounter,
    pub known_phish_hits: ConsistentCounter,
    pub fetch_failures: ConsistentCounter,
    pub entries_scanned: ConsistentCounter,
    pub entries_skipped: ConsistentCounter,
    pub bytes_compared: ConsistentCounter,
    unique_queries: Mutex<HashSet<u64>>,
    best_matches: DashMap<String, i64>,
    best_distances: Mutex<Vec<f64>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            requests: ConsistentCounter::new(0),
            invalid_requests: ConsistentCounter::new(0),
            known_phish_hits: ConsistentCounter::new(0),
            fetch_failures: ConsistentCounter::new(0),
            entries_scanned: ConsistentCounter::new(0),
            entries_skipped: ConsistentCounter::new(0),
            bytes_compared: ConsistentCounter::new(0),
            unique_queries: Mutex::new(HashSet::new()),
            best_matches: DashMap::new(),
            best_distances: Mutex::new(Vec::new()),
        }
    }

    /// Record the canonical bytes of a query so repeats can be counted.
    pub fn record_query(&self, canonical: &[u8]) {
        let (hash, _) = xxh3_64_hex(canonical);
        match self.unique_queries.lock() {
            Ok(mut unique) => {
                unique.insert(hash);
            }
            Err(err) => log::warn!("Unable to record query hash due to poisoned lock: {}", err),
        }
    }

    pub fn unique_queries(&self) -> usize {
        match self.unique_queries.lock() {
            Ok(unique) => unique.len(),
            Err(err) => {
                log::warn!("Unable to read unique query count due to poisoned lock: {}", err);
                0
            }
        }
    }

    /// Count a corpus entry selected as the closest match of a scan.
    pub fn record_best(&self, entry: &str, ncd: f64) {
        *self.best_matches.entry(entry.to_string()).or_insert(0) += 1;
        if !ncd.is_finite() {
            return;
        }
        match self.best_distances.lock() {
            Ok(mut distances) => distances.push(ncd),
            Err(err) => log::warn!("Unable to record distance due to poisoned lock: {}", err),
        }
    }

    fn matches_json(&self) -> Value {
        let mut matches: Vec<(String, i64)> = self
            .best_matches
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        matches.sort();
        Value::Array(
            matches
                .into_iter()
                .map(|(name, count)| json!({ "Name": name, "Matches": count }))
                .collect(),
        )
    }

    fn distances_json(&self) -> Value {
        let mut distances = match self.best_distances.lock() {
            Ok(distances) => distances.clone(),
            Err(err) => {
                log::warn!("Unable to read distances due to poisoned lock: {}", err);
                return Value::Null;
            }
        };
        if distances.is_empty() {
            return Value::Null;
        }
        distances.sort_by(f64::total_cmp);
        let len = distances.len();
        let avg = distances.iter().sum::<f64>() / len as f64;
        let p95 = distances[(len * 95 / 100).saturating_sub(1)];
        json!({
            "Count": len,
            "AvgNcd": format!("{:.4}", avg),
            "MinNcd": format!("{:.4}", distances[0]),
            "MaxNcd": format!("{:.4}", distances[len - 1]),
            "P95Ncd": format!("{:.4}", p95),
        })
    }

    pub fn to_json(&self, kind: &str, elapsed: Duration) -> Value {
        json!({
            "---PHISHNCD_STATISTICS---": "This JSON is output to STDERR so that you can parse stats seperate from the primary output.",
            "Requests": {
                "Count": self.requests.get(),
                "Unique": self.unique_queries(),
                "Invalid": self.invalid_requests.get(),
                "KnownPhishHits": self.known_phish_hits.get(),
                "FetchFailures": self.fetch_failures.get(),
            },
            "Corpus": {
                "EntriesScanned": self.entries_scanned.get(),
                "EntriesSkipped": self.entries_skipped.get(),
                "BytesCompared": format_size(self.bytes_compared.get() as i64),
                "Matches": self.matches_json(),
            },
            "Compare": self.distances_json(),
            "Environment": {
                "Version": env!("CARGO_PKG_VERSION"),
                "GitRevision": option_env!("PHISHNCD_BUILD_GIT_HASH"),
                "Kind": kind,
                "Threads": rayon::current_num_threads(),
                "DurationSeconds": format!("{:.2}", elapsed.as_secs_f32()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_queries_deduplicate_by_content() {
        let stats = RunStats::new();
        stats.record_query(b"alpha");
        stats.record_query(b"alpha");
        stats.record_query(b"beta");
        assert_eq!(stats.unique_queries(), 2);
    }

    #[test]
    fn test_stats_json_reports_counters() {
        let stats = RunStats::new();
        stats.requests.inc();
        stats.entries_scanned.add(3);
        stats.entries_skipped.inc();
        stats.bytes_compared.add(2048);

        let rendered = stats.to_json("image", Duration::from_millis(1500));
        assert_eq!(rendered["Requests"]["Count"].as_u64(), Some(1));
        assert_eq!(rendered["Corpus"]["EntriesScanned"].as_u64(), Some(3));
        assert_eq!(rendered["Corpus"]["EntriesSkipped"].as_u64(), Some(1));
        assert_eq!(rendered["Corpus"]["BytesCompared"].as_str(), Some("2.00KB"));
        assert_eq!(rendered["Environment"]["Kind"].as_str(), Some("image"));
        assert_eq!(
            rendered["Environment"]["DurationSeconds"].as_str(),
            Some("1.50")
        );
        assert!(rendered["Compare"].is_null());
    }

    #[test]
    fn test_best_matches_are_counted_per_entry() {
        let stats = RunStats::new();
        stats.record_best("phished/kit.html", 0.2);
        stats.record_best("legit/bank.html", 0.4);
        stats.record_best("phished/kit.html", 0.6);

        let rendered = stats.to_json("page", Duration::from_secs(1));
        assert_eq!(
            rendered["Corpus"]["Matches"],
            json!([
                { "Name": "legit/bank.html", "Matches": 1 },
                { "Name": "phished/kit.html", "Matches": 2 },
            ])
        );
        assert_eq!(rendered["Compare"]["Count"].as_u64(), Some(3));
        assert_eq!(rendered["Compare"]["MinNcd"].as_str(), Some("0.2000"));
        assert_eq!(rendered["Compare"]["MaxNcd"].as_str(), Some("0.6000"));
        assert_eq!(rendered["Compare"]["AvgNcd"].as_str(), Some("0.4000"));
    }
}
