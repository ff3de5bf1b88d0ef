use std::path::Path;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

pub fn xxh3_64_hex(input: &[u8]) -> (u64, String) {
    let hash = xxh3_64(input);
    (hash, format!("{:x}", hash))
}

pub fn format_size(size: i64) -> String {
    const KILOBYTE: i64 = 1024;
    const MEGABYTE: i64 = KILOBYTE * 1024;
    const GIGABYTE: i64 = MEGABYTE * 1024;
    const TERABYTE: i64 = GIGABYTE * 1024;

    if size < KILOBYTE {
        format!("{}B", size)
    } else if size < MEGABYTE {
        format!("{:.2}KB", (size as f64) / (KILOBYTE as f64))
    } else if size < GIGABYTE {
        format!("{:.2}MB", (size as f64) / (MEGABYTE as f64))
    } else if size < TERABYTE {
        format!("{:.2}GB", (size as f64) / (GIGABYTE as f64))
    } else {
        format!("{:.2}TB", (size as f64) / (TERABYTE as f64))
    }
}

/// Lines of a text file, decoded as UTF-8 with invalid sequences replaced.
pub fn read_lossy_lines(path: &Path) -> Result<Vec<String>, std::io::Error> {
    let raw = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(raw.as_slice())
        .lines()
        .map(str::to_owned)
        .collect())
}

/// Lower-cased host component of `raw`, if it names one.
///
/// Relative references, `mailto:` and `javascript:` links have no host.
/// Protocol-relative references (`//cdn.example.com/app.js`) do.
pub fn url_host(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let parsed = if trimmed.starts_with("//") {
        Url::parse(format!("http:{}", trimmed).as_str())
    } else {
        Url::parse(trimmed)
    };
    parsed
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
}
