use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Number, Value};
use std::io::Write;

/// Gzip at level 9. Every distance in a run must use the same settings.
const COMPRESSION_LEVEL: u32 = 9;

/// Size in bytes of the gzip stream produced for `payload`.
pub fn compressed_size(payload: &[u8]) -> usize {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    if encoder.write_all(payload).is_err() {
        return payload.len();
    }
    match encoder.finish() {
        Ok(compressed) => compressed.len(),
        Err(_) => payload.len(),
    }
}

/// Normalized compression distance between two payloads.
///
/// `(C(xy) - min(C(x), C(y))) / max(C(x), C(y))`. The value is left
/// unclamped: container overhead can push it slightly below zero or above
/// one. Byte-identical payloads are at distance `0.0`, as are two payloads
/// that both compress to nothing.
pub fn ncd(left: &[u8], right: &[u8]) -> f64 {
    // C(xx) > C(x) for any real compressor.
    if left == right {
        return 0.0;
    }
    let left_size = compressed_size(left);
    let right_size = compressed_size(right);

    let mut joined = Vec::with_capacity(left.len() + right.len());
    joined.extend_from_slice(left);
    joined.extend_from_slice(right);
    let joined_size = compressed_size(joined.as_slice());

    let max_size = left_size.max(right_size);
    if max_size == 0 {
        return 0.0;
    }
    let min_size = left_size.min(right_size);
    (joined_size as f64 - min_size as f64) / max_size as f64
}

/// Similarity of a query against one reference entry.
///
/// `dom` and `links` are only present when both sides are markup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityScore {
    pub ncd: f64,
    pub dom: Option<f64>,
    pub links: Option<f64>,
}

impl SimilarityScore {
    /// Score reported for a corpus with no usable entries.
    pub fn unmatched() -> Self {
        Self {
            ncd: f64::INFINITY,
            dom: None,
            links: None,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "ncd": finite_number(self.ncd),
            "dom": self.dom.map_or(Value::Null, finite_number),
            "links": self.links.map_or(Value::Null, finite_number),
        })
    }
}

/// JSON number for `value`, or `null` when it is NaN or infinite.
pub fn finite_number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
