use std::collections::BTreeSet;

/// Structural fingerprint of a markup document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkupFeatures {
    /// Distinct element names, e.g. `form`, `input`, `div`.
    pub tags: BTreeSet<String>,
    /// Lower-cased hosts referenced by link-bearing elements.
    pub hosts: BTreeSet<String>,
}

/// Jaccard index of the distinct tag names of two documents.
pub fn dom_similarity(left: &MarkupFeatures, right: &MarkupFeatures) -> f64 {
    jaccard_index(&left.tags, &right.tags)
}

/// Jaccard index of the link hosts of two documents.
///
/// Two pages without any hosted links score `0.0`, not `1.0`.
pub fn link_similarity(left: &MarkupFeatures, right: &MarkupFeatures) -> f64 {
    jaccard_index(&left.hosts, &right.hosts)
}

fn jaccard_index(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    let intersection = left.intersection(right).count();
    let union = left.len() + right.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
