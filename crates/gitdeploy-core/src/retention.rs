//! Release retention.

/// Releases kept besides the live one unless configured otherwise.
pub const DEFAULT_KEEP_RELEASES: usize = 5;

/// Pick the releases to delete.
///
/// `current` is never a candidate. The remaining names are sorted (release
/// names sort chronologically) and all but the newest `keep` are returned,
/// oldest first.
pub fn prune(existing: &[String], current: Option<&str>, keep: usize) -> Vec<String> {
    let mut candidates: Vec<&String> = existing
        .iter()
        .filter(|name| Some(name.as_str()) != current)
        .collect();
    candidates.sort();
    candidates.dedup();
    let excess = candidates.len().saturating_sub(keep);
    candidates
        .into_iter()
        .take(excess)
        .cloned()
        .collect()
}
