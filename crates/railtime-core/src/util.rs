use std::collections::HashSet;

use crate::models::ListingEntry;

/// Suffixes stripped from listing names by default.
pub const DEFAULT_NAME_SUFFIXES: &[&str] = &["駅", " Station", " station"];

/// Normalize a display name for storage.
///
/// Collapses inner whitespace runs, trims, then strips any trailing
/// decorative suffix tokens (repeatedly, so `"Chofu Station 駅"` becomes
/// `"Chofu"`). Returns `None` when nothing is left.
///
/// Example: `"  渋谷駅 "` → `Some("渋谷")`
pub fn normalize_station_name(raw: &str, suffixes: &[impl AsRef<str>]) -> Option<String> {
    let mut name = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    loop {
        let before = name.len();
        for suffix in suffixes {
            let suffix = suffix.as_ref();
            if !suffix.is_empty() && name.ends_with(suffix) {
                name.truncate(name.len() - suffix.len());
                name = name.trim_end().to_string();
            }
        }
        if name.len() == before {
            break;
        }
    }

    if name.is_empty() { None } else { Some(name) }
}

/// Drop repeated names, keeping the first occurrence and the original order.
pub fn dedup_entries(entries: impl IntoIterator<Item = ListingEntry>) -> Vec<ListingEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.name.clone()))
        .collect()
}
