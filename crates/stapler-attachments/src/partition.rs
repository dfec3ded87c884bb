//! Id partitioning
//!
//! Records are spread over a fixed-depth directory tree derived from their
//! primary key, so no single directory grows without bound:
//! `1234` becomes `000/001/234`.

use stapler_core::RecordId;

/// Width of a numeric key after zero padding
const PARTITION_DIGITS: usize = 9;

/// Characters per directory level
const SEGMENT_LEN: usize = 3;

/// Compute the partition segment for a record key.
///
/// Numeric keys are zero padded to nine digits and split into groups of
/// three. String keys use their first nine characters, split the same way
/// and without padding. Returns `None` when there is nothing to partition.
pub fn id_partition(id: Option<&RecordId>) -> Option<String> {
    let id = id?;

    if id.is_numeric() {
        let digits = id.to_string();
        let padded = format!("{:0>width$}", digits, width = PARTITION_DIGITS);
        return Some(join_segments(&padded, usize::MAX));
    }

    match id {
        RecordId::Str(s) if !s.is_empty() => Some(join_segments(s, PARTITION_DIGITS / SEGMENT_LEN)),
        _ => None,
    }
}

fn join_segments(value: &str, max_segments: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    chars
        .chunks(SEGMENT_LEN)
        .take(max_segments)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
}

/// Find the byte offset in `path` where the record-specific subtree ends.
///
/// Truncating `path` at the returned offset yields the record's directory
/// (e.g. `/system/avatars/000/000/001`), which is what gets emptied or
/// removed. The partition run is looked up first; templates that use the
/// plain `:id` fall back to the key itself. Matches only count when they
/// span whole path segments, so an id of `1` never matches inside `/v1/`.
///
/// Returns `None` when neither is found: there is no safe subtree to delete.
pub fn locate_boundary(path: &str, id: Option<&RecordId>) -> Option<usize> {
    let id = id?;

    if let Some(partition) = id_partition(Some(id)) {
        if let Some(pos) = find_segment(path, &partition) {
            return Some(pos + partition.len());
        }
    }

    let key = id.to_string();
    if key.is_empty() {
        return None;
    }

    find_segment(path, &key).map(|pos| pos + key.len())
}

/// Truncate `path` at its record boundary.
pub fn record_directory<'a>(path: &'a str, id: Option<&RecordId>) -> Option<&'a str> {
    locate_boundary(path, id).map(|offset| &path[..offset])
}

fn find_segment(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .match_indices(needle)
        .map(|(pos, _)| pos)
        .find(|&pos| {
            let end = pos + needle.len();
            let starts_segment = pos == 0 || haystack[..pos].ends_with('/');
            let ends_segment = end == haystack.len() || haystack[end..].starts_with('/');
            starts_segment && ends_segment
        })
}
