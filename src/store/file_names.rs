//! Naming conventions for segment files

/// Extension of a compound archive data file
pub const COMPOUND_FILE_EXTENSION: &str = "cfs";

/// Extension of a compound archive entry table
pub const COMPOUND_FILE_ENTRIES_EXTENSION: &str = "cfe";

/// Generation pointer file, never cached in RAM
pub const SEGMENTS_GEN: &str = "segments.gen";

/// `segment[_suffix].ext`, or just `segment[_suffix]` when `ext` is empty
pub fn segment_file_name(segment: &str, suffix: &str, ext: &str) -> String {
    let mut name = String::with_capacity(segment.len() + suffix.len() + ext.len() + 2);
    name.push_str(segment);
    if !suffix.is_empty() {
        name.push('_');
        name.push_str(suffix);
    }
    if !ext.is_empty() {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Name with its last extension removed
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Position where the segment prefix ends: first `_` after position 0, else first `.`
fn index_of_segment_name(name: &str) -> Option<usize> {
    name.get(1..)
        .and_then(|rest| rest.find('_'))
        .map(|idx| idx + 1)
        .or_else(|| name.find('.'))
}

/// Segment prefix of a file name, e.g. `_0` for `_0_1.del`
pub fn parse_segment_name(name: &str) -> &str {
    match index_of_segment_name(name) {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// File name without its segment prefix, e.g. `.fdt` for `_0.fdt`
pub fn strip_segment_name(name: &str) -> &str {
    match index_of_segment_name(name) {
        Some(idx) => &name[idx..],
        None => name,
    }
}

/// Entry table sitting next to a compound data file
pub fn entries_file_name(data_file_name: &str) -> String {
    segment_file_name(
        strip_extension(data_file_name),
        "",
        COMPOUND_FILE_ENTRIES_EXTENSION,
    )
}
