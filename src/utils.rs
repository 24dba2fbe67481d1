use std::path::Path;

use anyhow::Result;

use crate::ast::Location;

pub fn read_file_to_string(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Byte range of a line/column location inside `src`, for diagnostic
/// rendering. Columns are 1-based.
pub fn byte_range(src: &str, loc: &Location) -> std::ops::Range<usize> {
    let mut start = 0usize;
    let mut end = src.len();
    let mut pos = 0usize;
    for (i, line) in src.lines().enumerate() {
        let lineno = (i + 1) as u32;
        if lineno == loc.first_line {
            start = pos + loc.first_column.saturating_sub(1) as usize;
        }
        if lineno == loc.last_line {
            end = pos + loc.last_column as usize;
            break;
        }
        pos += line.len() + 1;
    }
    let start = start.min(src.len());
    let end = end.clamp(start, src.len());
    start..end
}
