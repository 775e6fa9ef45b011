// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Property-path parsing: `child.child.prop` nesting and `prop[i]` list
//! indexing (§3.3 "Object property", §4.3 write-path step 1).

use crate::error::{Error, Result};

/// One path segment: a bare name, or a name with a trailing `[index]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: String,
    pub index: Option<usize>,
}

/// Splits `path` on `.` and parses any trailing `[i]` on each segment.
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    if path.is_empty() {
        return Err(Error::InvalidParameter("empty property path".to_string()));
    }
    path.split('.').map(parse_segment).collect()
}

fn parse_segment(raw: &str) -> Result<Segment> {
    match raw.find('[') {
        None => Ok(Segment { name: raw.to_string(), index: None }),
        Some(open) => {
            if !raw.ends_with(']') {
                return Err(Error::ParseFailed(format!("malformed path segment '{raw}'")));
            }
            let name = raw[..open].to_string();
            let idx_str = &raw[open + 1..raw.len() - 1];
            let index = idx_str
                .parse::<usize>()
                .map_err(|_| Error::ParseFailed(format!("malformed index in '{raw}'")))?;
            Ok(Segment { name, index: Some(index) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_nested_path() {
        let segs = parse("child.inner.prop").unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[2].name, "prop");
    }

    #[test]
    fn parses_index_suffix() {
        let segs = parse("list[2]").unwrap();
        assert_eq!(segs[0], Segment { name: "list".to_string(), index: Some(2) });
    }

    #[test]
    fn malformed_index_is_parse_failed() {
        assert!(matches!(parse("list[x]"), Err(Error::ParseFailed(_))));
    }
}
