//! HTTP `Range: bytes=...` parsing for downloads.

use serde::Serialize;

use crate::error::PipelineError;

/// Inclusive byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for a `Content-Range` response header.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }
}

/// Parse `bytes=start-end`, `bytes=-suffix` or `bytes=start-` against an
/// object of `size` bytes. The end is clamped to the last byte. Multiple
/// ranges, inverted ranges and ranges starting past the end are rejected.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, PipelineError> {
    let invalid = || PipelineError::invalid_input(format!("Invalid range: {header}"));

    let spec = header.trim().strip_prefix("bytes=").ok_or_else(invalid)?.trim();
    if spec.contains(',') {
        return Err(PipelineError::invalid_input(
            "Multiple byte ranges are not supported",
        ));
    }
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let (start, end) = (start.trim(), end.trim());

    if size == 0 {
        return Err(PipelineError::invalid_input(
            "Range not satisfiable for an empty object",
        ));
    }
    let last = size - 1;

    let range = match (start.is_empty(), end.is_empty()) {
        (true, true) => return Err(invalid()),
        (true, false) => {
            let suffix: u64 = end.parse().map_err(|_| invalid())?;
            if suffix == 0 {
                return Err(invalid());
            }
            ByteRange {
                start: size.saturating_sub(suffix),
                end: last,
            }
        }
        (false, true) => ByteRange {
            start: start.parse().map_err(|_| invalid())?,
            end: last,
        },
        (false, false) => {
            let start: u64 = start.parse().map_err(|_| invalid())?;
            let end: u64 = end.parse().map_err(|_| invalid())?;
            if end < start {
                return Err(invalid());
            }
            ByteRange {
                start,
                end: end.min(last),
            }
        }
    };

    if range.start > last {
        return Err(PipelineError::invalid_input(format!(
            "Range starts beyond object size {size}: {header}"
        )));
    }
    Ok(range)
}
