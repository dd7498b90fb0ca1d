use std::ops::Deref;

use crate::error::RangeError;

const BYTES_UNIT: &str = "bytes";

/// A single byte window with inclusive bounds, `start <= end < size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    /// Number of bytes covered, never zero.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Non-empty list of validated ranges in the order they appeared in the header.
///
/// Members may overlap or be descending, they are honored as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet(Vec<ByteRange>);

impl RangeSet {
    pub fn into_vec(self) -> Vec<ByteRange> {
        self.0
    }
}

impl Deref for RangeSet {
    type Target = [ByteRange];

    fn deref(&self) -> &[ByteRange] {
        &self.0
    }
}

/// Parse a raw `Range` header against a resource of `size` bytes.
///
/// The header is validated as one unit: the first bad spec rejects all of it.
pub fn parse(header: &str, size: u64) -> Result<RangeSet, RangeError> {
    let (unit, specs) = header
        .split_once('=')
        .ok_or_else(|| RangeError::Malformed(header.to_string()))?;

    let unit = unit.trim();
    if !unit.eq_ignore_ascii_case(BYTES_UNIT) {
        return Err(RangeError::UnitUnsupported(unit.to_string()));
    }

    let ranges = specs
        .split(',')
        .map(|spec| parse_spec(spec.trim(), size))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(header, size, ?ranges, "parsed range header");
    Ok(RangeSet(ranges))
}

fn parse_spec(spec: &str, size: u64) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed(spec.to_string());

    let (first, last) = spec.split_once('-').ok_or_else(malformed)?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = if first.is_empty() {
        // suffix form, the last N bytes
        let suffix = parse_position(last).ok_or_else(malformed)?;
        if suffix == 0 || size == 0 {
            return Err(RangeError::SuffixNotSatisfiable(suffix));
        }
        (size.saturating_sub(suffix), size - 1)
    } else {
        let start = parse_position(first).ok_or_else(malformed)?;
        let end = if last.is_empty() {
            if size == 0 {
                return Err(RangeError::NotSatisfiable { start, end: 0 });
            }
            size - 1
        } else {
            parse_position(last).ok_or_else(malformed)?
        };
        (start, end)
    };

    if start > end || end >= size {
        return Err(RangeError::NotSatisfiable { start, end });
    }

    Ok(ByteRange { start, end })
}

// u64::from_str also accepts a leading `+`, which is not a valid byte position
fn parse_position(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
