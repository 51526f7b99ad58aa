use std::ops::Range;

use super::error::SubmitError;

/// One contiguous slice of a partitioned request's payload, bound for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub index: usize,
    /// Half-open byte range `[start, end)` into the payload.
    pub range: Range<u64>,
    pub destination: String,
}

impl Part {
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Splits `[0, total_size)` into one part per destination.
///
/// Every part is `ceil(total_size / destinations.len())` bytes long except the
/// last ones, which are cut at `total_size`. Parts that start past the end of
/// the payload (more destinations than bytes, or a zero-byte payload) are empty.
pub fn plan(total_size: u64, destinations: &[String]) -> Result<Vec<Part>, SubmitError> {
    if destinations.is_empty() {
        return Err(SubmitError::NoDestinations);
    }

    let chunk_size = total_size.div_ceil(destinations.len() as u64);

    Ok(destinations
        .iter()
        .enumerate()
        .map(|(index, destination)| {
            let start = (index as u64).saturating_mul(chunk_size).min(total_size);
            let end = (index as u64 + 1).saturating_mul(chunk_size).min(total_size);
            Part {
                index,
                range: start..end,
                destination: destination.clone(),
            }
        })
        .collect())
}
