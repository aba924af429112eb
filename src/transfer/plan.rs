use std::ops::Range;

/// Split `len` bytes into `channels` contiguous ranges.
///
/// Every range but the last is `len / channels` rounded down to a multiple
/// of `align`; the last one takes the remainder. Ranges may be empty and
/// always cover `0..len` exactly.
pub fn split_plan(len: usize, channels: usize, align: usize) -> Vec<Range<usize>> {
    let channels = channels.max(1);
    let align = align.max(1);
    let piece = len / channels / align * align;
    let mut ranges = Vec::with_capacity(channels);
    let mut start = 0;
    for i in 0..channels {
        let end = if i + 1 == channels { len } else { start + piece };
        ranges.push(start..end);
        start = end;
    }
    ranges
}
