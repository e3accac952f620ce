const GSM_SEGMENT_CHARS: usize = 160;
const UNICODE_SEGMENT_CHARS: usize = 70;

/// Number of SMS segments a body occupies. Bodies with any non-ASCII character
/// are billed at the shorter unicode segment size. Always at least 1.
pub fn count_segments(body: &str) -> usize {
    let size = if body.is_ascii() {
        GSM_SEGMENT_CHARS
    } else {
        UNICODE_SEGMENT_CHARS
    };
    body.chars().count().div_ceil(size).max(1)
}
