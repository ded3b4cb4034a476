//! Opaque pagination cursors
//!
//! List operations paginate with a default page size of 50. Cursors encode
//! the next offset, base64-wrapped so clients treat them as opaque; a
//! cursor is returned only when more results remain.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::core::error::{McpError, McpResult};

/// Default number of entries per list page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Encode an offset into an opaque cursor
pub fn encode_cursor(offset: usize) -> String {
    STANDARD.encode(format!("offset:{offset}"))
}

/// Decode an opaque cursor back into an offset
pub fn decode_cursor(cursor: &str) -> McpResult<usize> {
    let bytes = STANDARD
        .decode(cursor)
        .map_err(|_| McpError::invalid_params("Invalid pagination cursor"))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| McpError::invalid_params("Invalid pagination cursor"))?;
    text.strip_prefix("offset:")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| McpError::invalid_params("Invalid pagination cursor"))
}

/// Slice one page out of a full listing.
///
/// Returns the page plus the cursor for the following page, when any
/// entries remain past it.
pub fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    page_size: usize,
) -> McpResult<(Vec<T>, Option<String>)> {
    let offset = match cursor {
        Some(c) => decode_cursor(c)?,
        None => 0,
    };

    if offset >= items.len() {
        return Ok((Vec::new(), None));
    }

    let end = (offset + page_size).min(items.len());
    let page = items[offset..end].to_vec();
    let next = (end < items.len()).then(|| encode_cursor(end));
    Ok((page, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = encode_cursor(50);
        assert_eq!(decode_cursor(&cursor).unwrap(), 50);
    }

    #[test]
    fn test_invalid_cursor_rejected() {
        assert!(decode_cursor("not base64!").is_err());
        assert!(decode_cursor(&STANDARD.encode("garbage")).is_err());
    }

    #[test]
    fn test_paginate_within_one_page() {
        let items: Vec<u32> = (0..10).collect();
        let (page, next) = paginate(&items, None, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page.len(), 10);
        assert!(next.is_none());
    }

    #[test]
    fn test_paginate_multiple_pages() {
        let items: Vec<u32> = (0..120).collect();
        let (page, next) = paginate(&items, None, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page.len(), DEFAULT_PAGE_SIZE);
        let cursor = next.expect("more pages remain");

        let (page2, next2) = paginate(&items, Some(&cursor), DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page2[0], 50);
        let cursor2 = next2.expect("one page remains");

        let (page3, next3) = paginate(&items, Some(&cursor2), DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page3.len(), 20);
        assert!(next3.is_none());
    }

    #[test]
    fn test_paginate_exact_boundary_has_no_cursor() {
        let items: Vec<u32> = (0..50).collect();
        let (page, next) = paginate(&items, None, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(page.len(), 50);
        assert!(next.is_none());
    }
}
