//! Cursor and page-number pagination primitives.
//!
//! Cursor tokens are opaque to callers. Internally a token is
//! `base64("p:<0|1>,ts:<millis>,id:<post_id>")`, the keyset of the last item
//! of the previous page.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};
use crate::repository::SortKey;

/// Encoding strategy for cursors
pub struct CursorCodec;

impl CursorCodec {
    pub fn encode(key: &SortKey) -> String {
        let cursor_str = format!(
            "p:{},ts:{},id:{}",
            u8::from(key.pinned),
            key.create_millis,
            key.post_id
        );
        general_purpose::URL_SAFE_NO_PAD.encode(cursor_str)
    }

    /// Decode a token; the empty token means "from the beginning".
    pub fn decode(cursor: &str) -> FeedResult<Option<SortKey>> {
        if cursor.is_empty() {
            return Ok(None);
        }
        let invalid = |msg: &str| FeedError::InvalidArgument(format!("invalid cursor: {}", msg));

        let decoded = general_purpose::URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|_| invalid("not base64"))?;
        let cursor_str = String::from_utf8(decoded).map_err(|_| invalid("not utf-8"))?;

        // id goes last so it may itself contain ','
        let mut parts = cursor_str.splitn(3, ',');
        let pinned = match parts.next().and_then(|p| p.strip_prefix("p:")) {
            Some("0") => false,
            Some("1") => true,
            _ => return Err(invalid("missing pin marker")),
        };
        let create_millis = parts
            .next()
            .and_then(|p| p.strip_prefix("ts:"))
            .ok_or_else(|| invalid("missing timestamp"))?
            .parse::<i64>()
            .map_err(|_| invalid("bad timestamp"))?;
        let post_id = parts
            .next()
            .and_then(|p| p.strip_prefix("id:"))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| invalid("missing id"))?
            .to_string();

        Ok(Some(SortKey {
            pinned,
            create_millis,
            post_id,
        }))
    }
}

/// Cursor page request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRequest {
    #[serde(default)]
    pub cursor: String,
    pub count: i64,
}

impl CursorRequest {
    pub fn first(count: i64) -> Self {
        Self {
            cursor: String::new(),
            count,
        }
    }

    pub fn after(cursor: impl Into<String>, count: i64) -> Self {
        Self {
            cursor: cursor.into(),
            count,
        }
    }

    /// Validated page size, clamped to `max`.
    pub fn limit(&self, max: i64) -> FeedResult<i64> {
        if self.count <= 0 {
            return Err(FeedError::InvalidArgument(format!(
                "page size must be positive, got {}",
                self.count
            )));
        }
        Ok(self.count.min(max))
    }
}

/// One page of a cursor walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    /// Empty when the walk is finished.
    pub next_cursor: String,
}

impl<T> CursorPage<T> {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_empty()
    }
}

/// Page-number request (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page_number: i32,
    pub show_number: i32,
}

impl Pagination {
    pub fn new(page_number: i32, show_number: i32) -> Self {
        Self {
            page_number,
            show_number,
        }
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.page_number < 1 {
            return Err(FeedError::InvalidArgument(format!(
                "page number must be at least 1, got {}",
                self.page_number
            )));
        }
        if self.show_number < 0 {
            return Err(FeedError::InvalidArgument(format!(
                "page size must not be negative, got {}",
                self.show_number
            )));
        }
        Ok(())
    }

    /// Skip/limit window, or `None` when the page is empty for `total` items.
    pub fn window(&self, total: i64) -> Option<(i64, i64)> {
        let limit = i64::from(self.show_number);
        let skip = i64::from(self.page_number - 1) * limit;
        if limit <= 0 || skip < 0 || skip >= total {
            return None;
        }
        Some((skip, limit))
    }
}

/// Page-number result with the collection total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: i64,
    pub items: Vec<T>,
}
