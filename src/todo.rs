use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// An item that has not been written yet. The store assigns `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub id: String,
    pub text: String,
}

impl Draft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string().to_uppercase(),
            text: text.into(),
        }
    }
}

/// Ascending by creation time. Items created at the same instant keep the
/// order the store returned them in.
pub fn sort_by_created_at(items: &mut [Item]) {
    items.sort_by_key(|item| item.created_at);
}

pub fn format_created_at(created_at: &DateTime<Utc>, offset: FixedOffset) -> String {
    created_at
        .with_timezone(&offset)
        .format(DATE_FORMAT)
        .to_string()
}

/// Falls back to UTC for offsets chrono rejects (beyond +-24h).
pub fn display_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or(Utc.fix())
}

#[cfg(test)]
pub(crate) fn item(id: &str, text: &str, secs: i64) -> Item {
    Item {
        id: id.to_string(),
        text: text.to_string(),
        created_at: DateTime::from_timestamp(secs, 0).unwrap(),
    }
}
