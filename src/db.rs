mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Display name.
    pub display_name: Option<String>,
    /// User role: "admin" or "user".
    pub role: String,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Book category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Unique category ID.
    pub id: String,
    /// Category name (unique).
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Book in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryItem {
    /// Unique item ID.
    pub id: String,
    /// Category this item belongs to.
    pub category_id: String,
    /// Book title.
    pub title: String,
    /// Primary author.
    pub author: Option<String>,
    /// Description or summary.
    pub description: Option<String>,
    /// Relative path of the stored book file (None when no file uploaded).
    pub file_path: Option<String>,
    /// File size in bytes (0 when no file).
    pub file_size: i64,
    /// Whether a cover image is stored.
    pub cover_cached: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Reading progress for a book. One row per (user, item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingProgress {
    /// User ID.
    pub user_id: String,
    /// Item ID.
    pub item_id: String,
    /// Normalized position, 0.0 to 1.0.
    pub progress: f64,
    /// Last read timestamp.
    pub last_read: i64,
}

/// Highlight or free-form note in a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation ID.
    pub id: String,
    /// User ID.
    pub user_id: String,
    /// Item ID.
    pub item_id: String,
    /// CFI range string (None for plain notes).
    pub text_location: Option<String>,
    /// Highlight color.
    pub highlight_color: String,
    /// Note text.
    pub note: Option<String>,
    /// True for a free-form note, false for a pure highlight.
    pub is_note: bool,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Append-only activity log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    /// Log entry ID.
    pub id: i64,
    /// Acting user ID.
    pub actor_id: String,
    /// Action type (e.g. "book.download", "login").
    pub action_type: String,
    /// Affected resource identifier.
    pub affected_resource: Option<String>,
    /// Client IP address.
    pub ip_address: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
    /// Archival flag. The only field ever mutated.
    pub is_archived: bool,
}

/// Filters for listing activity logs.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    /// Restrict to one actor.
    pub actor_id: Option<String>,
    /// Restrict to one action type.
    pub action_type: Option<String>,
    /// Inclusive lower bound on created_at.
    pub start_date: Option<i64>,
    /// Inclusive upper bound on created_at.
    pub end_date: Option<i64>,
    /// Include archived entries.
    pub include_archived: bool,
    /// Page number (1-based).
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

/// Catalog statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Number of items in the catalog.
    pub items: i64,
    /// Number of categories.
    pub categories: i64,
    /// Number of user accounts.
    pub users: i64,
    /// Number of annotations.
    pub annotations: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
