use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Categories table
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                description TEXT,
                created_at INTEGER NOT NULL
            );

            -- Items table (book catalog)
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                category_id TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                description TEXT,
                file_path TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                cover_cached INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (category_id) REFERENCES categories(id)
            );

            -- Reading progress table (one row per user/item pair)
            CREATE TABLE IF NOT EXISTS reading_progress (
                user_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                progress REAL NOT NULL,
                last_read INTEGER NOT NULL,
                PRIMARY KEY (user_id, item_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            -- Annotations table (highlights and notes)
            CREATE TABLE IF NOT EXISTS annotations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                text_location TEXT,
                highlight_color TEXT NOT NULL DEFAULT 'yellow',
                note TEXT,
                is_note INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            -- Activity log table (append-only; only is_archived is ever updated)
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                affected_resource TEXT,
                ip_address TEXT,
                created_at INTEGER NOT NULL,
                is_archived INTEGER NOT NULL DEFAULT 0
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_items_category ON items(category_id);
            CREATE INDEX IF NOT EXISTS idx_annotations_user_item ON annotations(user_id, item_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            CREATE INDEX IF NOT EXISTS idx_activity_actor ON activity_log(actor_id);
            CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, display_name, role, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.display_name,
                user.role,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("users.email") {
                AppError::Conflict(format!("Email '{}' already exists", user.email))
            } else if msg.contains("UNIQUE constraint") {
                AppError::Conflict(format!("Username '{}' already exists", user.username))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, email, password_hash, display_name, role, created_at, last_login
             FROM users WHERE username = ?1",
            params![username],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, email, password_hash, display_name, role, created_at, last_login
             FROM users WHERE id = ?1",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, username, email, password_hash, display_name, role, created_at, last_login
                 FROM users ORDER BY username",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            display_name: row.get(4)?,
            role: row.get(5)?,
            created_at: row.get(6)?,
            last_login: row.get(7)?,
        })
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Delete user by username.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE username = ?1", params![username])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete user by ID.
    pub fn delete_user_by_id(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Cleanup expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(rows)
    }

    // ========== CATEGORY OPERATIONS ==========

    /// Create category.
    pub fn create_category(&self, category: &Category) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO categories (id, name, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                category.id,
                category.name,
                category.description,
                category.created_at,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Category '{}' already exists", category.name))
            } else {
                AppError::Internal(format!("Failed to create category: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get category by ID.
    pub fn get_category(&self, id: &str) -> Result<Option<Category>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, description, created_at FROM categories WHERE id = ?1",
            params![id],
            Self::row_to_category,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get category: {}", e)))
    }

    /// List all categories.
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, description, created_at FROM categories ORDER BY name")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let categories = stmt
            .query_map([], Self::row_to_category)
            .map_err(|e| AppError::Internal(format!("Failed to list categories: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect categories: {}", e)))?;

        Ok(categories)
    }

    fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    /// Update category name and description.
    pub fn update_category(&self, id: &str, name: &str, description: Option<&str>) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE categories SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, description, id],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    AppError::Conflict(format!("Category '{}' already exists", name))
                } else {
                    AppError::Internal(format!("Failed to update category: {}", e))
                }
            })?;
        Ok(rows > 0)
    }

    /// Delete category. The caller is responsible for the in-use guard.
    pub fn delete_category(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM categories WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete category: {}", e)))?;
        Ok(rows > 0)
    }

    /// Count items referencing a category.
    pub fn count_items_in_category(&self, category_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM items WHERE category_id = ?1",
            params![category_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count items: {}", e)))
    }

    // ========== ITEM OPERATIONS ==========

    /// Insert a new item.
    pub fn create_item(&self, item: &LibraryItem) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO items
             (id, category_id, title, author, description, file_path, file_size,
              cover_cached, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                item.id,
                item.category_id,
                item.title,
                item.author,
                item.description,
                item.file_path,
                item.file_size,
                item.cover_cached,
                item.created_at,
                item.updated_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create item: {}", e)))?;
        Ok(())
    }

    /// Update item metadata.
    pub fn update_item(&self, item: &LibraryItem) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE items SET category_id = ?1, title = ?2, author = ?3, description = ?4,
                        file_path = ?5, file_size = ?6, cover_cached = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    item.category_id,
                    item.title,
                    item.author,
                    item.description,
                    item.file_path,
                    item.file_size,
                    item.cover_cached,
                    item.updated_at,
                    item.id,
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update item: {}", e)))?;
        Ok(rows > 0)
    }

    /// Get item by ID.
    pub fn get_item(&self, id: &str) -> Result<Option<LibraryItem>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, category_id, title, author, description, file_path, file_size,
                    cover_cached, created_at, updated_at
             FROM items WHERE id = ?1",
            params![id],
            Self::row_to_item,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get item: {}", e)))
    }

    /// List items, optionally restricted to a category.
    pub fn list_items(&self, category_id: Option<&str>) -> Result<Vec<LibraryItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, category_id, title, author, description, file_path, file_size,
                        cover_cached, created_at, updated_at
                 FROM items
                 WHERE (?1 IS NULL OR category_id = ?1)
                 ORDER BY title",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let items = stmt
            .query_map(params![category_id], Self::row_to_item)
            .map_err(|e| AppError::Internal(format!("Failed to list items: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect items: {}", e)))?;

        Ok(items)
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<LibraryItem> {
        Ok(LibraryItem {
            id: row.get(0)?,
            category_id: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            description: row.get(4)?,
            file_path: row.get(5)?,
            file_size: row.get(6)?,
            cover_cached: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    /// Delete a single item by ID.
    pub fn delete_item(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM items WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete item: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== PROGRESS OPERATIONS ==========

    /// Insert or overwrite reading progress for a (user, item) pair.
    pub fn upsert_progress(&self, progress: &ReadingProgress) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reading_progress (user_id, item_id, progress, last_read)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, item_id) DO UPDATE SET
                progress = excluded.progress,
                last_read = excluded.last_read",
            params![
                progress.user_id,
                progress.item_id,
                progress.progress,
                progress.last_read,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save progress: {}", e)))?;
        Ok(())
    }

    /// Get reading progress for a book.
    pub fn get_progress(&self, user_id: &str, item_id: &str) -> Result<Option<ReadingProgress>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, item_id, progress, last_read
             FROM reading_progress WHERE user_id = ?1 AND item_id = ?2",
            params![user_id, item_id],
            Self::row_to_progress,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))
    }

    /// Get all reading progress rows for a user.
    pub fn get_user_progress(&self, user_id: &str) -> Result<Vec<ReadingProgress>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT user_id, item_id, progress, last_read
                 FROM reading_progress WHERE user_id = ?1
                 ORDER BY last_read DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id], Self::row_to_progress)
            .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect progress: {}", e)))?;

        Ok(rows)
    }

    fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadingProgress> {
        Ok(ReadingProgress {
            user_id: row.get(0)?,
            item_id: row.get(1)?,
            progress: row.get(2)?,
            last_read: row.get(3)?,
        })
    }

    // ========== ANNOTATION OPERATIONS ==========

    /// Insert a new annotation.
    pub fn create_annotation(&self, annotation: &Annotation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO annotations
             (id, user_id, item_id, text_location, highlight_color, note, is_note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                annotation.id,
                annotation.user_id,
                annotation.item_id,
                annotation.text_location,
                annotation.highlight_color,
                annotation.note,
                annotation.is_note,
                annotation.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create annotation: {}", e)))?;
        Ok(())
    }

    /// Get a single annotation by ID.
    pub fn get_annotation(&self, id: &str) -> Result<Option<Annotation>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, item_id, text_location, highlight_color, note, is_note, created_at
             FROM annotations WHERE id = ?1",
            params![id],
            Self::row_to_annotation,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get annotation: {}", e)))
    }

    /// Get annotations for a book.
    pub fn get_annotations(&self, user_id: &str, item_id: &str) -> Result<Vec<Annotation>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, item_id, text_location, highlight_color, note, is_note, created_at
                 FROM annotations WHERE user_id = ?1 AND item_id = ?2
                 ORDER BY created_at",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let annotations = stmt
            .query_map(params![user_id, item_id], Self::row_to_annotation)
            .map_err(|e| AppError::Internal(format!("Failed to get annotations: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect annotations: {}", e)))?;

        Ok(annotations)
    }

    fn row_to_annotation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Annotation> {
        Ok(Annotation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            item_id: row.get(2)?,
            text_location: row.get(3)?,
            highlight_color: row.get(4)?,
            note: row.get(5)?,
            is_note: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// Update annotation note and color. Only the owner's row matches.
    pub fn update_annotation(
        &self,
        id: &str,
        user_id: &str,
        note: Option<&str>,
        color: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE annotations SET note = ?1, highlight_color = ?2
                 WHERE id = ?3 AND user_id = ?4",
                params![note, color, id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update annotation: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete annotation. Only the owner's row matches.
    pub fn delete_annotation(&self, id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM annotations WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete annotation: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== ACTIVITY LOG OPERATIONS ==========

    /// Append an activity log entry. Returns the new entry ID.
    pub fn insert_activity(
        &self,
        actor_id: &str,
        action_type: &str,
        affected_resource: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO activity_log (actor_id, action_type, affected_resource, ip_address, created_at, is_archived)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![actor_id, action_type, affected_resource, ip_address, now_timestamp()],
        )
        .map_err(|e| AppError::Internal(format!("Failed to insert activity: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    /// List activity logs with filters and pagination. Returns (page, total).
    pub fn list_activity(&self, filter: &ActivityFilter) -> Result<(Vec<ActivityLog>, i64)> {
        let conn = self.conn.lock();

        let limit = filter.limit.max(1) as i64;
        let offset = (filter.page.max(1) as i64 - 1) * limit;
        let include_archived = filter.include_archived as i64;

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM activity_log
                 WHERE (?1 IS NULL OR actor_id = ?1)
                   AND (?2 IS NULL OR action_type = ?2)
                   AND (?3 IS NULL OR created_at >= ?3)
                   AND (?4 IS NULL OR created_at <= ?4)
                   AND (?5 = 1 OR is_archived = 0)",
                params![
                    filter.actor_id,
                    filter.action_type,
                    filter.start_date,
                    filter.end_date,
                    include_archived,
                ],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("Failed to count activity: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, actor_id, action_type, affected_resource, ip_address, created_at, is_archived
                 FROM activity_log
                 WHERE (?1 IS NULL OR actor_id = ?1)
                   AND (?2 IS NULL OR action_type = ?2)
                   AND (?3 IS NULL OR created_at >= ?3)
                   AND (?4 IS NULL OR created_at <= ?4)
                   AND (?5 = 1 OR is_archived = 0)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?6 OFFSET ?7",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let logs = stmt
            .query_map(
                params![
                    filter.actor_id,
                    filter.action_type,
                    filter.start_date,
                    filter.end_date,
                    include_archived,
                    limit,
                    offset,
                ],
                Self::row_to_activity,
            )
            .map_err(|e| AppError::Internal(format!("Failed to list activity: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect activity: {}", e)))?;

        Ok((logs, total))
    }

    fn row_to_activity(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityLog> {
        Ok(ActivityLog {
            id: row.get(0)?,
            actor_id: row.get(1)?,
            action_type: row.get(2)?,
            affected_resource: row.get(3)?,
            ip_address: row.get(4)?,
            created_at: row.get(5)?,
            is_archived: row.get(6)?,
        })
    }

    /// Archive explicit log entries. Returns the number of rows flipped.
    pub fn archive_activity_by_ids(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock();
        let placeholders: Vec<String> = ids.iter().map(|_| "?".to_string()).collect();
        let sql = format!(
            "UPDATE activity_log SET is_archived = 1 WHERE is_archived = 0 AND id IN ({})",
            placeholders.join(",")
        );

        let archived = conn
            .execute(&sql, rusqlite::params_from_iter(ids))
            .map_err(|e| AppError::Internal(format!("Failed to archive activity: {}", e)))?;

        Ok(archived)
    }

    /// Archive log entries older than the cutoff timestamp.
    pub fn archive_activity_older_than(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let archived = conn
            .execute(
                "UPDATE activity_log SET is_archived = 1 WHERE is_archived = 0 AND created_at < ?1",
                params![cutoff],
            )
            .map_err(|e| AppError::Internal(format!("Failed to archive activity: {}", e)))?;
        Ok(archived)
    }

    /// Archive every unarchived log entry.
    pub fn archive_all_activity(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let archived = conn
            .execute(
                "UPDATE activity_log SET is_archived = 1 WHERE is_archived = 0",
                [],
            )
            .map_err(|e| AppError::Internal(format!("Failed to archive activity: {}", e)))?;
        Ok(archived)
    }

    // ========== STATS ==========

    /// Catalog-wide counts.
    pub fn stats(&self) -> Result<Stats> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM items),
                (SELECT COUNT(*) FROM categories),
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM annotations)",
            [],
            |row| {
                Ok(Stats {
                    items: row.get(0)?,
                    categories: row.get(1)?,
                    users: row.get(2)?,
                    annotations: row.get(3)?,
                })
            },
        )
        .map_err(|e| AppError::Internal(format!("Failed to get stats: {}", e)))
    }
}
