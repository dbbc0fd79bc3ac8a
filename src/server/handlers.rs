//! HTTP request handlers.

use crate::auth::TokenStatus;
use crate::db::{
    self, ActivityFilter, ActivityLog, Annotation, Category, LibraryItem, ReadingProgress,
};
use crate::error::{AppError, Result};
use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

// ============================================================================
// WEB PAGES
// ============================================================================

/// Index page (simple HTML).
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let stats = state.db.stats().unwrap_or(db::Stats {
        items: 0,
        categories: 0,
        users: 0,
        annotations: 0,
    });

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>
        body {{ font-family: system-ui, sans-serif; max-width: 600px; margin: 2rem auto; padding: 0 1rem; }}
        h1 {{ color: #333; }}
        a {{ color: #0066cc; }}
        .stats {{ background: #f5f5f5; padding: 1rem; border-radius: 8px; margin: 1rem 0; }}
        code {{ background: #e8e8e8; padding: 0.2rem 0.4rem; border-radius: 4px; }}
    </style>
</head>
<body>
    <h1>📚 {title}</h1>
    <div class="stats">
        <p><strong>{items}</strong> books in <strong>{categories}</strong> categories</p>
    </div>
    <h2>API</h2>
    <p>Point the dashboard or the reading app at <code>/api</code>.</p>
    <ul>
        <li><a href="/api/stats">Stats (JSON)</a></li>
    </ul>
</body>
</html>"#,
        title = state.config.server.title,
        items = stats.items,
        categories = stats.categories,
    );

    Html(html)
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user_id: String,
    username: String,
    role: String,
}

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.username, &req.password)?;

    // Server-side audit entry; failure here must not fail the login.
    if let Err(e) =
        state
            .db
            .insert_activity(&user.id, "login", None, client_ip(&headers).as_deref())
    {
        tracing::warn!(error = %e, "Failed to record login activity");
    }

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        role: user.role,
    }))
}

/// Auth register.
pub async fn auth_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>> {
    let _user = state.auth.register(&req.username, &req.email, &req.password)?;
    let (user, token) = state.auth.login(&req.username, &req.password)?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        role: user.role,
    }))
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::OK)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers)?;
    Ok(Json(user))
}

// ============================================================================
// PROGRESS API
// ============================================================================

/// Progress upsert request.
#[derive(Debug, Deserialize)]
pub struct ProgressUpsertRequest {
    item_id: String,
    progress: f64,
}

/// Upsert reading progress for the caller.
///
/// Find-or-create keyed on (user, item); last writer wins.
pub async fn progress_upsert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProgressUpsertRequest>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers)?;

    validate_progress(req.progress)?;

    let progress = ReadingProgress {
        user_id: user.id,
        item_id: req.item_id,
        progress: req.progress,
        last_read: db::now_timestamp(),
    };

    state.db.upsert_progress(&progress)?;
    Ok(StatusCode::OK)
}

fn validate_progress(progress: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&progress) || !progress.is_finite() {
        return Err(AppError::Validation(
            "Progress must be between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

/// Get reading progress for one item.
pub async fn progress_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Result<Json<Option<ReadingProgress>>> {
    let user = get_authenticated_user(&state, &headers)?;
    let progress = state.db.get_progress(&user.id, &item_id)?;
    Ok(Json(progress))
}

/// List all reading progress for the caller, most recent first.
pub async fn progress_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReadingProgress>>> {
    let user = get_authenticated_user(&state, &headers)?;
    let rows = state.db.get_user_progress(&user.id)?;
    Ok(Json(rows))
}

// ============================================================================
// ANNOTATION API
// ============================================================================

/// Annotation listing query.
#[derive(Debug, Deserialize)]
pub struct AnnotationQuery {
    item_id: String,
}

/// List the caller's annotations for an item.
pub async fn annotations_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AnnotationQuery>,
) -> Result<Json<Vec<Annotation>>> {
    let user = get_authenticated_user(&state, &headers)?;
    let annotations = state.db.get_annotations(&user.id, &query.item_id)?;
    Ok(Json(annotations))
}

/// Annotation create request.
#[derive(Debug, Deserialize)]
pub struct AnnotationCreateRequest {
    item_id: String,
    text_location: Option<String>,
    highlight_color: Option<String>,
    note: Option<String>,
    #[serde(default)]
    is_note: bool,
}

/// Create an annotation.
pub async fn annotation_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnnotationCreateRequest>,
) -> Result<(StatusCode, Json<Annotation>)> {
    let user = get_authenticated_user(&state, &headers)?;

    // A pure highlight addresses a range; only free-form notes may omit it.
    if !req.is_note && req.text_location.is_none() {
        return Err(AppError::Validation(
            "Highlight requires a text location".to_string(),
        ));
    }

    let annotation = Annotation {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.id,
        item_id: req.item_id,
        text_location: req.text_location,
        highlight_color: req.highlight_color.unwrap_or_else(|| "yellow".to_string()),
        note: req.note,
        is_note: req.is_note,
        created_at: db::now_timestamp(),
    };

    state.db.create_annotation(&annotation)?;
    Ok((StatusCode::CREATED, Json(annotation)))
}

/// Annotation update request. Only note text and color are mutable.
#[derive(Debug, Deserialize)]
pub struct AnnotationUpdateRequest {
    note: Option<String>,
    highlight_color: Option<String>,
}

/// Update an annotation's note or color.
pub async fn annotation_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AnnotationUpdateRequest>,
) -> Result<Json<Annotation>> {
    let user = get_authenticated_user(&state, &headers)?;

    let existing = state
        .db
        .get_annotation(&id)?
        .filter(|a| a.user_id == user.id)
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))?;

    let note = req.note.or(existing.note);
    let color = req.highlight_color.unwrap_or(existing.highlight_color);

    state
        .db
        .update_annotation(&id, &user.id, note.as_deref(), &color)?;

    state
        .db
        .get_annotation(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))
}

/// Delete an annotation owned by the caller.
pub async fn annotation_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers)?;

    if !state.db.delete_annotation(&id, &user.id)? {
        return Err(AppError::NotFound(format!("Annotation not found: {}", id)));
    }

    Ok(StatusCode::OK)
}

// ============================================================================
// ACTIVITY API
// ============================================================================

/// Activity log request.
#[derive(Debug, Deserialize)]
pub struct ActivityLogRequest {
    action_type: String,
    affected_resource: Option<String>,
}

/// Activity log response.
#[derive(Debug, Serialize)]
pub struct ActivityLogResponse {
    log_id: i64,
}

/// Record an activity entry for the caller.
pub async fn activity_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ActivityLogRequest>,
) -> Result<(StatusCode, Json<ActivityLogResponse>)> {
    let user = get_authenticated_user(&state, &headers)?;

    if req.action_type.trim().is_empty() {
        return Err(AppError::Validation("action_type is required".to_string()));
    }

    let log_id = state.db.insert_activity(
        &user.id,
        &req.action_type,
        req.affected_resource.as_deref(),
        client_ip(&headers).as_deref(),
    )?;

    Ok((StatusCode::CREATED, Json(ActivityLogResponse { log_id })))
}

/// Activity listing query.
#[derive(Debug, Deserialize)]
pub struct ActivityLogsQuery {
    user_id: Option<String>,
    action_type: Option<String>,
    start_date: Option<i64>,
    end_date: Option<i64>,
    #[serde(default)]
    include_archived: bool,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

/// Paginated activity listing response.
#[derive(Debug, Serialize)]
pub struct ActivityLogsResponse {
    logs: Vec<ActivityLog>,
    total: i64,
    page: u32,
    limit: u32,
}

/// List activity logs (admin).
pub async fn activity_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActivityLogsQuery>,
) -> Result<Json<ActivityLogsResponse>> {
    get_admin_user(&state, &headers)?;

    let filter = ActivityFilter {
        actor_id: query.user_id,
        action_type: query.action_type,
        start_date: query.start_date,
        end_date: query.end_date,
        include_archived: query.include_archived,
        page: query.page,
        limit: query.limit.clamp(1, 500),
    };

    let (logs, total) = state.db.list_activity(&filter)?;

    Ok(Json(ActivityLogsResponse {
        logs,
        total,
        page: filter.page.max(1),
        limit: filter.limit,
    }))
}

/// Archive request. Exactly one selection mode is expected.
#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    log_ids: Option<Vec<i64>>,
    #[serde(default)]
    archive_all: bool,
    older_than_days: Option<i64>,
}

/// Archive response.
#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    archived_count: usize,
}

/// Which rows an archive request selects.
#[derive(Debug, PartialEq)]
enum ArchiveSelection {
    Ids(Vec<i64>),
    OlderThanDays(i64),
    All,
}

/// Resolve the selection mode of an archive request.
///
/// Precedence: an explicit id list wins, then the age cutoff, then
/// archive_all. A request carrying both log_ids and older_than_days
/// silently ignores the cutoff.
fn archive_selection(req: ArchiveRequest) -> Result<ArchiveSelection> {
    if let Some(ids) = req.log_ids {
        return Ok(ArchiveSelection::Ids(ids));
    }
    if let Some(days) = req.older_than_days {
        if days < 0 {
            return Err(AppError::Validation(
                "older_than_days must be non-negative".to_string(),
            ));
        }
        return Ok(ArchiveSelection::OlderThanDays(days));
    }
    if req.archive_all {
        return Ok(ArchiveSelection::All);
    }
    Err(AppError::Validation(
        "Provide log_ids, older_than_days, or archive_all".to_string(),
    ))
}

/// Archive activity logs (admin).
pub async fn activity_archive(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<ArchiveResponse>> {
    get_admin_user(&state, &headers)?;

    let archived_count = match archive_selection(req)? {
        ArchiveSelection::Ids(ids) => state.db.archive_activity_by_ids(&ids)?,
        ArchiveSelection::OlderThanDays(days) => {
            let cutoff = db::now_timestamp() - days * 24 * 60 * 60;
            state.db.archive_activity_older_than(cutoff)?
        }
        ArchiveSelection::All => state.db.archive_all_activity()?,
    };

    Ok(Json(ArchiveResponse { archived_count }))
}

// ============================================================================
// BOOK API
// ============================================================================

/// Book listing query.
#[derive(Debug, Deserialize)]
pub struct BooksQuery {
    category_id: Option<String>,
}

/// List books, optionally filtered by category.
pub async fn books_list(
    State(state): State<AppState>,
    Query(query): Query<BooksQuery>,
) -> Result<Json<Vec<LibraryItem>>> {
    let items = state.db.list_items(query.category_id.as_deref())?;
    Ok(Json(items))
}

/// Get one book.
pub async fn book_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LibraryItem>> {
    let item = state
        .db
        .get_item(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;
    Ok(Json(item))
}

/// Create a book from a multipart form (admin).
///
/// Expected parts: `title`, `category_id`, optional `author`,
/// `description`, a `file` part with the book file, and a `cover` part.
/// A cover that fails to decode is dropped rather than failing the
/// request; the book is created without one.
pub async fn book_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<LibraryItem>)> {
    get_admin_user(&state, &headers)?;

    let mut title: Option<String> = None;
    let mut category_id: Option<String> = None;
    let mut author: Option<String> = None;
    let mut description: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut cover: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => title = Some(read_text_field(field).await?),
            "category_id" => category_id = Some(read_text_field(field).await?),
            "author" => author = Some(read_text_field(field).await?),
            "description" => description = Some(read_text_field(field).await?),
            "file" => {
                let filename = field.file_name().unwrap_or("book.bin").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {}", e)))?;
                file = Some((filename, data.to_vec()));
            }
            "cover" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read cover: {}", e)))?;
                cover = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let title = title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation("title is required".to_string()))?;
    let category_id =
        category_id.ok_or_else(|| AppError::Validation("category_id is required".to_string()))?;

    // Category must exist before item creation.
    if state.db.get_category(&category_id)?.is_none() {
        return Err(AppError::Validation(format!(
            "Category does not exist: {}",
            category_id
        )));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now_timestamp();

    let (file_path, file_size) = match file {
        Some((filename, data)) => {
            let (path, size) = state.storage.store_file(&id, &filename, &data)?;
            (Some(path), size)
        }
        None => (None, 0),
    };

    // Best-effort cover: a broken image never fails book creation.
    let cover_cached = match cover {
        Some(data) => match state.storage.store_cover(&id, &data) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(item = %id, error = %e, "Cover processing failed, creating book without cover");
                false
            }
        },
        None => false,
    };

    let item = LibraryItem {
        id,
        category_id,
        title,
        author,
        description,
        file_path,
        file_size,
        cover_cached,
        created_at: now,
        updated_at: now,
    };

    state.db.create_item(&item)?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid form field: {}", e)))
}

/// Book update request.
#[derive(Debug, Deserialize)]
pub struct BookUpdateRequest {
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    category_id: Option<String>,
}

/// Update book metadata (admin).
pub async fn book_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<BookUpdateRequest>,
) -> Result<Json<LibraryItem>> {
    get_admin_user(&state, &headers)?;

    let mut item = state
        .db
        .get_item(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    if let Some(category_id) = req.category_id {
        if state.db.get_category(&category_id)?.is_none() {
            return Err(AppError::Validation(format!(
                "Category does not exist: {}",
                category_id
            )));
        }
        item.category_id = category_id;
    }
    if let Some(title) = req.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("title cannot be empty".to_string()));
        }
        item.title = title;
    }
    if req.author.is_some() {
        item.author = req.author;
    }
    if req.description.is_some() {
        item.description = req.description;
    }
    item.updated_at = db::now_timestamp();

    state.db.update_item(&item)?;
    Ok(Json(item))
}

/// Delete a book and its stored files (admin).
pub async fn book_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    get_admin_user(&state, &headers)?;

    let item = state
        .db
        .get_item(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    if let Some(file_path) = &item.file_path {
        state.storage.delete_file(file_path);
    }
    state.storage.delete_cover(&id);

    state.db.delete_item(&id)?;
    Ok(StatusCode::OK)
}

/// Stream the book file.
pub async fn book_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    let user = get_authenticated_user(&state, &headers)?;

    let item = state
        .db
        .get_item(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    let file_path = item
        .file_path
        .as_deref()
        .ok_or_else(|| AppError::NotFound(format!("No file stored for book: {}", id)))?;

    let file = tokio::fs::File::open(state.storage.file_path(file_path)).await?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    if let Err(e) = state.db.insert_activity(
        &user.id,
        "book.download",
        Some(&id),
        client_ip(&headers).as_deref(),
    ) {
        tracing::warn!(error = %e, "Failed to record download activity");
    }

    let content_disposition = format!("attachment; filename=\"{}\"", file_path);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header(header::CONTENT_LENGTH, item.file_size)
        .body(body)
        .unwrap_or_else(|_| Response::default()))
}

/// Book cover image.
pub async fn book_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    let item = state
        .db
        .get_item(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    let cover = state
        .storage
        .get_cover(&item.id)
        .ok_or_else(|| AppError::NotFound(format!("No cover for book: {}", id)))?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from(cover))
        .unwrap_or_else(|_| Response::default()))
}

/// Book thumbnail image. Falls back to the raw cover when downscaling fails.
pub async fn book_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    let item = state
        .db
        .get_item(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    let (data, content_type) = match state.storage.thumbnail(&item.id) {
        Ok(png) => (png, "image/png"),
        Err(AppError::NotFound(msg)) => return Err(AppError::NotFound(msg)),
        Err(e) => {
            tracing::warn!(item = %id, error = %e, "Thumbnail generation failed, serving raw cover");
            let cover = state
                .storage
                .get_cover(&item.id)
                .ok_or_else(|| AppError::NotFound(format!("No cover for book: {}", id)))?;
            (cover, "image/jpeg")
        }
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from(data))
        .unwrap_or_else(|_| Response::default()))
}

// ============================================================================
// CATEGORY API
// ============================================================================

/// List all categories.
pub async fn categories_list(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    let categories = state.db.list_categories()?;
    Ok(Json(categories))
}

/// Category create request.
#[derive(Debug, Deserialize)]
pub struct CategoryCreateRequest {
    name: String,
    description: Option<String>,
}

/// Create a category (admin).
pub async fn category_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CategoryCreateRequest>,
) -> Result<(StatusCode, Json<Category>)> {
    get_admin_user(&state, &headers)?;

    if req.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }

    let category = Category {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        created_at: db::now_timestamp(),
    };

    state.db.create_category(&category)?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// Category update request.
#[derive(Debug, Deserialize)]
pub struct CategoryUpdateRequest {
    name: String,
    description: Option<String>,
}

/// Update a category (admin).
pub async fn category_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CategoryUpdateRequest>,
) -> Result<Json<Category>> {
    get_admin_user(&state, &headers)?;

    if req.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }

    if !state
        .db
        .update_category(&id, &req.name, req.description.as_deref())?
    {
        return Err(AppError::NotFound(format!("Category not found: {}", id)));
    }

    state
        .db
        .get_category(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Category not found: {}", id)))
}

/// Delete a category (admin). Blocked while books reference it.
pub async fn category_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    get_admin_user(&state, &headers)?;

    let category = state
        .db
        .get_category(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Category not found: {}", id)))?;

    let count = state.db.count_items_in_category(&id)?;
    if count > 0 {
        return Err(AppError::Validation(format!(
            "Cannot delete category '{}': in use by {} book(s)",
            category.name, count
        )));
    }

    state.db.delete_category(&id)?;
    Ok(StatusCode::OK)
}

// ============================================================================
// USER API
// ============================================================================

/// List all users (admin).
pub async fn users_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<db::User>>> {
    get_admin_user(&state, &headers)?;
    let users = state.auth.list_users()?;
    Ok(Json(users))
}

/// User create request.
#[derive(Debug, Deserialize)]
pub struct UserCreateRequest {
    username: String,
    email: String,
    password: String,
    #[serde(default = "default_role")]
    role: String,
}

fn default_role() -> String {
    "user".to_string()
}

/// Create a user (admin).
pub async fn user_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UserCreateRequest>,
) -> Result<(StatusCode, Json<db::User>)> {
    get_admin_user(&state, &headers)?;

    let user = state
        .auth
        .create_user(&req.username, &req.email, &req.password, &req.role)?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Delete a user by ID (admin).
pub async fn user_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let admin = get_admin_user(&state, &headers)?;

    if admin.id == id {
        return Err(AppError::Validation(
            "Cannot delete your own account".to_string(),
        ));
    }

    if !state.db.delete_user_by_id(&id)? {
        return Err(AppError::NotFound(format!("User not found: {}", id)));
    }

    Ok(StatusCode::OK)
}

// ============================================================================
// STATS API
// ============================================================================

/// API: Catalog statistics.
pub async fn api_stats(State(state): State<AppState>) -> Result<Json<db::Stats>> {
    Ok(Json(state.db.stats()?))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Client IP from X-Forwarded-For, if the proxy provided one.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Get authenticated user from token.
///
/// Missing or unknown tokens are 401; expired sessions are 403.
fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    match state.auth.validate_token(&token)? {
        TokenStatus::Valid(user) => Ok(user),
        TokenStatus::Expired => Err(AppError::Forbidden("Session expired".to_string())),
        TokenStatus::Invalid => Err(AppError::Unauthorized("Invalid token".to_string())),
    }
}

/// Get authenticated admin user, or 403.
fn get_admin_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let user = get_authenticated_user(state, headers)?;
    if !state.auth.is_admin(&user) {
        return Err(AppError::Forbidden("Admin role required".to_string()));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        log_ids: Option<Vec<i64>>,
        archive_all: bool,
        older_than_days: Option<i64>,
    ) -> ArchiveRequest {
        ArchiveRequest {
            log_ids,
            archive_all,
            older_than_days,
        }
    }

    #[test]
    fn progress_range_validation() {
        assert!(validate_progress(0.0).is_ok());
        assert!(validate_progress(0.42).is_ok());
        assert!(validate_progress(1.0).is_ok());

        assert!(validate_progress(-0.01).is_err());
        assert!(validate_progress(1.01).is_err());
        assert!(validate_progress(f64::NAN).is_err());
    }

    #[test]
    fn archive_id_list_wins_over_cutoff() {
        // Both selectors present: the cutoff is silently ignored.
        let selection =
            archive_selection(request(Some(vec![1, 2]), false, Some(30))).unwrap();
        assert_eq!(selection, ArchiveSelection::Ids(vec![1, 2]));
    }

    #[test]
    fn archive_cutoff_wins_over_all_flag() {
        let selection = archive_selection(request(None, true, Some(7))).unwrap();
        assert_eq!(selection, ArchiveSelection::OlderThanDays(7));
    }

    #[test]
    fn archive_all_flag_alone() {
        let selection = archive_selection(request(None, true, None)).unwrap();
        assert_eq!(selection, ArchiveSelection::All);
    }

    #[test]
    fn archive_no_selector_is_rejected() {
        assert!(matches!(
            archive_selection(request(None, false, None)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn archive_negative_cutoff_is_rejected() {
        assert!(matches!(
            archive_selection(request(None, false, Some(-1))),
            Err(AppError::Validation(_))
        ));
    }
}
