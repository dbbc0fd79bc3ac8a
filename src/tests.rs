use crate::auth::{AuthService, TokenStatus};
use crate::config::Config;
use crate::db::{
    ActivityFilter, Annotation, Category, Database, LibraryItem, ReadingProgress, User,
    now_timestamp,
};
use crate::error::AppError;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, username: &str) {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        email: format!("{}@example.org", username),
        password_hash: "hash".to_string(),
        display_name: None,
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

fn create_category(db: &Database, id: &str, name: &str) {
    let category = Category {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        created_at: now_timestamp(),
    };
    db.create_category(&category).unwrap();
}

fn create_book(db: &Database, id: &str, category_id: &str, title: &str) {
    let item = LibraryItem {
        id: id.to_string(),
        category_id: category_id.to_string(),
        title: title.to_string(),
        author: None,
        description: None,
        file_path: None,
        file_size: 0,
        cover_cached: false,
        created_at: now_timestamp(),
        updated_at: now_timestamp(),
    };
    db.create_item(&item).unwrap();
}

fn setup_user_and_book(db: &Database) {
    create_user(db, "user-1", "testuser");
    create_category(db, "cat-1", "Theology");
    create_book(db, "book-1", "cat-1", "Test Book");
}

// ========== USER TESTS ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    let user = User {
        id: "user-1".to_string(),
        username: "alice".to_string(),
        email: "alice@example.org".to_string(),
        password_hash: "hash".to_string(),
        display_name: Some("Alice".to_string()),
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };

    db.create_user(&user).unwrap();

    let found = db.get_user_by_username("alice").unwrap().unwrap();
    assert_eq!(found.id, "user-1");
    assert_eq!(found.email, "alice@example.org");

    let found_by_id = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(found_by_id.username, "alice");
}

#[test]
fn db_duplicate_email_is_conflict() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    let dup = User {
        id: "user-2".to_string(),
        username: "bob".to_string(),
        email: "alice@example.org".to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };

    match db.create_user(&dup) {
        Err(AppError::Conflict(msg)) => assert!(msg.contains("alice@example.org")),
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[test]
fn auth_register_login_and_validate() {
    let db = test_db();
    let auth = AuthService::new(db, 30, true);

    auth.register("alice", "alice@example.org", "secret").unwrap();
    let (user, token) = auth.login("alice", "secret").unwrap();
    assert_eq!(user.username, "alice");

    match auth.validate_token(&token).unwrap() {
        TokenStatus::Valid(u) => assert_eq!(u.id, user.id),
        _ => panic!("expected valid token"),
    }

    assert!(auth.login("alice", "wrong").is_err());

    auth.logout(&token).unwrap();
    assert!(matches!(
        auth.validate_token(&token).unwrap(),
        TokenStatus::Invalid
    ));
}

#[test]
fn auth_register_disabled() {
    let db = test_db();
    let auth = AuthService::new(db, 30, false);

    assert!(matches!(
        auth.register("alice", "alice@example.org", "secret"),
        Err(AppError::Forbidden(_))
    ));
}

#[test]
fn auth_rejects_bad_input() {
    let db = test_db();
    let auth = AuthService::new(db, 30, true);

    assert!(auth.create_user("", "a@b.c", "secret", "user").is_err());
    assert!(auth.create_user("a b", "a@b.c", "secret", "user").is_err());
    assert!(auth.create_user("alice", "not-an-email", "secret", "user").is_err());
    assert!(auth.create_user("alice", "a@b.c", "abc", "user").is_err());
    assert!(auth.create_user("alice", "a@b.c", "secret", "root").is_err());
}

#[test]
fn auth_expired_session_reports_expired() {
    let db = test_db();
    let auth = AuthService::new(db.clone(), 30, true);

    auth.create_user("alice", "alice@example.org", "secret", "user")
        .unwrap();
    let (user, token) = auth.login("alice", "secret").unwrap();

    // Backdate the session past its expiry.
    db.delete_session(&token).unwrap();
    db.create_session(&crate::db::Session {
        token: token.clone(),
        user_id: user.id,
        expires_at: now_timestamp() - 10,
    })
    .unwrap();

    assert!(matches!(
        auth.validate_token(&token).unwrap(),
        TokenStatus::Expired
    ));

    // The expired session was removed, so a retry is plain invalid.
    assert!(matches!(
        auth.validate_token(&token).unwrap(),
        TokenStatus::Invalid
    ));
}

// ========== PROGRESS TESTS ==========

#[test]
fn progress_upsert_keeps_one_row_per_pair() {
    let db = test_db();
    setup_user_and_book(&db);

    for (i, p) in [0.1, 0.4, 0.73].iter().enumerate() {
        db.upsert_progress(&ReadingProgress {
            user_id: "user-1".to_string(),
            item_id: "book-1".to_string(),
            progress: *p,
            last_read: now_timestamp() + i as i64,
        })
        .unwrap();
    }

    let rows = db.get_user_progress("user-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].progress - 0.73).abs() < 1e-9);

    let row = db.get_progress("user-1", "book-1").unwrap().unwrap();
    assert!((row.progress - 0.73).abs() < 1e-9);
}

#[test]
fn progress_missing_pair_is_none() {
    let db = test_db();
    setup_user_and_book(&db);

    assert!(db.get_progress("user-1", "book-1").unwrap().is_none());
}

#[test]
fn progress_listing_is_most_recent_first() {
    let db = test_db();
    setup_user_and_book(&db);
    create_book(&db, "book-2", "cat-1", "Second Book");

    db.upsert_progress(&ReadingProgress {
        user_id: "user-1".to_string(),
        item_id: "book-1".to_string(),
        progress: 0.9,
        last_read: 1000,
    })
    .unwrap();
    db.upsert_progress(&ReadingProgress {
        user_id: "user-1".to_string(),
        item_id: "book-2".to_string(),
        progress: 0.1,
        last_read: 2000,
    })
    .unwrap();

    let rows = db.get_user_progress("user-1").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].item_id, "book-2");
}

// ========== CATEGORY TESTS ==========

#[test]
fn category_crud() {
    let db = test_db();
    create_category(&db, "cat-1", "Theology");

    let cat = db.get_category("cat-1").unwrap().unwrap();
    assert_eq!(cat.name, "Theology");

    assert!(
        db.update_category("cat-1", "Church History", Some("Patristics and beyond"))
            .unwrap()
    );
    let cat = db.get_category("cat-1").unwrap().unwrap();
    assert_eq!(cat.name, "Church History");

    assert!(db.delete_category("cat-1").unwrap());
    assert!(db.get_category("cat-1").unwrap().is_none());
}

#[test]
fn category_duplicate_name_is_conflict() {
    let db = test_db();
    create_category(&db, "cat-1", "Theology");

    let dup = Category {
        id: "cat-2".to_string(),
        name: "Theology".to_string(),
        description: None,
        created_at: now_timestamp(),
    };
    assert!(matches!(
        db.create_category(&dup),
        Err(AppError::Conflict(_))
    ));
}

#[test]
fn category_in_use_count_blocks_deletion() {
    let db = test_db();
    create_category(&db, "cat-1", "Theology");
    create_book(&db, "book-1", "cat-1", "First");
    create_book(&db, "book-2", "cat-1", "Second");

    let count = db.count_items_in_category("cat-1").unwrap();
    assert_eq!(count, 2);

    // The HTTP and CLI layers refuse deletion on a nonzero count; verify
    // the category and its books stay intact when the guard fires.
    let category = db.get_category("cat-1").unwrap().unwrap();
    let msg = format!(
        "Cannot delete category '{}': in use by {} book(s)",
        category.name, count
    );
    assert_eq!(msg, "Cannot delete category 'Theology': in use by 2 book(s)");
    assert!(db.get_category("cat-1").unwrap().is_some());
    assert_eq!(db.list_items(Some("cat-1")).unwrap().len(), 2);
}

// ========== ITEM TESTS ==========

#[test]
fn item_crud_and_category_filter() {
    let db = test_db();
    create_category(&db, "cat-1", "Theology");
    create_category(&db, "cat-2", "Youth");
    create_book(&db, "book-1", "cat-1", "Confessions");
    create_book(&db, "book-2", "cat-2", "Picture Bible");

    assert_eq!(db.list_items(None).unwrap().len(), 2);
    let filtered = db.list_items(Some("cat-1")).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].title, "Confessions");

    let mut item = db.get_item("book-1").unwrap().unwrap();
    item.author = Some("Augustine".to_string());
    item.updated_at = now_timestamp();
    assert!(db.update_item(&item).unwrap());
    assert_eq!(
        db.get_item("book-1").unwrap().unwrap().author.as_deref(),
        Some("Augustine")
    );

    assert!(db.delete_item("book-1").unwrap());
    assert!(db.get_item("book-1").unwrap().is_none());
}

// ========== ANNOTATION TESTS ==========

#[test]
fn annotation_roundtrip() {
    let db = test_db();
    setup_user_and_book(&db);

    let annotation = Annotation {
        id: "ann-1".to_string(),
        user_id: "user-1".to_string(),
        item_id: "book-1".to_string(),
        text_location: Some("epubcfi(/6/4!/4/10)".to_string()),
        highlight_color: "yellow".to_string(),
        note: Some("check this against the Vulgate".to_string()),
        is_note: false,
        created_at: now_timestamp(),
    };
    db.create_annotation(&annotation).unwrap();

    let found = db.get_annotations("user-1", "book-1").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].text_location.as_deref(), Some("epubcfi(/6/4!/4/10)"));

    assert!(
        db.update_annotation("ann-1", "user-1", Some("revised"), "blue")
            .unwrap()
    );
    let found = db.get_annotation("ann-1").unwrap().unwrap();
    assert_eq!(found.note.as_deref(), Some("revised"));
    assert_eq!(found.highlight_color, "blue");

    assert!(db.delete_annotation("ann-1", "user-1").unwrap());
    assert!(db.get_annotation("ann-1").unwrap().is_none());
}

#[test]
fn annotation_other_user_cannot_touch() {
    let db = test_db();
    setup_user_and_book(&db);
    create_user(&db, "user-2", "other");

    let annotation = Annotation {
        id: "ann-1".to_string(),
        user_id: "user-1".to_string(),
        item_id: "book-1".to_string(),
        text_location: None,
        highlight_color: "yellow".to_string(),
        note: Some("mine".to_string()),
        is_note: true,
        created_at: now_timestamp(),
    };
    db.create_annotation(&annotation).unwrap();

    assert!(!db.update_annotation("ann-1", "user-2", Some("x"), "red").unwrap());
    assert!(!db.delete_annotation("ann-1", "user-2").unwrap());
    assert!(db.get_annotation("ann-1").unwrap().is_some());
}

// ========== ACTIVITY LOG TESTS ==========

fn default_filter() -> ActivityFilter {
    ActivityFilter {
        page: 1,
        limit: 50,
        ..Default::default()
    }
}

#[test]
fn activity_insert_and_list() {
    let db = test_db();
    create_user(&db, "user-1", "testuser");

    let id1 = db
        .insert_activity("user-1", "login", None, Some("10.0.0.5"))
        .unwrap();
    let id2 = db
        .insert_activity("user-1", "book.download", Some("book-1"), None)
        .unwrap();
    assert!(id2 > id1);

    let (logs, total) = db.list_activity(&default_filter()).unwrap();
    assert_eq!(total, 2);
    assert_eq!(logs.len(), 2);
    // Most recent first.
    assert_eq!(logs[0].action_type, "book.download");
    assert_eq!(logs[1].ip_address.as_deref(), Some("10.0.0.5"));
}

#[test]
fn activity_filters_by_actor_and_action() {
    let db = test_db();
    create_user(&db, "user-1", "alice");
    create_user(&db, "user-2", "bob");

    db.insert_activity("user-1", "login", None, None).unwrap();
    db.insert_activity("user-2", "login", None, None).unwrap();
    db.insert_activity("user-2", "book.download", Some("book-1"), None)
        .unwrap();

    let filter = ActivityFilter {
        actor_id: Some("user-2".to_string()),
        ..default_filter()
    };
    let (logs, total) = db.list_activity(&filter).unwrap();
    assert_eq!(total, 2);
    assert!(logs.iter().all(|l| l.actor_id == "user-2"));

    let filter = ActivityFilter {
        action_type: Some("login".to_string()),
        ..default_filter()
    };
    let (_, total) = db.list_activity(&filter).unwrap();
    assert_eq!(total, 2);
}

#[test]
fn activity_pagination() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    for i in 0..7 {
        db.insert_activity("user-1", "login", Some(&format!("n{}", i)), None)
            .unwrap();
    }

    let filter = ActivityFilter {
        page: 2,
        limit: 3,
        ..Default::default()
    };
    let (logs, total) = db.list_activity(&filter).unwrap();
    assert_eq!(total, 7);
    assert_eq!(logs.len(), 3);

    let filter = ActivityFilter {
        page: 3,
        limit: 3,
        ..Default::default()
    };
    let (logs, _) = db.list_activity(&filter).unwrap();
    assert_eq!(logs.len(), 1);
}

#[test]
fn activity_archive_by_ids_hides_from_default_listing() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    let id1 = db.insert_activity("user-1", "login", None, None).unwrap();
    let id2 = db.insert_activity("user-1", "login", None, None).unwrap();
    let _id3 = db.insert_activity("user-1", "login", None, None).unwrap();

    let archived = db.archive_activity_by_ids(&[id1, id2]).unwrap();
    assert_eq!(archived, 2);

    // Archiving the same rows again flips nothing.
    assert_eq!(db.archive_activity_by_ids(&[id1, id2]).unwrap(), 0);
    assert_eq!(db.archive_activity_by_ids(&[]).unwrap(), 0);

    let (logs, total) = db.list_activity(&default_filter()).unwrap();
    assert_eq!(total, 1);
    assert!(!logs[0].is_archived);

    // Rows are never deleted, only flagged.
    let filter = ActivityFilter {
        include_archived: true,
        ..default_filter()
    };
    let (logs, total) = db.list_activity(&filter).unwrap();
    assert_eq!(total, 3);
    assert_eq!(logs.iter().filter(|l| l.is_archived).count(), 2);
}

#[test]
fn activity_archive_older_than_cutoff() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    db.insert_activity("user-1", "login", None, None).unwrap();
    db.insert_activity("user-1", "login", None, None).unwrap();

    // Entries were just created, so a past cutoff archives nothing and a
    // future cutoff archives everything.
    assert_eq!(
        db.archive_activity_older_than(now_timestamp() - 3600).unwrap(),
        0
    );
    assert_eq!(
        db.archive_activity_older_than(now_timestamp() + 3600).unwrap(),
        2
    );
}

#[test]
fn activity_archive_all() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    db.insert_activity("user-1", "login", None, None).unwrap();
    db.insert_activity("user-1", "book.download", None, None)
        .unwrap();

    assert_eq!(db.archive_all_activity().unwrap(), 2);
    assert_eq!(db.archive_all_activity().unwrap(), 0);

    let (_, total) = db.list_activity(&default_filter()).unwrap();
    assert_eq!(total, 0);
}

// ========== SESSION TESTS ==========

#[test]
fn session_cleanup_removes_only_expired() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    db.create_session(&crate::db::Session {
        token: "live".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() + 3600,
    })
    .unwrap();
    db.create_session(&crate::db::Session {
        token: "dead".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() - 3600,
    })
    .unwrap();

    assert_eq!(db.cleanup_expired_sessions().unwrap(), 1);
    assert!(db.get_session("live").unwrap().is_some());
    assert!(db.get_session("dead").unwrap().is_none());
}

// ========== STATS TESTS ==========

#[test]
fn stats_counts() {
    let db = test_db();
    setup_user_and_book(&db);

    db.create_annotation(&Annotation {
        id: "ann-1".to_string(),
        user_id: "user-1".to_string(),
        item_id: "book-1".to_string(),
        text_location: None,
        highlight_color: "yellow".to_string(),
        note: Some("n".to_string()),
        is_note: true,
        created_at: now_timestamp(),
    })
    .unwrap();

    let stats = db.stats().unwrap();
    assert_eq!(stats.items, 1);
    assert_eq!(stats.categories, 1);
    assert_eq!(stats.users, 1);
    assert_eq!(stats.annotations, 1);
}

// ========== CONFIG TESTS ==========

#[test]
fn config_defaults() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.auth.session_days, 30);
    assert!(config.auth.registration_enabled());
    assert_eq!(config.storage.thumbnail_size, 200);
}

#[test]
fn config_parses_partial_toml() {
    let config: Config = toml::from_str(
        r#"
        [server]
        bind = "127.0.0.1:9090"
        title = "St. Mary Parish Library"

        [auth]
        registration = "disabled"
        "#,
    )
    .unwrap();

    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.title, "St. Mary Parish Library");
    assert!(!config.auth.registration_enabled());
    // Untouched sections keep defaults.
    assert_eq!(config.auth.session_days, 30);
    assert_eq!(config.database.path.to_str().unwrap(), "data/library.db");
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.title, "Parish Library");
}
