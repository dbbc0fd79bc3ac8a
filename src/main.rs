//! parish-library server entry point.

use clap::Parser;
use parish_library::{
    auth::AuthService,
    config::{CategoryCommand, Cli, Command, Config, UserCommand},
    db::{self, Database},
    server,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Category { action }) => cmd_category(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: parish-library category add <name>");
    println!("And: parish-library user add <username> --email <email> --role admin");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(
        db,
        config.auth.session_days,
        config.auth.registration_enabled(),
    );

    match action {
        UserCommand::Add {
            username,
            email,
            password,
            role,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&username, &email, &password, &role)?;
            println!(
                "Created user: {} (role: {}, id: {})",
                user.username, user.role, user.id
            );
        }

        UserCommand::Del { username } => {
            if auth.delete_user(&username)? {
                println!("Deleted user: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<20} {:<30} {:<10} LAST LOGIN",
                    "USERNAME", "EMAIL", "ROLE"
                );
                println!("{}", "-".repeat(80));
                for user in users {
                    let last_login = user
                        .last_login
                        .map(|ts| {
                            db::timestamp_to_datetime(ts)
                                .format("%Y-%m-%d %H:%M")
                                .to_string()
                        })
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:<20} {:<30} {:<10} {}",
                        user.username, user.email, user.role, last_login
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&username, &password)? {
                println!("Password changed for: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }
    }

    Ok(())
}

/// Category management commands.
async fn cmd_category(action: CategoryCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        CategoryCommand::Add { name, description } => {
            let category = db::Category {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.clone(),
                description,
                created_at: db::now_timestamp(),
            };

            db.create_category(&category)?;
            println!("Added category: {} (id: {})", name, category.id);
        }

        CategoryCommand::Del { name } => {
            let Some(category) = db
                .list_categories()?
                .into_iter()
                .find(|c| c.name == name)
            else {
                println!("Category not found: {}", name);
                return Ok(());
            };

            let count = db.count_items_in_category(&category.id)?;
            if count > 0 {
                anyhow::bail!(
                    "Cannot delete category '{}': in use by {} book(s)",
                    category.name,
                    count
                );
            }

            db.delete_category(&category.id)?;
            println!("Deleted category: {}", name);
        }

        CategoryCommand::List => {
            let categories = db.list_categories()?;
            if categories.is_empty() {
                println!("No categories found.");
            } else {
                println!("{:<25} {:<8} DESCRIPTION", "NAME", "BOOKS");
                println!("{}", "-".repeat(80));
                for category in categories {
                    let count = db.count_items_in_category(&category.id)?;
                    println!(
                        "{:<25} {:<8} {}",
                        category.name,
                        count,
                        category.description.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parish_library=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Open database
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&config.database.path)?;

    // Create auth service
    let auth = AuthService::new(
        db.clone(),
        config.auth.session_days,
        config.auth.registration_enabled(),
    );

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        "Starting parish-library server"
    );

    // Create application state
    let state = server::AppState::new(config.clone(), db.clone(), auth);

    // Background session cleanup, hourly
    {
        let db = db.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;
                match db.cleanup_expired_sessions() {
                    Ok(n) if n > 0 => {
                        tracing::debug!(removed = n, "Cleaned up expired sessions");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
                }
            }
        });
    }

    // Create router
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
