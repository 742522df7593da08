use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use panel::admin::datasource_handlers::insert_data_source;
use panel::admin::dto::CreateDataSourceRequest;
use panel::admin::{AdminState, admin_router};
use panel::client::ClientFactory;
use panel::config::{AppConfig, redact_db_url};
use panel::crypto::{CredentialCipher, MasterKeyCipher};
use panel::pool::ConnectionPool;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "panel", about = "Panel — admin data-source service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin API server (default)
    Serve,
    /// Manage data sources
    Datasource {
        #[command(subcommand)]
        action: DataSourceAction,
    },
}

#[derive(Subcommand)]
enum DataSourceAction {
    /// Register a data source
    Add {
        #[arg(long)]
        name: String,
        /// postgresql, mysql, mariadb or mssql
        #[arg(long)]
        dialect: String,
        /// Credentials as JSON: {"host", "port", "database", "user", "password", "useSsl"}
        /// or {"url": "..."}
        #[arg(long)]
        credentials: String,
        /// Non-secret options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Init structured logging (respects RUST_LOG; defaults to info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    if config.encryption_key_generated {
        tracing::warn!(
            "PANEL_ENCRYPTION_KEY not set — using a random key. \
             Stored credentials will be unreadable after restart. \
             Set PANEL_ENCRYPTION_KEY to a 64-char hex string (32 bytes) in production."
        );
    }

    // Connect to admin DB and run migrations
    tracing::info!(database = %redact_db_url(&config.admin_database_url), "connecting to database");
    let db = Database::connect(&config.admin_database_url).await?;
    Migrator::up(&db, None).await?;
    tracing::info!("database initialized");

    let cipher: Arc<dyn CredentialCipher> = Arc::new(MasterKeyCipher::new(config.encryption_key));

    match cli.command {
        None | Some(Commands::Serve) => serve(config, db, cipher).await?,
        Some(Commands::Datasource { action }) => handle_datasource_action(db, cipher, action).await?,
    }

    Ok(())
}

async fn serve(
    config: AppConfig,
    db: DatabaseConnection,
    cipher: Arc<dyn CredentialCipher>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::debug!(config = ?config, "effective configuration");

    let factory = Arc::new(ClientFactory::new(cipher.clone()));
    let pool = Arc::new(ConnectionPool::new(factory, config.pool));

    let state = AdminState {
        db,
        pool: pool.clone(),
        cipher,
        query_timeout: config.query_timeout,
        cors_allowed_origins: config.cors_allowed_origins.clone(),
    };

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Admin API online");

    axum::serve(listener, admin_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;

    pool.shutdown().await;
    Ok(())
}

async fn handle_datasource_action(
    db: DatabaseConnection,
    cipher: Arc<dyn CredentialCipher>,
    action: DataSourceAction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match action {
        DataSourceAction::Add {
            name,
            dialect,
            credentials,
            options,
        } => {
            let request = CreateDataSourceRequest {
                name,
                dialect,
                credentials: serde_json::from_str(&credentials)?,
                options: options.as_deref().map(|s| serde_json::from_str(s)).transpose()?,
            };
            let model = insert_data_source(&db, cipher.as_ref(), request)
                .await
                .map_err(|e| e.to_string())?;
            tracing::info!(
                datasource_id = %model.id,
                name = %model.name,
                dialect = %model.dialect,
                "Created data source"
            );
        }
    }
    Ok(())
}
