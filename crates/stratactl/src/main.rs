use anyhow::Context;
use catalog::Registry;
use clap::{Parser, Subcommand};
use entity::{EntityManager, GetRequest, QueryLimits, QueryRequest};
use federation::{build_object_store, probe_object_store, Coordinator};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{PgRepository, RecordRepository};
use tokio_util::sync::CancellationToken;

mod config;
use config::Config;

/// Operations console for a strata deployment.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "STRATA_CONFIG", default_value = "strata.json")]
    config: PathBuf,

    /// Log filter, e.g. `info` or `stratactl=debug,sqlx=warn`.
    #[arg(long, env = "STRATA_LOG", default_value = "info")]
    log: String,

    /// Load the schema catalog through the registry table instead of
    /// assigning ids from the schema directory alone.
    #[arg(long, env = "STRATA_REGISTRY_FROM_STORE")]
    registry_from_store: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the loaded schemas.
    Schemas,
    /// Fetch one record as JSON.
    Get {
        schema: String,
        /// Record id, base32 or canonical UUID.
        id: String,
        /// Attribute paths to project, comma-separated.
        #[arg(long, value_delimiter = ',')]
        attrs: Vec<String>,
    },
    /// Run a paginated condition query.
    Query {
        schema: String,
        /// Condition tree as JSON, e.g.
        /// '{"logic":"and","children":[{"attr":"name","value":"starts_with:Al"}]}'.
        #[arg(long)]
        condition: Option<String>,
        /// Sort attribute; prefix with `-` for descending.
        #[arg(long)]
        sort_by: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "0")]
        items_per_page: u32,
        #[arg(long, value_delimiter = ',')]
        attrs: Vec<String>,
        /// Merge the columnar tier into the read.
        #[arg(long)]
        federated: bool,
        /// Break exact update ties toward the hot tier.
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        prefer_hot: bool,
    },
    /// Probe the row store, the columnar tier, and the object store.
    Health,
    /// Apply the hot-tier table migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log)
                .context("parsing the log filter")?,
        )
        .init();

    let config = Config::load(&cli.config)?;
    match cli.command {
        Command::Schemas => {
            let manager = connect(&config, cli.registry_from_store).await?;
            for name in manager.registry().list() {
                println!("{name}");
            }
        }
        Command::Get { schema, id, attrs } => {
            let manager = connect(&config, cli.registry_from_store).await?;
            let entity = manager.get(GetRequest { schema, id, attrs }).await?;
            println!("{}", serde_json::to_string_pretty(&entity)?);
        }
        Command::Query {
            schema,
            condition,
            sort_by,
            page,
            items_per_page,
            attrs,
            federated,
            prefer_hot,
        } => {
            let manager = connect(&config, cli.registry_from_store).await?;
            let condition = condition
                .map(|raw| serde_json::from_str(&raw).context("parsing the condition tree"))
                .transpose()?;
            let request = QueryRequest {
                schema,
                condition,
                sort_by: sort_by.into_iter().map(parse_sort).collect(),
                page,
                items_per_page,
                attrs,
            };

            if federated {
                let cancel = CancellationToken::new();
                let (result, plan) =
                    manager.federated_query(request, prefer_hot, &cancel).await?;
                for entity in &result.data {
                    println!("{}", serde_json::to_string(entity)?);
                }
                eprintln!(
                    "page {}/{} of {} records; plan: {}",
                    result.current_page,
                    result.total_pages,
                    result.total_records,
                    serde_json::to_string(&plan)?,
                );
            } else {
                let result = manager.query(request).await?;
                for entity in &result.data {
                    println!("{}", serde_json::to_string(entity)?);
                }
                eprintln!(
                    "page {}/{} of {} records",
                    result.current_page, result.total_pages, result.total_records,
                );
            }
        }
        Command::Health => health(&config).await?,
        Command::Migrate => {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect(&config.database.url())
                .await
                .context("connecting to the row store")?;
            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .context("applying migrations")?;
            println!("migrations applied");
        }
    }
    Ok(())
}

fn parse_sort(raw: String) -> models::AttributeOrder {
    match raw.strip_prefix('-') {
        Some(attr) => models::AttributeOrder {
            attr: attr.to_string(),
            descending: true,
        },
        None => models::AttributeOrder {
            attr: raw,
            descending: false,
        },
    }
}

/// Wire the engine together: pool, registry, repository, and (when the
/// columnar tier is enabled) the federated coordinator.
async fn connect(config: &Config, registry_from_store: bool) -> anyhow::Result<EntityManager> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_millis(config.database.timeout))
        .connect(&config.database.url())
        .await
        .context("connecting to the row store")?;

    let tables: store::TableNames = config.entity.table_names.clone().into();
    let registry = if registry_from_store {
        Registry::from_store(&pool, &tables.schema_registry, &config.schema_directory).await?
    } else {
        Registry::from_directory(&config.schema_directory)?
    };

    let repository: Arc<dyn RecordRepository> =
        Arc::new(PgRepository::new(pool, tables)?);
    let limits = QueryLimits {
        default_page_size: config.query.default_page_size,
        max_page_size: config.query.max_page_size,
    };

    let mut manager = EntityManager::new(Arc::new(registry), Arc::clone(&repository), limits);
    if config.columnar.enabled {
        // The deployment supplies the engine binding; without one the
        // coordinator still runs and degrades to hot-only.
        manager = manager.with_coordinator(Coordinator::new(repository, None));
    }
    Ok(manager)
}

async fn health(config: &Config) -> anyhow::Result<()> {
    let deadline = Duration::from_secs(5);
    let mut healthy = true;

    let row_store = async {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(deadline)
            .connect(&config.database.url())
            .await?;
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&pool).await
    };
    match tokio::time::timeout(deadline, row_store).await {
        Ok(Ok(_)) => println!("row store: ok"),
        Ok(Err(err)) => {
            healthy = false;
            println!("row store: failed ({err})");
        }
        Err(_) => {
            healthy = false;
            println!("row store: timed out");
        }
    }

    match &config.object_store {
        Some(object_config) => {
            let probe = async {
                let store = build_object_store(object_config)?;
                probe_object_store(store.as_ref(), &object_config.prefix, deadline).await
            };
            match probe.await {
                Ok(()) => println!("object store: ok"),
                Err(err) => {
                    healthy = false;
                    println!("object store: failed ({err})");
                }
            }
        }
        None => println!("object store: not configured"),
    }

    if config.columnar.enabled {
        println!("columnar tier: configured (engine binding is deployment-provided)");
    } else {
        println!("columnar tier: disabled");
    }

    if healthy {
        Ok(())
    } else {
        anyhow::bail!("one or more probes failed");
    }
}
