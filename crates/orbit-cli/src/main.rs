mod agents_cmd;
mod cancel_cmd;
mod config;
mod serve_cmd;
mod status_cmd;
mod submit_cmd;
mod worker_cmd;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use orbit_db::pool;

use config::OrbitConfig;

#[derive(Parser)]
#[command(name = "orbit", about = "Distributed task orchestrator for heterogeneous worker agents")]
struct Cli {
    /// Database URL (overrides ORBIT_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an orbit config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/orbit")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the orbit database (creates it, runs migrations)
    DbInit,
    /// Submit a new task to the orchestrator
    Submit {
        /// Unique task ID (generated if omitted)
        #[arg(long)]
        task_id: Option<String>,
        /// Task type, e.g. report_generation, real_time_monitoring
        task_type: String,
        /// JSON input payload
        #[arg(long, default_value = "{}")]
        input: String,
        /// Priority, higher runs first
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Maximum retry attempts
        #[arg(long, default_value_t = 3)]
        max_retries: i32,
    },
    /// Show a task's current status (omit task_id to list queue depths)
    Status {
        /// Task ID to show status for
        task_id: Option<String>,
    },
    /// Cancel a pending or running task
    Cancel {
        /// Task ID to cancel
        task_id: String,
    },
    /// List registered agents and their health
    Agents,
    /// Run the orchestrator HTTP API and background loops
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port to bind to
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run a worker process that registers itself with the state store
    Worker {
        /// Capability this worker serves, e.g. ingest, analyze, summary
        capability: String,
        /// Address this worker's HTTP server binds to
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port this worker's HTTP server binds to
        #[arg(long, default_value_t = 9000)]
        port: u16,
        /// Worker ID to register under (generated if omitted)
        #[arg(long)]
        worker_id: Option<String>,
        /// Maximum concurrent task executions for this worker
        #[arg(long, default_value_t = 10)]
        max_concurrent_tasks: i32,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Execute the `orbit init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: Some(db_url.to_string()),
        },
        orchestrator: config::OrchestratorSection {
            metrics_port: Some(config::DEFAULT_METRICS_PORT),
            max_workers: Some(config::DEFAULT_MAX_WORKERS),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `orbit db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `orbit db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = OrbitConfig::resolve(cli_db_url)?;

    println!("Initializing orbit database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("orbit db-init complete.");
    Ok(())
}

fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Submit {
            task_id,
            task_type,
            input,
            priority,
            max_retries,
        } => {
            let resolved = OrbitConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = submit_cmd::run_submit(
                &db_pool,
                task_id.as_deref(),
                &task_type,
                &input,
                priority,
                max_retries,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { task_id } => {
            let resolved = OrbitConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, task_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cancel { task_id } => {
            let resolved = OrbitConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cancel_cmd::run_cancel(&db_pool, &task_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Agents => {
            let resolved = OrbitConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = agents_cmd::run_agents(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = OrbitConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = serve_cmd::run_serve(db_pool.clone(), &bind, port, &resolved).await;
            db_pool.close().await;
            result?;
        }
        Commands::Worker {
            capability,
            bind,
            port,
            worker_id,
            max_concurrent_tasks,
        } => {
            let resolved = OrbitConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = worker_cmd::run_worker(
                db_pool.clone(),
                &capability,
                &bind,
                port,
                worker_id.as_deref(),
                max_concurrent_tasks,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Completions { shell } => {
            cmd_completions(shell);
        }
    }

    Ok(())
}
