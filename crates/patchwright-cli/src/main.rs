mod config;
mod serve_cmd;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use patchwright_core::collaborators::{
    CodeHostClient, GitClient, GitHubCodeHostClient, HttpLlmClient, HttpMailTransport, LlmClient,
    MailTransport, ShellGitClient,
};
use patchwright_core::handlers::{default_registry, HandlerContext};
use patchwright_core::retry::RetryPolicy;
use patchwright_core::store::TaskStore;
use patchwright_core::{cleanup, Dispatcher};
use patchwright_db::pool;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "patchwright", about = "Durable multi-stage pipeline for CI build-triage and auto-fix")]
struct Cli {
    /// Database URL (overrides PATCHWRIGHT_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a patchwright config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/patchwright")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the patchwright database (requires config file or env vars)
    DbInit,
    /// Run the dispatcher, cleanup sweep, and HTTP surface (webhook + admin)
    Serve {
        /// Bind address for the HTTP server
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port for the HTTP server
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// List or inspect tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// List or inspect builds
    Build {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Print queue and build counts
    Status,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List tasks, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        size: i64,
    },
    /// Show a single task by ID
    Show { task_id: i64 },
    /// Reset a failed task to pending, attempt 0 (spec.md §4.2 manual override)
    Retry { task_id: i64 },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// List builds, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        size: i64,
    },
    /// Show a single build by ID
    Show { build_id: i64 },
    /// Show all tasks belonging to a build
    Tasks { build_id: i64 },
    /// Requeue every failed task of a build
    Retry { build_id: i64 },
}

fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let signature_secret = config::generate_signature_secret();

    let mut cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        ..Default::default()
    };
    cfg.pipeline.signature_secret = signature_secret.clone();

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  pipeline.signature_secret = {}...{}", &signature_secret[..8], &signature_secret[56..]);
    println!();
    println!("Next: run `patchwright db-init` to create and migrate the database.");
    println!("Fill in [llm], [codehost], and [mail] sections before running `patchwright serve`.");

    Ok(())
}

async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = AppConfig::resolve(cli_db_url);

    println!("Initializing patchwright database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("patchwright db-init complete.");
    Ok(())
}

/// Build the shared [`HandlerContext`] collaborator adapters from resolved
/// configuration. The CLI is the composition root: `patchwright-core` only
/// knows about the `GitClient`/`LlmClient`/`CodeHostClient`/`MailTransport`
/// traits, never about `reqwest` config or CLI flags directly.
fn build_handler_context(pool: sqlx::PgPool, resolved: &AppConfig) -> Arc<HandlerContext> {
    let git: Arc<dyn GitClient> = Arc::new(ShellGitClient::new());
    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(resolved.llm.clone()));
    let codehost: Arc<dyn CodeHostClient> = Arc::new(GitHubCodeHostClient::new(resolved.codehost.clone()));
    let mail: Arc<dyn MailTransport> = Arc::new(HttpMailTransport::new(resolved.mail.clone()));

    Arc::new(HandlerContext {
        pool,
        config: resolved.pipeline.clone(),
        git,
        llm,
        codehost,
        mail,
        notify_recipients: resolved.mail.recipients.clone(),
    })
}

async fn cmd_serve(cli_db_url: Option<&str>, bind: &str, port: u16) -> anyhow::Result<()> {
    let resolved = AppConfig::resolve(cli_db_url);

    if resolved.pipeline.signature_required && resolved.pipeline.signature_secret.is_empty() {
        anyhow::bail!(
            "pipeline.signature_required is set but no signature secret is configured; \
             set PATCHWRIGHT_SIGNATURE_SECRET or pipeline.signature_secret in the config file"
        );
    }

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let store = TaskStore::new(db_pool.clone(), resolved.pipeline.lease_timeout());
    let ctx = build_handler_context(db_pool.clone(), &resolved);
    let registry = default_registry();
    let retry_policy = RetryPolicy::new(
        resolved.pipeline.retry_base(),
        resolved.pipeline.retry_max(),
        resolved.pipeline.retry_jitter_factor,
    );

    let cancellation = tokio_util::sync::CancellationToken::new();

    let dispatcher = Dispatcher::new(
        store,
        db_pool.clone(),
        registry,
        ctx,
        retry_policy,
        resolved.pipeline.clone(),
    );

    let dispatcher_handle = {
        let dispatcher = dispatcher.clone();
        let cancellation = cancellation.clone();
        tokio::spawn(async move { dispatcher.run(cancellation).await })
    };

    let cleanup_handle = {
        let pool = db_pool.clone();
        let pipeline = resolved.pipeline.clone();
        let cancellation = cancellation.clone();
        tokio::spawn(async move { cleanup::run(pool, pipeline, cancellation).await })
    };

    let serve_result = serve_cmd::run_serve(db_pool.clone(), resolved.pipeline.clone(), bind, port).await;

    cancellation.cancel();
    let _ = dispatcher_handle.await;
    let _ = cleanup_handle.await;
    db_pool.close().await;

    serve_result
}

async fn cmd_task(cli_db_url: Option<&str>, command: TaskCommands) -> anyhow::Result<()> {
    let resolved = AppConfig::resolve(cli_db_url);
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    match command {
        TaskCommands::List { status, page, size } => {
            let status = status
                .as_deref()
                .map(|s| s.parse())
                .transpose()
                .map_err(|e: patchwright_db::models::TaskStatusParseError| anyhow::anyhow!(e.to_string()))?;
            let tasks = patchwright_db::queries::tasks::list(&db_pool, status, page, size).await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        TaskCommands::Show { task_id } => {
            let task = patchwright_db::queries::tasks::find(&db_pool, task_id)
                .await?
                .with_context(|| format!("task {task_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskCommands::Retry { task_id } => {
            let retried = patchwright_db::queries::tasks::retry_failed_task(&db_pool, task_id).await?;
            if retried {
                println!("Task {task_id} reset to pending for retry.");
            } else {
                println!("Task {task_id} was not in a failed state; nothing to do.");
            }
        }
    }

    db_pool.close().await;
    Ok(())
}

async fn cmd_build(cli_db_url: Option<&str>, command: BuildCommands) -> anyhow::Result<()> {
    let resolved = AppConfig::resolve(cli_db_url);
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    match command {
        BuildCommands::List { status, page, size } => {
            let status = status
                .as_deref()
                .map(|s| s.parse())
                .transpose()
                .map_err(|e: patchwright_db::models::BuildStatusParseError| anyhow::anyhow!(e.to_string()))?;
            let builds = patchwright_db::queries::builds::list(&db_pool, status, page, size).await?;
            println!("{}", serde_json::to_string_pretty(&builds)?);
        }
        BuildCommands::Show { build_id } => {
            let build = patchwright_db::queries::builds::find(&db_pool, build_id)
                .await?
                .with_context(|| format!("build {build_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&build)?);
        }
        BuildCommands::Tasks { build_id } => {
            let tasks = patchwright_db::queries::tasks::list_for_build(&db_pool, build_id).await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        BuildCommands::Retry { build_id } => {
            let requeued = patchwright_db::queries::tasks::retry_all_failed_for_build(&db_pool, build_id).await?;
            if requeued > 0 {
                patchwright_db::queries::builds::reopen(&db_pool, build_id).await?;
            }
            println!("Requeued {requeued} failed task(s) for build {build_id}.");
        }
    }

    db_pool.close().await;
    Ok(())
}

async fn cmd_status(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = AppConfig::resolve(cli_db_url);
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let tasks_by_status = patchwright_db::queries::tasks::count_by_status(&db_pool).await?;
    let tasks_by_kind = patchwright_db::queries::tasks::count_by_kind(&db_pool).await?;
    let builds_by_status = patchwright_db::queries::builds::count_by_status(&db_pool).await?;

    println!("Tasks by status: {tasks_by_status:#?}");
    println!("Tasks by kind: {tasks_by_kind:#?}");
    println!("Builds by status: {builds_by_status:#?}");

    db_pool.close().await;
    Ok(())
}

fn cmd_completions(shell: clap_complete::Shell) {
    let mut cmd = <Cli as clap::CommandFactory>::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
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
        Commands::Init { db_url, force } => cmd_init(&db_url, force)?,
        Commands::DbInit => cmd_db_init(cli.database_url.as_deref()).await?,
        Commands::Serve { bind, port } => cmd_serve(cli.database_url.as_deref(), &bind, port).await?,
        Commands::Task { command } => cmd_task(cli.database_url.as_deref(), command).await?,
        Commands::Build { command } => cmd_build(cli.database_url.as_deref(), command).await?,
        Commands::Status => cmd_status(cli.database_url.as_deref()).await?,
        Commands::Completions { shell } => cmd_completions(shell),
    }

    Ok(())
}
