//! # Command Line Interface
//!
//! `serve` runs the executor, the rotation scheduler and the job API until
//! interrupted. The one-shot commands run a single job in-process and tail its
//! task log to stdout until it finishes.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::start_api_server;
use crate::config;
use crate::context::FleetContext;
use crate::jobs::register_fleet_jobs;
use crate::observability::{init_observability, log_config_info};
use crate::scheduler::RotationScheduler;
use crate::services::key_rotation::set_policy_token;
use crate::storage::{create_pool, run_migrations};
use crate::tasks::{Executor, ExecutorHandle, JobKind, JobRegistry, TaskState};

const TAIL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "dirfleet")]
#[command(about = "Directory-server fleet orchestration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL override
    #[arg(long)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the job executor, rotation scheduler and job API
    Serve,

    /// Apply pending record store migrations
    Migrate,

    /// Provision a directory node
    Provision {
        /// Server node id
        server_id: i64,
    },

    /// Initialize a provider: optional LDIF import and replication user
    InitProvider {
        /// Server node id
        server_id: i64,

        /// Import `<ldif_dir>/<id>_init.ldif` before adding the replication user
        #[arg(long)]
        ldif: bool,
    },

    /// Verify replication from every provider to its consumers
    Verify,

    /// Rotate the authentication signing keys
    Rotate {
        /// Policy id (defaults to the first configured policy)
        #[arg(long)]
        policy_id: Option<i64>,

        /// Only rotate when the policy is due
        #[arg(long)]
        if_due: bool,
    },

    /// Store the signing-service token of a rotation policy
    SetSigningToken {
        /// Policy id
        policy_id: i64,

        /// Token value; read from DIRFLEET_SIGNING_TOKEN when omitted
        #[arg(long, env = "DIRFLEET_SIGNING_TOKEN", hide_env_values = true)]
        token: String,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load()?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    init_observability(&config.observability)?;
    log_config_info(&config);

    let pool = create_pool(&config.database).await?;
    if let Commands::Migrate = cli.command {
        run_migrations(&pool).await?;
        println!("Migrations applied");
        return Ok(());
    }

    let ctx = Arc::new(FleetContext::from_config(config, pool));

    match cli.command {
        Commands::Serve => serve(ctx).await?,
        Commands::Migrate => {}
        Commands::Provision { server_id } => {
            run_job(ctx, JobKind::Provision, json!({"server_id": server_id})).await?
        }
        Commands::InitProvider { server_id, ldif } => {
            run_job(
                ctx,
                JobKind::InitializeProvider,
                json!({"server_id": server_id, "use_ldif": ldif}),
            )
            .await?
        }
        Commands::Verify => run_job(ctx, JobKind::VerifyReplication, json!({})).await?,
        Commands::Rotate { policy_id, if_due } => {
            let mut args = json!({"force": !if_due});
            if let Some(policy_id) = policy_id {
                args["policy_id"] = json!(policy_id);
            }
            run_job(ctx, JobKind::RotateKeys, args).await?
        }
        Commands::SetSigningToken { policy_id, token } => {
            set_policy_token(&ctx, policy_id, &token).await?;
            println!("Signing token stored for policy {}", policy_id);
        }
    }

    Ok(())
}

fn start_executor(ctx: &Arc<FleetContext>) -> (Executor, ExecutorHandle) {
    let mut registry = JobRegistry::new();
    register_fleet_jobs(&mut registry, Arc::clone(ctx));
    Executor::start(&ctx.config.executor, registry, Arc::clone(&ctx.log_store))
}

async fn serve(ctx: Arc<FleetContext>) -> anyhow::Result<()> {
    let (executor, handle) = start_executor(&ctx);
    let shutdown = CancellationToken::new();

    let scheduler = if ctx.config.rotation.scheduler_enabled {
        Some(RotationScheduler::new(Arc::clone(&ctx), executor.clone()).spawn(shutdown.clone()))
    } else {
        info!("Rotation scheduler disabled");
        None
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal.cancel();
    });

    let api_shutdown = shutdown.clone();
    let served =
        start_api_server(&ctx.config.api, executor, async move { api_shutdown.cancelled().await })
            .await;

    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }
    handle.shutdown();
    handle.join().await;

    served?;
    Ok(())
}

/// Submit one job and print its task log until it reaches a terminal state
async fn run_job(ctx: Arc<FleetContext>, kind: JobKind, args: serde_json::Value) -> anyhow::Result<()> {
    let (executor, handle) = start_executor(&ctx);
    let task_id = executor.submit(kind.as_str(), args)?;
    println!("{} task {}", kind, task_id);

    let mut printed = 0;
    let view = loop {
        let view = executor.get_log(&task_id).await?;
        for entry in view.messages.iter().skip(printed) {
            match entry.extras.get("host") {
                Some(host) => println!("[{}] {}: {}", entry.level.as_str(), host, entry.msg),
                None => println!("[{}] {}", entry.level.as_str(), entry.msg),
            }
        }
        printed = printed.max(view.messages.len());
        if view.state.is_terminal() {
            break view;
        }
        tokio::time::sleep(TAIL_INTERVAL).await;
    };

    handle.shutdown();
    handle.join().await;

    if let Some(result) = &view.result {
        println!("result: {}", result);
    }
    match view.state {
        TaskState::Success => Ok(()),
        state => anyhow::bail!("{} task {} finished with state {}", kind, task_id, state.as_str()),
    }
}
