mod agents;
mod anthropic;
mod cli;
mod client;
mod config;
mod error;
mod gateway;
mod orchestrator;
mod queue;
mod report;
mod router;
mod server;
mod state_machine;
mod store;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use agents::{AgentRegistry, DatasetAgent, HttpAgent, RetrievalAgent};
use anthropic::AnthropicClient;
use cli::{Cli, Command};
use client::GatewayClient;
use config::{AgentSource, RcaConfig};
use gateway::Gateway;
use orchestrator::{Orchestrator, Sweep, WorkerSettings};
use queue::{JobQueue, MemoryQueue};
use report::{LlmReportGenerator, ReportGenerator, TemplateReportGenerator};
use router::{FallbackRouter, KeywordRouter, LlmRouter, RoutingStrategy};
use state_machine::Filters;
use store::{MemoryStore, Namespace, ResultStore, SqliteStore};
use ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = RcaConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind, workers } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            config.validate()?;
            serve(config).await
        }
        Command::Ask {
            query,
            machine_id,
            sensor_type,
            top_k,
            wait,
        } => {
            let filters = Filters {
                machine_id,
                sensor_type,
                top_k,
                ..Default::default()
            };
            ask(&config, &query, filters, wait).await
        }
        Command::Result { job_id } => {
            let job = GatewayClient::new(&config.gateway_url)?.result(&job_id).await?;
            ui::print_job(&job);
            Ok(())
        }
        Command::Status => {
            let health = GatewayClient::new(&config.gateway_url)?.health().await?;
            ui::print_health(&health);
            Ok(())
        }
        Command::Agents => {
            ui::print_agents();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default = if verbose {
        "rca_copilot=debug,tower_http=debug"
    } else {
        "rca_copilot=info"
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

async fn serve(config: RcaConfig) -> Result<()> {
    info!("rca-copilot v{}", env!("CARGO_PKG_VERSION"));

    let namespace = Namespace::new(config.namespace.clone());
    let store: Arc<dyn ResultStore> = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "using sqlite result store");
            Arc::new(SqliteStore::open(path, namespace)?)
        }
        None => {
            warn!("no database_path configured, results will not survive a restart");
            Arc::new(MemoryStore::new(namespace))
        }
    };
    let memory_queue = Arc::new(MemoryQueue::new());
    let queue: Arc<dyn JobQueue> = memory_queue.clone();

    let registry = build_registry(&config)?;
    let registered = registry.registered();
    if registered.len() < agents::Capability::ALL.len() {
        warn!(?registered, "some capabilities have no collaborator and will always fail");
    }

    let orchestrator = Orchestrator::new(
        queue.clone(),
        store.clone(),
        build_router(&config)?,
        registry,
        build_reporter(&config)?,
        WorkerSettings::from(&config),
    );

    let recovered = orchestrator.recover(Sweep::Startup).await?;
    if recovered.requeued + recovered.abandoned > 0 {
        info!(
            requeued = recovered.requeued,
            abandoned = recovered.abandoned,
            "recovered unfinished jobs"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    for worker in 0..config.workers {
        let orchestrator = orchestrator.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { orchestrator.run(worker, rx).await }));
    }
    {
        let orchestrator = orchestrator.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { orchestrator.run_sweeper(rx).await }));
    }

    let state = server::AppState {
        gateway: Gateway::new(queue, store),
        registered: Arc::new(registered),
    };
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(bind = %config.bind, workers = config.workers, "gateway listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
        })
        .await?;

    // In-flight jobs finish before their worker observes the signal.
    let _ = shutdown_tx.send(true);
    memory_queue.close();
    futures::future::join_all(tasks).await;
    Ok(())
}

fn build_registry(config: &RcaConfig) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for (capability, source) in config.agent_sources()? {
        let agent: Arc<dyn RetrievalAgent> = match source {
            AgentSource::Endpoint(url) => {
                info!(%capability, %url, "http collaborator");
                Arc::new(HttpAgent::new(capability, url)?)
            }
            AgentSource::Dataset(path) => {
                let agent = DatasetAgent::load(capability, &path)
                    .with_context(|| format!("loading dataset {}", path.display()))?;
                info!(%capability, records = agent.len(), "dataset collaborator");
                Arc::new(agent)
            }
        };
        registry.register(agent);
    }
    Ok(registry)
}

fn build_router(config: &RcaConfig) -> Result<Arc<dyn RoutingStrategy>> {
    if !config.has_api_key() {
        info!("no API key, routing by keywords");
        return Ok(Arc::new(KeywordRouter));
    }
    let client = AnthropicClient::new(config.api_key.clone())?;
    Ok(Arc::new(FallbackRouter::new(
        Box::new(LlmRouter::new(client, config.router_model.clone())),
        Box::new(KeywordRouter),
    )))
}

fn build_reporter(config: &RcaConfig) -> Result<Arc<dyn ReportGenerator>> {
    if !config.has_api_key() {
        info!("no API key, reports use the evidence template");
        return Ok(Arc::new(TemplateReportGenerator));
    }
    let client = AnthropicClient::new(config.api_key.clone())?;
    Ok(Arc::new(
        LlmReportGenerator::new(client, config.report_model.clone())
            .with_max_tokens(config.report_max_tokens),
    ))
}

async fn ask(config: &RcaConfig, query: &str, filters: Filters, wait: bool) -> Result<()> {
    let client = GatewayClient::new(&config.gateway_url)?;
    let accepted = client.ask(query, &filters).await?;
    if !wait {
        println!("{}  {}", accepted.job_id, accepted.status);
        return Ok(());
    }

    let progress = JobProgress::start(&accepted.job_id);
    let job = client
        .wait(&accepted.job_id, Duration::from_millis(500), |job| {
            progress.update(job)
        })
        .await?;
    progress.finish(&job);
    Ok(())
}
