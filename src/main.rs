//! medgate CLI: clinical agent orchestration and verification engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tokio_stream::StreamExt;

use medgate::config::EngineConfig;
use medgate::graph::{GraphSnapshot, Properties, TemporalGraph};
use medgate::paths;
use medgate::provider::{OllamaGenerator, PubMedRetriever, Retriever};
use medgate::store::DurableStore;
use medgate::tool::{register_builtin_tools, Capabilities, ToolRegistry};
use medgate::workflow::{WorkflowEngine, WorkflowEvent};

#[derive(Parser)]
#[command(name = "medgate", version, about = "Clinical agent orchestration and verification engine")]
struct Cli {
    /// Data directory for persistent storage.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to $XDG_CONFIG_HOME/medgate/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administer the temporal knowledge graph.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// List the registered tools with their parameter schemas.
    Tools,

    /// Run a workflow and stream its events as JSON lines.
    Run {
        /// The clinical question.
        #[arg(long)]
        query: String,

        /// general, diagnosis, treatment, medication, research or auto.
        #[arg(long)]
        workflow_type: Option<String>,
    },

    /// Inspect archived workflow sessions.
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum GraphAction {
    /// Add or replace an entity.
    AddEntity {
        #[arg(long)]
        id: String,
        #[arg(long)]
        label: String,
        /// Properties as a JSON object.
        #[arg(long)]
        props: Option<String>,
    },
    /// Add a relation between two existing entities.
    AddRelation {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        relation_type: String,
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,
        /// End date (YYYY-MM-DD). Omit for a relation that is still active.
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Relations touching an entity that are active on a date.
    Query {
        #[arg(long)]
        entity: String,
        /// Date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show node and edge counts.
    Stats,
    /// Write the graph as a JSON snapshot.
    Export {
        #[arg(long)]
        file: PathBuf,
    },
    /// Replace the graph with a JSON snapshot.
    Import {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List sessions, newest first.
    List,
    /// Show a session with its full step trace.
    Show {
        /// Session id.
        id: uuid::Uuid,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    // stdout carries the event stream.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let data_dir = paths::data_dir(cli.data_dir.as_deref(), config.data_dir.as_deref())?;
    let store = DurableStore::open(&data_dir)?;

    let graph = Arc::new(TemporalGraph::new());
    if let Some(stats) = store.restore_graph(&graph)? {
        tracing::debug!(%stats, "graph restored");
    }

    match cli.command {
        Commands::Graph { action } => graph_command(action, &graph, &store)?,

        Commands::Tools => {
            let tools = build_tools(&config, &graph)?;
            println!("{}", serde_json::to_string_pretty(&tools.list()).into_diagnostic()?);
        }

        Commands::Run {
            query,
            workflow_type,
        } => {
            if !OllamaGenerator::new(config.ollama.clone()).probe() {
                tracing::warn!(url = %config.ollama.base_url, "Ollama is not reachable; generation calls will fail");
            }
            let engine = build_engine(config, graph, store)?;
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            runtime.block_on(stream_run(&engine, &query, workflow_type.as_deref()))?;
        }

        Commands::Workflows { action } => {
            let engine = build_engine(config, graph, store)?;
            match action {
                WorkflowAction::List => {
                    for w in engine.list_workflows() {
                        let kind = w.workflow_type.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
                        println!(
                            "{}  {:<10}  {:<9}  {}  {}",
                            w.id,
                            kind,
                            format!("{:?}", w.status).to_lowercase(),
                            w.created_at.format("%Y-%m-%d %H:%M"),
                            w.input_summary
                        );
                    }
                }
                WorkflowAction::Show { id } => {
                    let session = engine.workflow_detail(id)?;
                    println!("{}", serde_json::to_string_pretty(&session).into_diagnostic()?);
                }
            }
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    match paths::config_file(explicit)? {
        Some(path) => Ok(EngineConfig::load(&path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn build_tools(config: &EngineConfig, graph: &Arc<TemporalGraph>) -> Result<ToolRegistry> {
    let literature: Option<Arc<dyn Retriever>> = config
        .pubmed
        .enabled
        .then(|| Arc::new(PubMedRetriever::new(config.pubmed.clone())) as Arc<dyn Retriever>);
    let capabilities = Capabilities {
        literature,
        ..Capabilities::default()
    };
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, Arc::clone(graph), capabilities)?;
    Ok(tools)
}

fn build_engine(
    config: EngineConfig,
    graph: Arc<TemporalGraph>,
    store: DurableStore,
) -> Result<WorkflowEngine> {
    let tools = build_tools(&config, &graph)?;
    let generator = Arc::new(OllamaGenerator::new(config.ollama.clone()));
    Ok(WorkflowEngine::new(config, generator, tools, graph).with_archive(Arc::new(store)))
}

fn graph_command(action: GraphAction, graph: &TemporalGraph, store: &DurableStore) -> Result<()> {
    match action {
        GraphAction::AddEntity { id, label, props } => {
            let properties: Properties = match props {
                Some(raw) => serde_json::from_str(&raw).into_diagnostic()?,
                None => Properties::new(),
            };
            let created = graph.add_entity(id.clone(), label, properties);
            store.save_graph(graph)?;
            println!("{} entity {id}", if created { "Added" } else { "Updated" });
        }
        GraphAction::AddRelation {
            source,
            target,
            relation_type,
            start,
            end,
        } => {
            graph.add_relation(&source, &target, &relation_type, start, end)?;
            store.save_graph(graph)?;
            println!("Added {source} -[{relation_type}]-> {target}");
        }
        GraphAction::Query { entity, date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let active = graph.describe_active_at(&entity, date);
            println!("{}", serde_json::to_string_pretty(&active).into_diagnostic()?);
        }
        GraphAction::Stats => println!("{}", graph.stats()),
        GraphAction::Export { file } => {
            graph.export_snapshot().write_file(&file)?;
            println!("Exported {} to {}", graph.stats(), file.display());
        }
        GraphAction::Import { file } => {
            let snapshot = GraphSnapshot::read_file(&file)?;
            let stats = graph.load_snapshot(snapshot)?;
            store.save_graph(graph)?;
            println!("Imported {stats}");
        }
    }
    Ok(())
}

async fn stream_run(engine: &WorkflowEngine, query: &str, workflow_type: Option<&str>) -> Result<()> {
    let mut run = engine.run_workflow(query, workflow_type)?;
    let cancel = run.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling workflow");
            cancel.cancel();
        }
    });

    let mut failed = None;
    while let Some(event) = run.next().await {
        println!("{}", serde_json::to_string(&event).into_diagnostic()?);
        if let WorkflowEvent::Error { message, .. } = &event {
            failed = Some(message.clone());
        }
    }
    match failed {
        Some(message) => Err(miette::miette!("workflow {} failed: {message}", run.session_id())),
        None => Ok(()),
    }
}
