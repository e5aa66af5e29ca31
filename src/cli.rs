use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;

use crate::chat::{preview, run_demo, run_repl};
use crate::core::config::{AppPaths, ConfigService, StoreBackend};
use crate::core::errors::ApiError;
use crate::ingest::samples::write_sample_data;
use crate::server::router::router;
use crate::state::{AppState, SettingsOverrides};

#[derive(Debug, Parser)]
#[command(
    name = "holiday-chatbot",
    version,
    about = "Answer questions about holiday and leave policy documents"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Vector store backend (sqlite, pinecone, memory)
    #[arg(long, global = true, env = "HOLIDAY_BOT_STORE")]
    pub store: Option<StoreBackend>,

    /// Number of chunks retrieved per question
    #[arg(long, global = true)]
    pub top_k: Option<usize>,

    /// Chat model name
    #[arg(long, global = true, env = "HOLIDAY_BOT_MODEL")]
    pub model: Option<String>,

    /// Directory for config, logs and the local vector store
    #[arg(long, global = true, env = "HOLIDAY_BOT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load, split, embed and store every document in a folder
    Ingest {
        /// Folder to ingest (defaults to ingest.data_dir)
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Write the sample documents into the folder first
        #[arg(long)]
        init_sample: bool,

        /// Remove everything from the store before ingesting
        #[arg(long)]
        reset: bool,
    },
    /// Interactive question loop
    Chat {
        /// Hide the sources under each answer
        #[arg(long)]
        no_sources: bool,
    },
    /// Ask a single question
    Ask {
        question: String,

        /// Print the full turn as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the canned demo questions
    Demo,
    /// Show vector store statistics
    Stats {
        /// Also show this many stored chunks with their vector heads
        #[arg(long, default_value_t = 0)]
        samples: usize,
    },
    /// Write the sample documents
    InitData {
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
}

impl Cli {
    pub fn paths(&self) -> AppPaths {
        match &self.global.data_dir {
            Some(dir) => AppPaths::from_data_dir(dir),
            None => AppPaths::new(),
        }
    }

    fn overrides(&self) -> SettingsOverrides {
        let mut overrides = SettingsOverrides {
            store: self.global.store,
            top_k: self.global.top_k,
            model: self.global.model.clone(),
            ..SettingsOverrides::default()
        };
        if let Command::Serve { host, port } = &self.command {
            overrides.host = host.clone();
            overrides.port = *port;
        }
        overrides
    }
}

pub async fn run(cli: Cli, paths: AppPaths) -> anyhow::Result<()> {
    if let Command::InitData { folder } = &cli.command {
        let folder = match folder {
            Some(folder) => folder.clone(),
            None => configured_data_folder(paths)?,
        };
        return init_data(&folder);
    }

    let overrides = cli.overrides();
    let state = AppState::initialize(paths, &overrides)
        .await
        .context("Failed to initialize application")?;

    match cli.command {
        Command::Ingest {
            folder,
            init_sample,
            reset,
        } => ingest(&state, folder, init_sample, reset).await,
        Command::Chat { no_sources } => {
            let show_sources = state.settings.chat.show_sources && !no_sources;
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            run_repl(&state.bot, stdin.lock(), &mut stdout, show_sources)
                .await
                .context("Chat session failed")
        }
        Command::Ask { question, json } => ask(&state, &question, json).await,
        Command::Demo => {
            let answered = run_demo(&state.bot, &mut io::stdout())
                .await
                .context("Demo failed")?;
            tracing::info!("Demo answered {} questions", answered);
            Ok(())
        }
        Command::Stats { samples } => stats(&state, samples).await,
        Command::Serve { .. } => serve(state).await,
        Command::InitData { .. } => Ok(()),
    }
}

/// The folder `ingest` reads by default, so `init-data` writes where it looks.
fn configured_data_folder(paths: AppPaths) -> anyhow::Result<PathBuf> {
    let settings = ConfigService::new(Arc::new(paths))
        .load_settings()
        .context("Failed to load configuration")?;
    Ok(settings.ingest.data_dir)
}

fn init_data(folder: &std::path::Path) -> anyhow::Result<()> {
    let written = write_sample_data(folder)
        .with_context(|| format!("Failed to write sample data to {}", folder.display()))?;
    if written.is_empty() {
        println!("Sample data already present in {}", folder.display());
    }
    for path in written {
        println!("Created {}", path.display());
    }
    Ok(())
}

async fn ingest(
    state: &AppState,
    folder: Option<PathBuf>,
    init_sample: bool,
    reset: bool,
) -> anyhow::Result<()> {
    let folder = folder.unwrap_or_else(|| state.settings.ingest.data_dir.clone());

    if init_sample {
        init_data(&folder)?;
    }
    if reset {
        state
            .pipeline
            .store()
            .reset()
            .await
            .context("Failed to reset vector store")?;
        println!("Vector store cleared.");
    }

    let report = match state.pipeline.run(&folder).await {
        Ok(report) => report,
        Err(ApiError::BadRequest(msg)) if msg.starts_with("No documents found") => {
            eprintln!(
                "{}. Run `holiday-chatbot init-data --folder {}` to create sample documents.",
                msg,
                folder.display()
            );
            anyhow::bail!("Ingest of {} failed: {}", folder.display(), msg);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Ingest of {} failed", folder.display()))
        }
    };

    println!("Documents loaded:   {}", report.documents);
    println!("Chunks embedded:    {}", report.embedded);
    println!("Unchanged sources:  {}", report.skipped_unchanged);
    println!("Removed sources:    {}", report.removed_sources);
    println!("Vectors in store:   {}", report.total_vectors);
    for skipped in &report.skipped {
        println!("Skipped: {}", skipped);
    }
    for failure in &report.failures {
        eprintln!("Failed: {} ({})", failure.path, failure.error);
    }
    Ok(())
}

async fn ask(state: &AppState, question: &str, json: bool) -> anyhow::Result<()> {
    let turn = state.bot.ask(question).await.context("Question failed")?;

    let mut out = io::stdout();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&turn)?)?;
        return Ok(());
    }

    writeln!(out, "{}", turn.answer)?;
    if state.settings.chat.show_sources && !turn.sources.is_empty() {
        writeln!(out, "\nSources:")?;
        for (i, source) in turn.sources.iter().enumerate() {
            let page = source
                .page
                .map(|p| format!(", page {}", p))
                .unwrap_or_default();
            writeln!(
                out,
                "  {}. {}{} (score {:.3})",
                i + 1,
                source.source,
                page,
                source.score
            )?;
        }
    }
    Ok(())
}

async fn stats(state: &AppState, samples: usize) -> anyhow::Result<()> {
    let store = state.bot.store();
    let stats = store.stats().await.context("Failed to read store stats")?;

    println!("Backend:        {}", stats.backend);
    println!("Total vectors:  {}", stats.total_vectors);
    match stats.dimension {
        Some(dimension) => println!("Dimension:      {}", dimension),
        None => println!("Dimension:      unknown"),
    }
    for (namespace, count) in &stats.namespaces {
        println!("  {}: {} vectors", namespace, count);
    }

    let config = state.config.load_config()?;
    let redacted = state.config.redact_sensitive_values(&config);
    println!("\nConfiguration:\n{}", serde_yaml::to_string(&redacted)?);

    if samples > 0 {
        let sample = store.sample(samples).await.context("Failed to sample vectors")?;
        if sample.is_empty() {
            println!("No vectors available to show.");
        }
        for (chunk, values) in sample {
            let head: Vec<String> = values.iter().take(5).map(|v| format!("{:.4}", v)).collect();
            println!("{} ({} dims) [{}, ...]", chunk.id, values.len(), head.join(", "));
            println!("  {}", preview(&chunk.text, 100));
        }
    }
    Ok(())
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", state.settings.server.host, state.settings.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    if !state.api_token.is_enabled() {
        tracing::warn!("No API token configured; the HTTP API is open");
    }
    tracing::info!("Listening on {}", addr);
    println!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}
