use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use teloxide::Bot;

mod bot;
mod config;
mod llm;
mod messages;
mod migrate;
mod ocr;
mod orchestrator;
mod pipeline;
mod store;
#[cfg(test)]
mod tests;

use config::Config;
use llm::DeepSeekClient;
use messages::MessageStore;
use ocr::OcrAvailability;
use orchestrator::{CooldownTracker, RetrievalOrchestrator};
use pipeline::OcrPipeline;
use store::{FastembedEmbedder, VectorStore};

#[derive(Parser)]
#[command(name = "chatrecall", about = "Telegram chat memory with semantic search")]
struct Args {
    /// Data directory holding config.yaml, messages.csv and vectors.bin
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the bot (default)
    Run,

    /// Import a legacy CSV export into the store
    Migrate {
        /// Path to the legacy export (chat_id,message_id,chat_username,sender,date,text)
        #[arg(long)]
        legacy: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_with(&args.data_dir);

    let embedder = Arc::new(FastembedEmbedder::new(
        &config.semantic.model,
        args.data_dir.clone(),
        Some(Duration::from_secs(config.semantic.download_timeout_secs)),
    )?);
    let store = Arc::new(VectorStore::open(
        &args.data_dir,
        embedder,
        config.semantic.default_threshold,
    )?);

    match args.command.unwrap_or(Command::Run) {
        Command::Migrate { legacy } => migrate::migrate(&store, &legacy),
        Command::Run => run(config, store).await,
    }
}

async fn run(config: Config, store: Arc<VectorStore>) -> anyhow::Result<()> {
    if config.bot_token.is_empty() {
        bail!("bot_token is not configured; set it in config.yaml or the BOT_TOKEN variable");
    }

    let ocr_status = ocr::init(&config.ocr);
    let pipeline = match &ocr_status {
        OcrAvailability::Ready(engine) => {
            let store: Arc<dyn MessageStore> = store.clone();
            Some(Arc::new(OcrPipeline::start(
                store,
                engine.clone(),
                &config.pipeline,
            )))
        }
        OcrAvailability::Unavailable(reason) => {
            log::warn!("{reason}");
            None
        }
    };

    let llm = Arc::new(DeepSeekClient::new(&config.llm));
    let orchestrator = RetrievalOrchestrator::new(
        store.clone(),
        llm.clone(),
        config.retrieval.search_limit,
        config.retrieval.summary_fetch,
        config.recency_window(),
    );
    let cooldowns = CooldownTracker::new(
        Duration::from_secs(config.retrieval.ask_cooldown_secs),
        Duration::from_secs(config.retrieval.summary_cooldown_secs),
    );

    let ctx = Arc::new(bot::BotContext {
        store: store.clone(),
        pipeline: pipeline.clone(),
        ocr_status,
        orchestrator,
        rewriter: llm,
        cooldowns,
    });

    bot::run(Bot::new(&config.bot_token), ctx).await;

    // The dispatcher returned (interrupt received); flush state before exit.
    if let Some(pipeline) = pipeline {
        pipeline.shutdown().await;
    }
    if let Err(err) = store.persist_vectors() {
        log::error!("failed to persist embedding cache: {err}");
    }
    log::info!("shutdown complete");
    Ok(())
}
