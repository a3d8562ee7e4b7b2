use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use grounded_qa::core::config::{resolve_api_key, AppConfig, ConfigService};
use grounded_qa::llm::{LlmProvider, OpenAiCompatProvider};
use grounded_qa::logging;
use grounded_qa::rag::{
    load_fragments_json, AnswerSynthesizer, EmbeddingClient, FragmentIndexer, IndexStore,
    RetrievalPolicy,
};

/// Grounded question answering over an indexed document corpus.
#[derive(Parser, Debug)]
#[command(name = "grounded-qa")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $GROUNDED_QA_CONFIG, then ./config.yml)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Directory for the daily rolling log file
    #[arg(long, value_name = "DIR", default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed all fragments and write a fresh snapshot
    Build {
        /// Chunk JSON produced by the document splitter
        path: PathBuf,
    },
    /// Append fragments to the existing snapshot
    Add {
        /// Chunk JSON produced by the document splitter
        path: PathBuf,
    },
    /// Answer a question from the indexed fragments
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

struct Providers {
    embedding: Arc<dyn LlmProvider>,
    llm: Arc<dyn LlmProvider>,
}

fn connect(config: &AppConfig) -> anyhow::Result<Providers> {
    let api_key = resolve_api_key(config)?;
    let embedding = OpenAiCompatProvider::new(
        &config.embedding.api_base_url,
        &api_key,
        Duration::from_secs(config.embedding.request_timeout_secs),
    )
    .context("Failed to create embedding client")?;
    let llm = OpenAiCompatProvider::new(
        &config.llm.api_base_url,
        &api_key,
        Duration::from_secs(config.llm.request_timeout_secs),
    )
    .context("Failed to create generation client")?;
    Ok(Providers {
        embedding: Arc::new(embedding),
        llm: Arc::new(llm),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(Some(&cli.log_dir));

    let config = ConfigService::new(cli.config)
        .load_config()
        .context("Failed to load configuration")?;

    let providers = connect(&config)?;
    let embedder = EmbeddingClient::new(providers.embedding, config.embedding.clone());
    let indexer = FragmentIndexer::new(embedder.clone(), config.index.metric);
    let store = IndexStore::new(&config.index.index_dir);

    match cli.command {
        Command::Build { path } => {
            let fragments = load_fragments_json(&path)
                .with_context(|| format!("Failed to read fragments from {}", path.display()))?;
            indexer.build_index(fragments).await.context("Index build failed")?;
            let provenance = indexer.save(&store).await.context("Failed to save snapshot")?;
            println!("{}", serde_json::to_string_pretty(&provenance)?);
        }
        Command::Add { path } => {
            let fragments = load_fragments_json(&path)
                .with_context(|| format!("Failed to read fragments from {}", path.display()))?;
            indexer.load(&store).await.context("Failed to load snapshot")?;
            let added = indexer
                .add_fragments(fragments)
                .await
                .context("Adding fragments failed")?;
            let provenance = indexer.save(&store).await.context("Failed to save snapshot")?;
            tracing::info!("Added {} fragments", added);
            println!("{}", serde_json::to_string_pretty(&provenance)?);
        }
        Command::Ask { question } => {
            let question = question.join(" ");
            if store.exists() {
                indexer.load(&store).await.context("Failed to load snapshot")?;
            } else {
                tracing::warn!(
                    "No snapshot in {}; answering from an empty index",
                    store.dir().display()
                );
            }
            let synthesizer = AnswerSynthesizer::new(
                RetrievalPolicy::new(embedder, indexer.shared()),
                providers.llm,
                config.llm.clone(),
                config.retrieval.clone(),
            );
            let result = synthesizer.ask(&question).await.context("Query failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
