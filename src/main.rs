use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use krishirag::api::serve_api;
use krishirag::config::AppConfig;
use krishirag::knowledge::IngestDocument;
use krishirag::knowledge::KnowledgeIngestor;
use krishirag::models::ChatRequest;
use krishirag::models::RetrievalFilters;
use krishirag::rag::ChatService;
use krishirag::Result;
use tracing::info;

#[derive(Parser)]
#[command(name = "krishirag")]
#[command(about = "KrishiRAG CLI for serving and querying the crop advisory assistant")]
#[command(version)]
struct Cli {
    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Host address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Enable permissive CORS
        #[arg(long)]
        cors: bool,
    },
    /// Embed a JSON document batch and replace the knowledge index
    Ingest {
        /// Path to a JSON array of documents
        file: String,
    },
    /// Ask a single question from the command line
    Ask {
        /// The question text
        question: String,
        /// User identifier for conversation history and rate limiting
        #[arg(short, long, default_value = "cli")]
        user: String,
        /// Preferred answer language (malayalam, english, hindi)
        #[arg(short, long)]
        language: Option<String>,
        /// Restrict retrieval to a crop
        #[arg(long)]
        crop: Option<String>,
        /// Restrict retrieval to a region
        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    if cli.verbose {
        // Debug-level default filter
        krishirag::logging::init_logging(None)?;
    } else {
        krishirag::logging::init_logging(Some(&config))?;
    }
    info!("Configuration loaded successfully");

    match cli.command {
        Commands::Serve { host, port, cors } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let cors = cors || config.server.enable_cors;
            serve_api(&config, host, port, cors).await?;
        }
        Commands::Ingest { file } => {
            let content = std::fs::read_to_string(&file)?;
            let documents: Vec<IngestDocument> = serde_json::from_str(&content)?;

            let service = ChatService::from_config(&config)?;
            let ingestor =
                KnowledgeIngestor::new(service.index().clone(), service.embeddings().clone());
            let count = ingestor.ingest_batch(documents).await?;
            println!("Ingested {count} snippets from {file}");
        }
        Commands::Ask {
            question,
            user,
            language,
            crop,
            region,
        } => {
            let service = Arc::new(ChatService::from_config(&config)?);
            let response = service
                .chat(ChatRequest {
                    user_id: user,
                    question,
                    conversation_id: None,
                    image_base64: None,
                    filters: RetrievalFilters {
                        crop,
                        region,
                        language,
                    },
                    top_k: None,
                })
                .await?;

            println!("{}", response.answer);
            if !response.citations.is_empty() {
                println!();
                for (i, citation) in response.citations.iter().enumerate() {
                    println!(
                        "[{}] {} (score {:.2})",
                        i + 1,
                        citation.source,
                        citation.score
                    );
                }
            }
            if response.degraded {
                println!();
                println!("(degraded answer: knowledge retrieval was unavailable)");
            }
        }
    }

    Ok(())
}
