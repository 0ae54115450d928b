use clap::{Parser, Subcommand};
use rag_chat::Result;
use rag_chat::commands::{
    clear_knowledge, delete_session, ingest_documents, list_sessions, query_knowledge, run_chat,
    show_session, show_status,
};
use rag_chat::config::{Config, get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Chat with local Ollama models over your own documents")]
#[command(version)]
struct Cli {
    /// Directory for configuration, the knowledge base and chat history
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add PDF or text documents to the knowledge base
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show the knowledge base chunks most relevant to a question
    Query {
        question: String,
        /// Number of chunks to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Show status of Ollama, the knowledge base and chat history
    Status,
    /// Delete the knowledge base
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage stored chat sessions
    Sessions {
        #[command(subcommand)]
        action: Option<SessionAction>,
    },
    /// Start an interactive chat
    Chat {
        /// Continue a stored session
        #[arg(long)]
        resume: Option<String>,
        /// Chat model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,
        /// Answer without the knowledge base
        #[arg(long)]
        no_rag: bool,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List stored sessions, newest first
    List,
    /// Print a session transcript
    Show { id: String },
    /// Delete a session
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.data_dir {
        Some(dir) => dir,
        None => get_config_dir().map_err(|e| rag_chat::RagError::Config(e.to_string()))?,
    };

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&base_dir)?;
        } else {
            run_interactive_config(&base_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Ingest { paths } => {
            ingest_documents(&config, &paths).await?;
        }
        Commands::Query { question, top_k } => {
            query_knowledge(&config, &question, top_k).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Clear { yes } => {
            clear_knowledge(&config, yes).await?;
        }
        Commands::Sessions { action } => match action.unwrap_or(SessionAction::List) {
            SessionAction::List => list_sessions(&config)?,
            SessionAction::Show { id } => show_session(&config, &id)?,
            SessionAction::Delete { id } => delete_session(&config, &id)?,
        },
        Commands::Chat {
            resume,
            model,
            no_rag,
        } => {
            run_chat(&config, resume.as_deref(), model.as_deref(), no_rag).await?;
        }
    }

    Ok(())
}
