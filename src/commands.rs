
use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chat::{ChatSession, spawn_line_reader};
use crate::config::Config;
use crate::database::SearchHit;
use crate::embeddings::{EmbeddingProvider, OllamaClient};
use crate::knowledge::KnowledgeBase;
use crate::loader::UploadStaging;
use crate::session::{Message, Role, SessionStore};

/// Lines typed ahead while a reply is streaming
const INPUT_QUEUE_CAPACITY: usize = 16;

/// Open the knowledge base with the configured Ollama embedder
async fn open_knowledge(config: &Config, client: &OllamaClient) -> Result<KnowledgeBase> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(client.clone());
    KnowledgeBase::from_config(config, embedder)
        .await
        .context("Failed to open knowledge base")
}

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned())
}

/// Ingest documents into the knowledge base through a temporary upload area
#[inline]
pub async fn ingest_documents(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let mut knowledge = open_knowledge(config, &client).await?;

    let mut staging = UploadStaging::new(&config.upload_dir_path())
        .context("Failed to create upload staging area")?;
    debug!(
        "Staging {} uploads in {}",
        paths.len(),
        staging.path().display()
    );
    let mut staged_from = Vec::with_capacity(paths.len());

    for path in paths {
        match staging.stage(path) {
            Ok(staged) => staged_from.push((staged, path.clone())),
            Err(e) => {
                warn!("Could not stage {}: {}", path.display(), e);
                println!("{} {}", style("⚠ Skipped:").yellow(), e);
            }
        }
    }

    if staging.files().is_empty() {
        println!("No documents to ingest.");
        return Ok(());
    }

    let bar = spinner(&format!("Ingesting {} documents", staging.files().len()));
    let result = knowledge.add_documents(staging.files()).await;
    bar.finish_and_clear();

    if let Err(e) = staging.close() {
        warn!("Upload staging cleanup failed: {}", e);
    }
    let report = result.context("Ingestion failed")?;

    for failure in &report.failures {
        let original = staged_from
            .iter()
            .find(|(staged, _)| staged == &failure.path)
            .map_or(failure.path.as_path(), |(_, original)| original.as_path());
        println!(
            "{} {}: {}",
            style("⚠ Skipped").yellow(),
            original.display(),
            failure.error
        );
    }

    println!(
        "{} Added {} chunks from {} documents",
        style("✓").green(),
        report.chunks_added,
        report.files_ingested
    );
    Ok(())
}

/// Print the chunks most relevant to a question
#[inline]
pub async fn query_knowledge(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let knowledge = open_knowledge(config, &client).await?;

    if !knowledge.has_knowledge().await {
        println!("The knowledge base is empty. Use 'rag-chat ingest <files>' first.");
        return Ok(());
    }

    let k = top_k.unwrap_or_else(|| knowledge.top_k());
    let hits = knowledge.query_with_sources(question, k).await?;

    if hits.is_empty() {
        println!("No matching chunks found.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!("{}", format_hit(rank + 1, hit));
        println!("{}", hit.chunk_metadata.text.trim());
        println!();
    }
    Ok(())
}

fn format_hit(rank: usize, hit: &SearchHit) -> String {
    let metadata = &hit.chunk_metadata;
    let source = match metadata.page {
        Some(page) => format!("{} (page {})", display_name(&metadata.source_path), page + 1),
        None => display_name(&metadata.source_path),
    };
    format!(
        "#{} {} score {:.3}",
        rank,
        style(source).cyan(),
        hit.similarity_score
    )
}

/// Remove the knowledge base after confirmation
#[inline]
pub async fn clear_knowledge(config: &Config, skip_confirm: bool) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let mut knowledge = open_knowledge(config, &client).await?;

    if !skip_confirm
        && !Confirm::new()
            .with_prompt("Delete every document from the knowledge base? This cannot be undone.")
            .default(false)
            .interact()?
    {
        println!("Knowledge base left unchanged.");
        return Ok(());
    }

    if knowledge.clear_database().await {
        println!("{} Knowledge base cleared", style("✓").green());
    } else {
        println!(
            "{} Could not remove {}; some files may be in use",
            style("✗").red(),
            knowledge.persist_dir().display()
        );
    }
    Ok(())
}

/// Show Ollama, knowledge base and session status
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    let client = OllamaClient::new(&config.ollama)?;
    match client.health_check() {
        Ok(()) => {
            println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            );
        }
        Err(e) => println!("   ⚠️  Ollama: Unavailable - {:#}", e),
    }
    println!("   📋 Embedding Model: {}", config.ollama.embedding_model);
    println!("   💬 Chat Model: {}", config.ollama.chat_model);

    println!();
    println!("🔍 Knowledge Base:");
    match open_knowledge(config, &client).await {
        Ok(knowledge) => {
            let chunks = knowledge.chunk_count().await.unwrap_or(0);
            if chunks == 0 {
                println!("   📭 Empty");
            } else {
                println!("   📄 Chunks Indexed: {}", chunks);
            }
            if let Some(manifest) = knowledge.manifest() {
                println!(
                    "   🔢 Built With: {} ({} dimensions)",
                    manifest.embedding_model, manifest.dimension
                );
                if manifest.embedding_model != config.ollama.embedding_model {
                    println!(
                        "   ⚠️  Configured embedding model differs; run 'rag-chat clear' and re-ingest"
                    );
                }
            }
            println!("   📁 Location: {}", knowledge.persist_dir().display());
        }
        Err(e) => println!("   ❌ Failed to open - {:#}", e),
    }

    println!();
    println!("🗂️  Chat Sessions:");
    match SessionStore::new(config.history_dir_path()).and_then(|store| store.list_sessions()) {
        Ok(sessions) => {
            println!("   💾 Stored Sessions: {}", sessions.len());
            if let Some(latest) = sessions.first() {
                println!(
                    "   🕒 Latest: {} ({})",
                    latest.id,
                    latest.last_modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Err(e) => println!("   ❌ Failed to read history - {}", e),
    }

    Ok(())
}

/// List stored chat sessions, newest first
#[inline]
pub fn list_sessions(config: &Config) -> Result<()> {
    let store = SessionStore::new(config.history_dir_path())?;
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No chat sessions yet. Use 'rag-chat chat' to start one.");
        return Ok(());
    }

    println!("Chat Sessions ({} total):", sessions.len());
    for session in &sessions {
        println!(
            "  {}  {}",
            style(&session.id).cyan(),
            session.last_modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Print a stored transcript
#[inline]
pub fn show_session(config: &Config, session_id: &str) -> Result<()> {
    let store = SessionStore::new(config.history_dir_path())?;
    let messages = store.load_session(session_id)?;

    if messages.is_empty() {
        println!("Session {} has no messages.", session_id);
        return Ok(());
    }

    print_transcript(&messages);
    Ok(())
}

/// Delete a stored transcript
#[inline]
pub fn delete_session(config: &Config, session_id: &str) -> Result<()> {
    let store = SessionStore::new(config.history_dir_path())?;
    store.delete_session(session_id)?;
    println!("{} Deleted session {}", style("✓").green(), session_id);
    Ok(())
}

fn print_transcript(messages: &[Message]) {
    for message in messages {
        let speaker = match message.role {
            Role::User => style("You").bold().green(),
            Role::Assistant => style("Assistant").bold().cyan(),
        };
        println!("{}: {}", speaker, message.content);
        println!();
    }
}

/// A line typed at the chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Message(String),
    NewChat,
    Load(String),
    Sessions,
    /// `None` toggles
    Rag(Option<bool>),
    /// `None` lists the installed models
    Model(Option<String>),
    Help,
    Quit,
    Unknown(String),
}

impl ReplCommand {
    #[inline]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let argument = parts.next();
        if parts.next().is_some() {
            return Self::Unknown(line.to_string());
        }

        match (name, argument) {
            ("new", None) => Self::NewChat,
            ("load", Some(id)) => Self::Load(id.to_string()),
            ("sessions", None) => Self::Sessions,
            ("rag", None) => Self::Rag(None),
            ("rag", Some("on")) => Self::Rag(Some(true)),
            ("rag", Some("off")) => Self::Rag(Some(false)),
            ("model", None) => Self::Model(None),
            ("model", Some(model)) => Self::Model(Some(model.to_string())),
            ("help", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn print_repl_help() {
    println!("Commands:");
    println!("  /new            start a new chat");
    println!("  /load <id>      continue a stored chat");
    println!("  /sessions       list stored chats");
    println!("  /rag [on|off]   use the knowledge base for answers");
    println!("  /model [name]   list installed models or switch to one");
    println!("  /quit           leave");
}

fn list_chat_models(client: &OllamaClient, current: &str) {
    match client.list_models() {
        Ok(models) if models.is_empty() => println!("No models are installed in Ollama."),
        Ok(models) => {
            println!("Installed models:");
            for model in &models {
                if model.matches(current) {
                    println!("  {} {}", style(&model.name).cyan(), style("(current)").dim());
                } else {
                    println!("  {}", model.name);
                }
            }
        }
        Err(e) => println!("{} {:#}", style("Error:").red().bold(), e),
    }
}

fn switch_chat_model(client: &OllamaClient, chat: &mut ChatSession<'_>, model: &str) {
    match client.list_models() {
        Ok(models) if !models.iter().any(|m| m.matches(model)) => {
            println!(
                "{} Model '{}' is not installed; use /model to list installed models",
                style("Error:").red().bold(),
                model
            );
            return;
        }
        Ok(_) => {}
        Err(e) => warn!("Could not verify model {}: {:#}", model, e),
    }

    chat.set_model(model);
    println!("Chat model set to {}", style(model).cyan());
}

fn print_prompt() {
    print!("{} ", style(">").bold().green());
    if let Err(e) = std::io::stdout().flush() {
        warn!("Failed to flush stdout: {}", e);
    }
}

/// Interactive chat loop.
///
/// Input is read on a background thread; this loop is the only place the
/// conversation is changed.
#[inline]
pub async fn run_chat(
    config: &Config,
    resume: Option<&str>,
    model: Option<&str>,
    no_rag: bool,
) -> Result<()> {
    let client = OllamaClient::new(&config.ollama)?;
    let knowledge = open_knowledge(config, &client).await?;
    let store = SessionStore::new(config.history_dir_path())?;

    let chat_model = model.unwrap_or_else(|| client.chat_model());
    let mut chat = ChatSession::new(&store, &client, chat_model)
        .with_knowledge(&knowledge, config.retrieval.top_k);
    if let Some(session_id) = resume {
        chat.resume(session_id)?;
        print_transcript(chat.messages());
    }

    let mut use_rag = config.retrieval.enabled && !no_rag;
    if use_rag && !knowledge.has_knowledge().await {
        println!(
            "{}",
            style("Knowledge base is empty; answers will not use documents.").yellow()
        );
    }

    println!(
        "Session {} with {} (knowledge base {}). Type /help for commands.",
        style(chat.session_id()).cyan(),
        chat.model(),
        if use_rag { "on" } else { "off" }
    );

    let mut lines = spawn_line_reader(BufReader::new(std::io::stdin()), INPUT_QUEUE_CAPACITY);

    loop {
        print_prompt();
        let Some(line) = lines.recv().await else {
            println!();
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Message(prompt) => {
                if prompt.is_empty() {
                    continue;
                }

                let mut printed = 0;
                let result = chat
                    .send(&prompt, use_rag, |text| {
                        print!("{}", text.get(printed..).unwrap_or_default());
                        if let Err(e) = std::io::stdout().flush() {
                            warn!("Failed to flush stdout: {}", e);
                        }
                        printed = text.len();
                    })
                    .await;
                println!();

                if let Err(e) = result {
                    println!("{} {}", style("Error:").red().bold(), e);
                    println!("Your message was saved; send it again to retry.");
                }
            }
            ReplCommand::NewChat => {
                chat.new_chat();
                println!("Started session {}", style(chat.session_id()).cyan());
            }
            ReplCommand::Load(session_id) => match chat.resume(&session_id) {
                Ok(()) => {
                    print_transcript(chat.messages());
                    println!("Loaded session {}", style(chat.session_id()).cyan());
                }
                Err(e) => println!("{} {}", style("Error:").red().bold(), e),
            },
            ReplCommand::Sessions => {
                if let Err(e) = list_sessions(config) {
                    println!("{} {:#}", style("Error:").red().bold(), e);
                }
            }
            ReplCommand::Rag(setting) => {
                use_rag = setting.unwrap_or(!use_rag);
                println!("Knowledge base {}", if use_rag { "on" } else { "off" });
            }
            ReplCommand::Model(None) => list_chat_models(&client, chat.model()),
            ReplCommand::Model(Some(model)) => switch_chat_model(&client, &mut chat, &model),
            ReplCommand::Help => print_repl_help(),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(input) => {
                println!("Unknown command: {}", input);
                print_repl_help();
            }
        }
    }

    info!("Chat session {} ended", chat.session_id());
    Ok(())
}
