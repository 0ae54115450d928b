// Chat orchestration
// Context-augmented prompts, streamed reply folding and per-turn persistence


use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::knowledge::KnowledgeBase;
use crate::session::{Message, SessionStore};
use crate::{RagError, Result};

/// Ordered, finite fragments of one streamed reply
pub type FragmentStream = Box<dyn Iterator<Item = Result<String>>>;

/// A chat model that replies to a message list as a stream of text fragments
pub trait ChatCompletion: Send + Sync {
    fn stream_chat(&self, model: &str, messages: &[Message]) -> Result<FragmentStream>;
}

/// Text placed in front of the user's question when context was retrieved
#[inline]
pub fn build_context_prefix(chunks: &[String]) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    format!(
        "Context from Knowledge Base:\n{}\n\nUser Question: ",
        chunks.join("\n")
    )
}

/// The outgoing message list: history as-is, with `prefix` in front of the
/// last message. The history itself is left untouched.
#[inline]
pub fn augment_messages(history: &[Message], prefix: &str) -> Vec<Message> {
    let mut outgoing = history.to_vec();
    if !prefix.is_empty() {
        if let Some(last) = outgoing.last_mut() {
            last.content = format!("{}{}", prefix, last.content);
        }
    }
    outgoing
}

/// Concatenate fragments in arrival order, reporting the running text after
/// each one. The first error ends the fold.
#[inline]
pub fn fold_fragments<I, F>(fragments: I, mut on_progress: F) -> Result<String>
where
    I: IntoIterator<Item = Result<String>>,
    F: FnMut(&str),
{
    fragments.into_iter().try_fold(String::new(), |mut reply, fragment| {
        reply.push_str(&fragment?);
        on_progress(&reply);
        Ok(reply)
    })
}

/// Read lines on a background thread and hand them over a bounded channel.
///
/// The receiver sees lines in input order; it is closed at end of input or
/// on a read error.
#[inline]
pub fn spawn_line_reader<R>(reader: R, capacity: usize) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    std::thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Input reader stopped: {}", e);
                    break;
                }
            }
        }
        debug!("Input reader finished");
    });

    rx
}

/// One conversation: the only writer of its message list
pub struct ChatSession<'a> {
    store: &'a SessionStore,
    completion: &'a dyn ChatCompletion,
    knowledge: Option<&'a KnowledgeBase>,
    model: String,
    top_k: usize,
    session_id: String,
    messages: Vec<Message>,
}

impl<'a> ChatSession<'a> {
    /// Start a new, empty conversation
    #[inline]
    pub fn new(
        store: &'a SessionStore,
        completion: &'a dyn ChatCompletion,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            completion,
            knowledge: None,
            model: model.into(),
            top_k: 3,
            session_id: store.generate_session_id(),
            messages: Vec::new(),
        }
    }

    /// Retrieve `top_k` chunks from `knowledge` for turns that ask for context
    #[inline]
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: &'a KnowledgeBase, top_k: usize) -> Self {
        self.knowledge = Some(knowledge);
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Use another chat model from the next turn on; history is kept
    #[inline]
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        info!("Switched chat model to {}", self.model);
    }

    /// Switch to a fresh conversation
    #[inline]
    pub fn new_chat(&mut self) {
        self.session_id = self.store.generate_session_id();
        self.messages.clear();
        info!("Started session {}", self.session_id);
    }

    /// Switch to a stored conversation
    #[inline]
    pub fn resume(&mut self, session_id: &str) -> Result<()> {
        let messages = self.store.load_session(session_id)?;
        self.session_id = session_id.to_string();
        self.messages = messages;
        info!(
            "Resumed session {} ({} messages)",
            self.session_id,
            self.messages.len()
        );
        Ok(())
    }

    /// Run one turn.
    ///
    /// The user message is persisted before the model is called, so it stays
    /// in the transcript when the call fails. Returns `None` for a blank prompt.
    #[inline]
    pub async fn send<F>(&mut self, prompt: &str, use_rag: bool, on_progress: F) -> Result<Option<String>>
    where
        F: FnMut(&str),
    {
        if prompt.trim().is_empty() {
            return Ok(None);
        }

        self.messages.push(Message::user(prompt));
        self.store.save_session(&self.session_id, &self.messages)?;

        let context = match self.knowledge {
            Some(knowledge) if use_rag => knowledge.query(prompt, self.top_k).await?,
            _ => Vec::new(),
        };
        debug!("Turn uses {} context chunks", context.len());

        let outgoing = augment_messages(&self.messages, &build_context_prefix(&context));
        let stream = self
            .completion
            .stream_chat(&self.model, &outgoing)
            .map_err(into_connection_error)?;
        let reply = fold_fragments(stream, on_progress).map_err(into_connection_error)?;

        self.messages.push(Message::assistant(reply.clone()));
        self.store.save_session(&self.session_id, &self.messages)?;

        Ok(Some(reply))
    }
}

fn into_connection_error(error: RagError) -> RagError {
    match error {
        RagError::Connection(_) => error,
        other => RagError::Connection(other.to_string()),
    }
}
