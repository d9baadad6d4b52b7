use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use incidentqa_core::types::ConversationTurn;

pub type TurnLog = Arc<Mutex<Vec<ConversationTurn>>>;

/// Per-conversation turn logs. A turn holds its conversation's lock from start
/// to append, so turns of one conversation run strictly in arrival order while
/// different conversations never contend.
#[derive(Default)]
pub struct Conversations {
    logs: DashMap<String, TurnLog>,
}

impl Conversations {
    pub fn new() -> Self { Self::default() }

    pub fn log(&self, conversation_id: &str) -> TurnLog {
        self.logs.entry(conversation_id.to_string()).or_default().clone()
    }

    pub async fn history(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        match self.logs.get(conversation_id).map(|e| e.value().clone()) {
            Some(log) => log.lock().await.clone(),
            None => vec![],
        }
    }

    /// Drops a conversation; lifetime policy is owned by the caller.
    pub fn remove(&self, conversation_id: &str) -> bool { self.logs.remove(conversation_id).is_some() }

    pub fn len(&self) -> usize { self.logs.len() }
    pub fn is_empty(&self) -> bool { self.logs.is_empty() }
}

/// The most recent `n` turns, oldest first.
pub fn tail(turns: &[ConversationTurn], n: usize) -> Vec<ConversationTurn> {
    turns[turns.len().saturating_sub(n)..].to_vec()
}
