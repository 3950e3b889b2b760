use crate::error::RagError;
use crate::rag::composer::AnswerComposer;
use crate::reply::{format_answer, APOLOGY, GREETING};
use crate::slack::text::strip_bot_handle;
use serde::Deserialize;
use tracing::{error, info};

/// The parts of an `app_mention` event the bot acts on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MentionEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl MentionEvent {
    /// Thread root the reply goes under; a top-level mention starts a new thread.
    pub fn thread(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// Follow-ups posted in the reply thread share this id, and so share memory.
    pub fn conversation_id(&self) -> String {
        format!("{}:{}", self.channel, self.thread())
    }
}

/// Turn one mention into the text to post back. Never fails: errors become an apology.
pub async fn handle_mention(composer: &AnswerComposer, event: &MentionEvent) -> String {
    let question = strip_bot_handle(&event.text);
    if question.is_empty() {
        return GREETING.to_string();
    }

    let conversation_id = event.conversation_id();
    info!(
        "Handling mention from {} in {}: {}",
        event.user.as_deref().unwrap_or("unknown"),
        conversation_id,
        question
    );

    match composer.answer(&conversation_id, &question).await {
        Ok(answer) => format_answer(&answer),
        Err(RagError::EmptyInput) => GREETING.to_string(),
        Err(e) => {
            error!("Failed to answer in {}: {}", conversation_id, e);
            APOLOGY.to_string()
        }
    }
}
