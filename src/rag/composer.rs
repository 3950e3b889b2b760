use super::memory::{ConversationMemory, Turn};
use super::retriever::Retriever;
use super::{Answer, Citation, QueryMatch};
use crate::config::Config;
use crate::error::{RagError, Result};
use crate::llm::{ChatModel, PromptMessage};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

const NO_CONTEXT: &str = "No relevant messages were found in the Slack history for this question.";

/// Answers questions from retrieved history, remembering each conversation.
pub struct AnswerComposer {
    retriever: Retriever,
    llm: Arc<dyn ChatModel>,
    memory: ConversationMemory,
    system_prompt: String,
    temperature: f32,
    top_k: usize,
    max_citations: usize,
}

impl AnswerComposer {
    pub fn new(
        retriever: Retriever,
        llm: Arc<dyn ChatModel>,
        memory: ConversationMemory,
        config: &Config,
    ) -> Self {
        Self {
            retriever,
            llm,
            memory,
            system_prompt: config.system_prompt.clone(),
            temperature: config.llm_temperature,
            top_k: config.retrieval_top_k,
            max_citations: config.max_citations,
        }
    }

    /// Retrieve, prompt, answer. Memory only grows when every step succeeded,
    /// so a failed question can simply be asked again.
    pub async fn answer(&self, conversation_id: &str, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyInput);
        }

        let history = self.memory.history(conversation_id);
        let matches = self.retriever.retrieve(question, self.top_k).await?;
        let prompt = build_prompt(&self.system_prompt, &matches, &history, question);

        let text = self.llm.complete(&prompt, self.temperature).await?;
        self.memory.append(conversation_id, question, &text);

        let citations = derive_citations(&matches, self.max_citations);
        info!(
            "Answered in {} ({} prior turns, {} matches, {} citations)",
            conversation_id,
            history.len(),
            matches.len(),
            citations.len()
        );
        Ok(Answer { text, citations })
    }
}

/// System instructions with numbered context, then prior turns, then the question.
pub fn build_prompt(
    system_prompt: &str,
    matches: &[QueryMatch],
    history: &[Turn],
    question: &str,
) -> Vec<PromptMessage> {
    let mut system = format!("{}\n\nRelevant Slack messages:\n", system_prompt.trim_end());
    if matches.is_empty() {
        system.push_str(NO_CONTEXT);
    } else {
        for (i, m) in matches.iter().enumerate() {
            let meta = &m.metadata;
            system.push_str(&format!(
                "\n[{}] #{} | {} | {}\n{}\n",
                i + 1,
                meta.channel,
                meta.user,
                meta.timestamp,
                meta.text
            ));
        }
    }

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(PromptMessage::system(system));
    for turn in history {
        messages.push(PromptMessage::user(turn.question.clone()));
        messages.push(PromptMessage::assistant(turn.answer.clone()));
    }
    messages.push(PromptMessage::user(question));
    messages
}

/// Walk the matches in rank order, keeping the first hit per deep link.
pub fn derive_citations(matches: &[QueryMatch], max: usize) -> Vec<Citation> {
    let mut seen = HashSet::new();
    matches
        .iter()
        .filter(|m| !m.metadata.link.is_empty())
        .filter(|m| seen.insert(m.metadata.link.as_str()))
        .take(max)
        .enumerate()
        .map(|(i, m)| Citation {
            rank: i + 1,
            channel: m.metadata.channel.clone(),
            link: m.metadata.link.clone(),
        })
        .collect()
}
