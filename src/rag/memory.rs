use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Per-conversation question/answer history, kept in process memory.
///
/// Conversations are evicted least-recently-used once `capacity` is reached;
/// turns inside a kept conversation are never dropped.
#[derive(Clone)]
pub struct ConversationMemory {
    cache: Arc<Mutex<LruCache<String, Vec<Turn>>>>,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    /// Prior turns, oldest first. Empty for an unknown conversation.
    pub fn history(&self, conversation_id: &str) -> Vec<Turn> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(conversation_id).cloned().unwrap_or_default()
    }

    pub fn append(&self, conversation_id: &str, question: &str, answer: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let turn = Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        };
        match cache.get_mut(conversation_id) {
            Some(turns) => turns.push(turn),
            None => {
                cache.put(conversation_id.to_string(), vec![turn]);
            }
        }
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.peek(conversation_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_keep_order() {
        let memory = ConversationMemory::new(10);
        assert!(memory.history("C1:1").is_empty());

        memory.append("C1:1", "q1", "a1");
        memory.append("C1:1", "q2", "a2");
        let turns = memory.history("C1:1");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].question, "q1");
        assert_eq!(turns[1].answer, "a2");
    }

    #[test]
    fn test_conversations_are_isolated() {
        let memory = ConversationMemory::new(10);
        memory.append("C1:1", "q1", "a1");
        assert_eq!(memory.len("C1:1"), 1);
        assert_eq!(memory.len("C1:2"), 0);
    }

    #[test]
    fn test_least_recent_conversation_is_evicted() {
        let memory = ConversationMemory::new(2);
        memory.append("a", "q", "a");
        memory.append("b", "q", "a");
        // Touch "a" so "b" becomes least recently used.
        memory.history("a");
        memory.append("c", "q", "a");

        assert_eq!(memory.len("a"), 1);
        assert_eq!(memory.len("b"), 0);
        assert_eq!(memory.len("c"), 1);
    }
}
