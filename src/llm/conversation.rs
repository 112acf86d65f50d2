//! Run-scoped conversation store.
//!
//! Maps a request id to its ordered message history so the reflection pass
//! can continue the exact conversation the generation pass produced. One
//! store belongs to one orchestrator run; request ids carry the run tag so
//! threads from different runs never collide.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::ForecastError;
use crate::llm::types::ChatMessage;

#[derive(Debug, Default)]
pub struct ConversationStore {
    threads: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the thread with `seed` unless it already exists.
    ///
    /// Returns `true` if this call created the thread. Under concurrent
    /// calls the first one wins and later seeds are discarded.
    pub fn ensure(&self, request_id: &str, seed: Vec<ChatMessage>) -> Result<bool, ForecastError> {
        let mut threads = self.threads.lock().map_err(|_| ForecastError::LockPoisoned)?;
        if threads.contains_key(request_id) {
            return Ok(false);
        }
        threads.insert(request_id.to_string(), seed);
        Ok(true)
    }

    /// Append messages to an existing thread.
    pub fn append(&self, request_id: &str, messages: Vec<ChatMessage>) -> Result<(), ForecastError> {
        let mut threads = self.threads.lock().map_err(|_| ForecastError::LockPoisoned)?;
        let thread = threads
            .get_mut(request_id)
            .ok_or_else(|| unknown(request_id))?;
        thread.extend(messages);
        Ok(())
    }

    /// Snapshot of a thread.
    pub fn get(&self, request_id: &str) -> Result<Vec<ChatMessage>, ForecastError> {
        let threads = self.threads.lock().map_err(|_| ForecastError::LockPoisoned)?;
        threads
            .get(request_id)
            .cloned()
            .ok_or_else(|| unknown(request_id))
    }
}

fn unknown(request_id: &str) -> ForecastError {
    ForecastError::UnknownThread {
        request_id: request_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn seed(prompt: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::system("forecaster"), ChatMessage::user(prompt)]
    }

    #[test]
    fn test_ensure_creates_once() {
        let store = ConversationStore::new();
        assert!(store.ensure("run_AL01_0", seed("first")).unwrap());
        assert!(!store.ensure("run_AL01_0", seed("second")).unwrap());

        let thread = store.get("run_AL01_0").unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1].content, "first");
    }

    #[test]
    fn test_append_grows_thread_in_order() {
        let store = ConversationStore::new();
        store.ensure("id", seed("p")).unwrap();
        store
            .append("id", vec![ChatMessage::assistant("a1")])
            .unwrap();
        store
            .append("id", vec![ChatMessage::user("u2"), ChatMessage::assistant("a2")])
            .unwrap();

        let contents: Vec<_> = store
            .get("id")
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["forecaster", "p", "a1", "u2", "a2"]);
    }

    #[test]
    fn test_append_unknown_thread() {
        let store = ConversationStore::new();
        let err = store
            .append("missing", vec![ChatMessage::user("x")])
            .unwrap_err();
        assert!(matches!(err, ForecastError::UnknownThread { ref request_id } if request_id == "missing"));
    }

    #[test]
    fn test_get_unknown_thread() {
        let store = ConversationStore::new();
        assert!(matches!(
            store.get("missing"),
            Err(ForecastError::UnknownThread { .. })
        ));
    }

    #[test]
    fn test_concurrent_ensure_first_caller_wins() {
        let store = Arc::new(ConversationStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.ensure("shared", seed(&format!("p{i}"))).unwrap())
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(store.get("shared").unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_appends_are_whole() {
        let store = Arc::new(ConversationStore::new());
        store.ensure("t", Vec::new()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .append(
                            "t",
                            vec![
                                ChatMessage::user(format!("q{i}")),
                                ChatMessage::assistant(format!("a{i}")),
                            ],
                        )
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let thread = store.get("t").unwrap();
        assert_eq!(thread.len(), 16);
        // Each user turn is immediately followed by its own answer.
        for pair in thread.chunks(2) {
            assert_eq!(&pair[0].content[1..], &pair[1].content[1..]);
        }
    }
}
