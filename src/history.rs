use std::collections::VecDeque;

use log::debug;
use tokio::sync::Mutex;

/// In-memory clipboard history, newest entry first.
#[derive(Default)]
pub struct HistoryStore {
    entries: Mutex<VecDeque<String>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, text: String) {
        let mut entries = self.entries.lock().await;
        entries.push_front(text);
        debug!("clipboard history now holds {} entries", entries.len());
    }

    pub async fn list(&self) -> Vec<String> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
        debug!("clipboard history cleared");
    }
}
