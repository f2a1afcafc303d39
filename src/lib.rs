pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod llm;
pub mod pdf;
pub mod prompt;
pub mod scraper;
pub mod store;
pub mod summarizer;
pub mod youtube;

use std::sync::{Arc, Mutex};
use commands::ChatHistory;
use config::Config;
use llm::SummaryModel;
use summarizer::Caches;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model: Arc<dyn SummaryModel>,
    pub caches: Arc<Caches>,
    /// Single conversation; the app serves one user.
    pub chat: Arc<Mutex<ChatHistory>>,
}

impl AppState {
    /// Opens the cache namespaces under `config.data_dir`.
    pub fn new(config: Config, model: Arc<dyn SummaryModel>) -> Self {
        let caches = Caches::open(&config.data_dir);
        Self {
            config: Arc::new(config),
            model,
            caches: Arc::new(caches),
            chat: Arc::new(Mutex::new(ChatHistory::default())),
        }
    }
}
