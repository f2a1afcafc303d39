use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    /// Cache key the summary is stored under, if any.
    pub key: Option<String>,
    #[serde(rename = "summary_markdown")]
    pub summary: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    pub summarized_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct StreamDone {
    pub cached: bool,
}
