use crate::error::{AppError, Result};
use crate::llm::Turn;

pub const HELP_TEXT: &str = "Available commands:
* `/help`: Show available commands.
* `/clear`: Clear chat history.
* `/pdf <url>`: Read PDF from URL and summarize its contents.
* `/html <url>`: Read HTML from URL and summarize its contents.
* `/youtube <url>`: Read YouTube transcripts from URL and summarize them.
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Clear,
    Pdf(String),
    Html(String),
    Youtube(String),
    Chat(String),
}

impl Command {
    /// Interprets one line of chat input.
    ///
    /// Slash commands are matched case-insensitively. Bare URLs are routed by
    /// host: arXiv PDFs and YouTube pages get their own summaries, any other
    /// link is treated as a web page.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AppError::InvalidInput("Message is empty".to_string()));
        }

        let lower = input.to_lowercase();
        if lower == "/help" {
            return Ok(Command::Help);
        }
        if lower == "/clear" {
            return Ok(Command::Clear);
        }
        if let Some(url) = argument(input, &lower, "/pdf") {
            return require_url(url, "/pdf", "https://example.com/document.pdf").map(Command::Pdf);
        }
        if let Some(url) = argument(input, &lower, "/html") {
            return require_url(url, "/html", "https://example.com").map(Command::Html);
        }
        if let Some(url) = argument(input, &lower, "/youtube") {
            return require_url(url, "/youtube", "https://www.youtube.com/watch?v=dQw4w9WgXcQ")
                .map(Command::Youtube);
        }

        if input.starts_with("https://arxiv.org/pdf/") {
            return Ok(Command::Pdf(input.to_string()));
        }
        if input.starts_with("https://www.youtube.com/") {
            return Ok(Command::Youtube(input.to_string()));
        }
        if input.starts_with("http://") || input.starts_with("https://") {
            return Ok(Command::Html(input.to_string()));
        }

        Ok(Command::Chat(input.to_string()))
    }
}

fn argument<'a>(input: &'a str, lower: &str, command: &str) -> Option<&'a str> {
    if !lower.starts_with(command) {
        return None;
    }
    input.get(command.len()..).map(str::trim)
}

fn require_url(url: &str, command: &str, example: &str) -> Result<String> {
    if url.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Please provide a URL after {}, e.g., {} {}",
            command, command, example
        )));
    }
    Ok(url.to_string())
}

/// Conversation sent with every chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    turns: Vec<Turn>,
}

impl ChatHistory {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
