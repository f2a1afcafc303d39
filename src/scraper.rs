use reqwest::{Client, ClientBuilder};
use scraper::{ElementRef, Html, Node, Selector};
use std::time::Duration;
use once_cell::sync::Lazy;
use tracing::debug;
use crate::error::{AppError, Result};

// Shared by every extractor to reuse connections
pub(crate) static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(10)
        .user_agent(concat!("genai-summarizer/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("body").expect("static selector")
});

/// Fetches `url`, treating any non-success status as a fetch failure.
pub async fn fetch_html(url: &str) -> Result<String> {
    debug!(url, "Fetching HTML");
    let response = CLIENT.get(url).send().await?.error_for_status()?;
    let html = response.text().await?;
    Ok(html)
}

pub fn format_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut last_was_whitespace = true;

    for line in html.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            if !last_was_whitespace {
                result.push('\n');
            }
            result.push_str(trimmed);
            last_was_whitespace = false;
        }
    }

    result
}

/// Visible text of the page body, one line per text node, without scripts
/// or styles.
pub fn extract_text(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let body = document
        .select(&BODY_SELECTOR)
        .next()
        .ok_or_else(|| AppError::ParseError("No <body> tag found in the HTML".to_string()))?;

    let mut text = String::new();
    collect_text(body, &mut text);
    Ok(format_html(&text))
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push('\n');
            }
            Node::Element(el) if is_hidden(el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn is_hidden(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "noscript" | "template")
}
