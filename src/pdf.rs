use lopdf::Document;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::prompt::MAX_CONTEXT_CHARS;
use crate::scraper::CLIENT;

const ARXIV_ABSTRACT_PREFIX: &str = "https://arxiv.org/abs/";
const ARXIV_PDF_PREFIX: &str = "https://arxiv.org/pdf/";
// Replaces the shared client's total timeout, which also bounds the body read.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(80);

/// Cache key for a PDF URL: arXiv abstract pages map to their PDF.
pub fn normalize_pdf_url(url: &str) -> String {
    let url = url.trim();
    match url.strip_prefix(ARXIV_ABSTRACT_PREFIX) {
        Some(rest) => format!("{}{}", ARXIV_PDF_PREFIX, rest),
        None => url.to_string(),
    }
}

pub async fn download_pdf(url: &str) -> Result<Vec<u8>> {
    debug!(url, "Downloading PDF");
    let response = CLIENT
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_ascii_lowercase);
    if let Some(content_type) = content_type {
        if !content_type.starts_with("application/pdf") {
            return Err(AppError::ParseError(format!(
                "The URL does not point to a valid PDF file (content-type: {})",
                content_type
            )));
        }
    }

    Ok(response.bytes().await?.to_vec())
}

/// Extracts page text in order until more than [`MAX_CONTEXT_CHARS`] have
/// been collected.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    let document = Document::load_mem(bytes)?;
    let mut text = String::new();

    for page_number in document.get_pages().keys() {
        if text.chars().count() > MAX_CONTEXT_CHARS {
            warn!(page_number, "Long PDF text will be truncated");
            break;
        }
        match document.extract_text(&[*page_number]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => debug!(page_number, error = %e, "Skipping page without extractable text"),
        }
    }

    if text.trim().is_empty() {
        return Err(AppError::ParseError(
            "Could not extract text from the PDF. The PDF might be image-based or encrypted."
                .to_string(),
        ));
    }

    Ok(text)
}
