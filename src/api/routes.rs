use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response, sse::{Event, KeepAlive, Sse}},
    routing::post,
};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::AppState;
use crate::api::models::{ChatRequest, StreamDone, SummaryResponse, UrlRequest};
use crate::api::response;
use crate::commands::{ChatHistory, Command, HELP_TEXT};
use crate::error::{AppError, Result};
use crate::llm::Turn;
use crate::pdf::{download_pdf, extract_pdf_text, normalize_pdf_url};
use crate::prompt::{SummaryKind, build_prompt};
use crate::scraper::{extract_text, fetch_html};
use crate::store::ContentCache;
use crate::summarizer::{
    SummaryEvent, TIMED_OUT, cached_events, commit_on_complete, read_through, summarize_cached,
    with_deadline, write_through,
};
use crate::youtube::{DEFAULT_LANGUAGES, embed_html, fetch_transcript, parse_video_id};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_PDF_BYTES: usize = 50 * 1024 * 1024;

type EventStream = BoxStream<'static, SummaryEvent>;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/youtube", post(youtube_handler))
        .route("/api/arxiv", post(arxiv_handler))
        .route("/api/scrape", post(scrape_handler))
        .route("/api/pdf", post(pdf_handler).layer(DefaultBodyLimit::max(MAX_PDF_BYTES)))
        .route("/api/chat", post(chat_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

fn lock(chat: &Mutex<ChatHistory>) -> MutexGuard<'_, ChatHistory> {
    chat.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs a summary request under the overall timeout and wraps the outcome
/// in the JSON envelope.
async fn respond<F>(label: &str, work: F) -> Response
where
    F: Future<Output = Result<SummaryResponse>>,
{
    let start_time = Instant::now();
    let result = tokio::time::timeout(REQUEST_TIMEOUT, work).await;
    let elapsed = start_time.elapsed();

    match result {
        Ok(Ok(data)) => {
            info!(request = label, cached = data.cached, ?elapsed, "Summary served");
            response::success(data).into_response()
        }
        Ok(Err(err)) => {
            warn!(request = label, error = %err, ?elapsed, "Summary request failed");
            err.into_response()
        }
        Err(_) => {
            warn!(request = label, ?elapsed, "Request timed out");
            response::error::<()>(StatusCode::REQUEST_TIMEOUT, TIMED_OUT.to_string())
                .into_response()
        }
    }
}

async fn youtube_handler(State(state): State<AppState>, Json(req): Json<UrlRequest>) -> Response {
    info!(url = %req.url, "Processing YouTube request");
    respond("youtube", summarize_youtube(&state, &req.url)).await
}

async fn arxiv_handler(State(state): State<AppState>, Json(req): Json<UrlRequest>) -> Response {
    info!(url = %req.url, "Processing PDF request");
    respond("arxiv", summarize_pdf_url(&state, &req.url)).await
}

async fn scrape_handler(State(state): State<AppState>, Json(req): Json<UrlRequest>) -> Response {
    info!(url = %req.url, "Processing web page request");
    respond("scrape", summarize_web_page(&state, &req.url)).await
}

async fn pdf_handler(State(state): State<AppState>, body: Bytes) -> Response {
    info!(bytes = body.len(), "Processing uploaded PDF");
    respond("pdf", summarize_uploaded_pdf(&state, body)).await
}

async fn summarize_youtube(state: &AppState, url: &str) -> Result<SummaryResponse> {
    let video_id = parse_video_id(url)?;
    let prompt_source = youtube_prompt(state, video_id.clone());
    let model = &state.model;

    let summary = summarize_cached(state.caches.youtube.as_ref(), &video_id, move || async move {
        let prompt = prompt_source.await?;
        model.generate_stream(&[Turn::user(prompt)]).await
    })
    .await?;

    Ok(SummaryResponse {
        embed_html: Some(embed_html(&video_id)),
        key: Some(video_id),
        summary: summary.text,
        cached: summary.cached,
        word_count: None,
        summarized_at: Utc::now(),
    })
}

async fn summarize_pdf_url(state: &AppState, url: &str) -> Result<SummaryResponse> {
    let pdf_url = normalize_pdf_url(url);
    if pdf_url.is_empty() {
        return Err(AppError::InvalidInput("PDF URL is empty".to_string()));
    }
    let prompt_source = pdf_prompt(state, pdf_url.clone());
    let model = &state.model;

    let summary = summarize_cached(state.caches.arxiv.as_ref(), &pdf_url, move || async move {
        let prompt = prompt_source.await?;
        model.generate_stream(&[Turn::user(prompt)]).await
    })
    .await?;

    Ok(SummaryResponse {
        key: Some(pdf_url),
        summary: summary.text,
        cached: summary.cached,
        embed_html: None,
        word_count: None,
        summarized_at: Utc::now(),
    })
}

async fn summarize_web_page(state: &AppState, url: &str) -> Result<SummaryResponse> {
    let url = url.trim().to_string();
    if url.is_empty() {
        return Err(AppError::InvalidInput("URL is empty".to_string()));
    }
    let mut word_count = None;
    let word_count_slot = &mut word_count;
    let guide = SummaryKind::WebPage.guide(&state.config.summary_language);
    let page_url = url.as_str();
    let model = &state.model;

    let summary = summarize_cached(state.caches.html.as_ref(), &url, move || async move {
        let html = fetch_html(page_url).await?;
        let text = extract_text(&html)?;
        *word_count_slot = Some(text.split_whitespace().count());
        model.generate_stream(&[Turn::user(build_prompt(&text, &guide))]).await
    })
    .await?;

    Ok(SummaryResponse {
        key: Some(url),
        summary: summary.text,
        cached: summary.cached,
        embed_html: None,
        word_count,
        summarized_at: Utc::now(),
    })
}

/// Uploaded files have no stable identity, so they bypass the cache.
async fn summarize_uploaded_pdf(state: &AppState, body: Bytes) -> Result<SummaryResponse> {
    if body.is_empty() {
        return Err(AppError::InvalidInput("PDF body is empty".to_string()));
    }
    let text = extract_in_background(body.to_vec()).await?;
    let prompt = build_prompt(&text, &SummaryKind::Paper.guide(&state.config.summary_language));
    let summary = state.model.generate(&[Turn::user(prompt)]).await?;

    Ok(SummaryResponse {
        key: None,
        summary,
        cached: false,
        embed_html: None,
        word_count: None,
        summarized_at: Utc::now(),
    })
}

async fn extract_in_background(bytes: Vec<u8>) -> Result<String> {
    tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
        .await
        .map_err(|e| AppError::ParseError(format!("PDF extraction task failed: {}", e)))?
}

// Prompt sources are lazy: nothing is fetched unless the cache misses.

fn youtube_prompt(
    state: &AppState,
    video_id: String,
) -> impl Future<Output = Result<String>> + Send + use<> {
    let guide = SummaryKind::Youtube.guide(&state.config.summary_language);
    async move {
        let transcript = fetch_transcript(&video_id, DEFAULT_LANGUAGES).await?;
        Ok(build_prompt(&transcript, &guide))
    }
}

fn pdf_prompt(
    state: &AppState,
    pdf_url: String,
) -> impl Future<Output = Result<String>> + Send + use<> {
    let guide = SummaryKind::Paper.guide(&state.config.summary_language);
    async move {
        let bytes = download_pdf(&pdf_url).await?;
        let text = extract_in_background(bytes).await?;
        Ok(build_prompt(&text, &guide))
    }
}

fn html_prompt(
    state: &AppState,
    url: String,
) -> impl Future<Output = Result<String>> + Send + use<> {
    let guide = SummaryKind::WebPage.guide(&state.config.summary_language);
    async move {
        let html = fetch_html(&url).await?;
        let text = extract_text(&html)?;
        Ok(build_prompt(&text, &guide))
    }
}

async fn chat_handler(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let command = match Command::parse(&req.message) {
        Ok(command) => command,
        Err(err) => return err.into_response(),
    };
    info!(?command, "Processing chat message");

    let events = match command {
        Command::Help => {
            let mut history = lock(&state.chat);
            history.push(Turn::user("/help"));
            history.push(Turn::model(HELP_TEXT));
            single_message(HELP_TEXT)
        }
        Command::Clear => {
            lock(&state.chat).clear();
            single_message("Chat history cleared!")
        }
        command => {
            // The deadline covers both starting the summary and streaming it.
            let deadline = tokio::time::Instant::now() + REQUEST_TIMEOUT;
            match tokio::time::timeout_at(deadline, start_chat(&state, command)).await {
                Ok(Ok(events)) => with_deadline(events, deadline).boxed(),
                Ok(Err(err)) => {
                    warn!(error = %err, "Chat request failed");
                    return err.into_response();
                }
                Err(_) => {
                    return response::error::<()>(StatusCode::REQUEST_TIMEOUT, TIMED_OUT.to_string())
                        .into_response();
                }
            }
        }
    };

    sse_response(events)
}

fn single_message(text: &str) -> EventStream {
    stream::iter([
        SummaryEvent::Fragment(text.to_string()),
        SummaryEvent::Complete { cached: false },
    ])
    .boxed()
}

async fn start_chat(state: &AppState, command: Command) -> Result<EventStream> {
    match command {
        Command::Youtube(url) => {
            let video_id = parse_video_id(&url)?;
            let announcement = format!("Analyze the YouTube video transcript from {}", url);
            let prompt = youtube_prompt(state, video_id.clone());
            chat_summary(state, state.caches.youtube.clone(), video_id, announcement, prompt).await
        }
        Command::Pdf(url) => {
            let pdf_url = normalize_pdf_url(&url);
            let announcement = format!("Analyze the PDF content from {}", url);
            let prompt = pdf_prompt(state, pdf_url.clone());
            chat_summary(state, state.caches.arxiv.clone(), pdf_url, announcement, prompt).await
        }
        Command::Html(url) => {
            let announcement = format!("Analyze and summarize the content from {}", url);
            let prompt = html_prompt(state, url.clone());
            chat_summary(state, state.caches.html.clone(), url, announcement, prompt).await
        }
        Command::Chat(message) => {
            let turns = {
                let mut history = lock(&state.chat);
                history.push(Turn::user(message));
                history.turns().to_vec()
            };
            let stream = state.model.generate_stream(&turns).await?;
            let chat = state.chat.clone();
            Ok(commit_on_complete(stream, move |text| lock(&chat).push(Turn::model(text))).boxed())
        }
        Command::Help | Command::Clear => Ok(stream::empty().boxed()),
    }
}

/// Streams a summary into the conversation, serving it from `cache` when
/// possible and committing it to both the cache and the history once the
/// model finishes.
async fn chat_summary<P>(
    state: &AppState,
    cache: Option<ContentCache>,
    key: String,
    announcement: String,
    prompt: P,
) -> Result<EventStream>
where
    P: Future<Output = Result<String>>,
{
    let history = {
        let mut history = lock(&state.chat);
        history.push(Turn::user(announcement));
        history.turns().to_vec()
    };

    if let Some(text) = read_through(cache.as_ref(), &key) {
        lock(&state.chat).push(Turn::model(text.clone()));
        return Ok(cached_events(text).boxed());
    }

    let mut turns = history;
    turns.push(Turn::user(prompt.await?));
    let stream = state.model.generate_stream(&turns).await?;

    let chat = state.chat.clone();
    let events = commit_on_complete(stream, move |text| {
        write_through(cache.as_ref(), &key, text);
        lock(&chat).push(Turn::model(text));
    });
    Ok(events.boxed())
}

fn sse_response(events: EventStream) -> Response {
    let events = events.map(|event| Ok::<_, Infallible>(to_sse_event(event)));
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn to_sse_event(event: SummaryEvent) -> Event {
    let encoded = match event {
        SummaryEvent::Fragment(text) => Event::default().event("chunk").json_data(text),
        SummaryEvent::Complete { cached } => {
            Event::default().event("done").json_data(StreamDone { cached })
        }
        SummaryEvent::Failed(message) => Event::default().event("error").json_data(message),
    };

    encoded.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to encode event");
        Event::default().event("error").data("Failed to encode event")
    })
}
