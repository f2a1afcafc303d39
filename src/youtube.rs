//! YouTube video ids and best-effort transcript retrieval.
//!
//! Transcripts come from the caption tracks advertised on the watch page.
//! Videos without captions, or pages that do not advertise them, fail with a
//! parse error.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::scraper::CLIENT;

pub const DEFAULT_LANGUAGES: &[&str] = &["ko", "en"];

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const CAPTION_TRACKS_MARKER: &str = "\"captionTracks\":";

static VIDEO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[?&]v=|youtu\.be/)([A-Za-z0-9_-]+)").expect("static regex")
});

static TEXT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("text").expect("static selector")
});

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
}

pub fn parse_video_id(url: &str) -> Result<String> {
    VIDEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AppError::InvalidInput("Invalid YouTube URL.".to_string()))
}

pub fn embed_html(video_id: &str) -> String {
    format!(
        "<iframe width=\"560\" height=\"315\" id=\"youtube_video\" \
         src=\"https://www.youtube.com/embed/{}\" \
         title=\"YouTube video player\" frameborder=\"0\" allowfullscreen></iframe>",
        video_id
    )
}

/// Reads the caption track list embedded in a watch page.
pub fn caption_tracks(watch_page: &str) -> Vec<CaptionTrack> {
    let Some(start) = watch_page.find(CAPTION_TRACKS_MARKER) else {
        return Vec::new();
    };
    let rest = &watch_page[start + CAPTION_TRACKS_MARKER.len()..];

    // The array is followed by the rest of the player config; only the first
    // value is parsed.
    serde_json::Deserializer::from_str(rest)
        .into_iter::<Vec<CaptionTrack>>()
        .next()
        .and_then(|tracks| tracks.ok())
        .unwrap_or_default()
}

/// First track matching the earliest preferred language.
pub fn select_track<'a>(
    tracks: &'a [CaptionTrack],
    languages: &[&str],
) -> Option<&'a CaptionTrack> {
    languages.iter().find_map(|lang| {
        let regional = format!("{}-", lang);
        tracks.iter().find(|track| {
            track.language_code == *lang || track.language_code.starts_with(&regional)
        })
    })
}

/// Joins the segments of a timed-text document with spaces.
pub fn parse_timed_text(xml: &str) -> String {
    let fragment = Html::parse_fragment(xml);
    fragment
        .select(&TEXT_SELECTOR)
        .map(|segment| unescape(&segment.text().collect::<String>()))
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// Timed text escapes entities twice; the parser undoes the first layer.
fn unescape(text: &str) -> String {
    text.replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub async fn fetch_transcript(video_id: &str, languages: &[&str]) -> Result<String> {
    debug!(video_id, "Fetching watch page");
    let watch_page = CLIENT
        .get(format!("{}{}", WATCH_URL, video_id))
        .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let tracks = caption_tracks(&watch_page);
    let track = select_track(&tracks, languages).ok_or_else(|| {
        AppError::ParseError(format!(
            "No transcript in {} is available for video {}",
            languages.join("/"),
            video_id
        ))
    })?;

    debug!(video_id, language = %track.language_code, "Fetching transcript");
    let xml = CLIENT.get(&track.base_url).send().await?.error_for_status()?.text().await?;

    let transcript = parse_timed_text(&xml);
    if transcript.trim().is_empty() {
        return Err(AppError::ParseError(
            "Could not extract transcript from the YouTube video.".to_string(),
        ));
    }

    Ok(transcript)
}
