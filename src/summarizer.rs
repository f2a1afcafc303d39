//! Read-through/write-through caching around summary generation.
//!
//! Cached summaries are served without touching the extractor or the model.
//! Fresh summaries are committed only once the model stream has completed;
//! cache failures are logged and never change what the caller receives.

use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::path::Path;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::llm::{NO_TEXT, TextStream, collect_text};
use crate::store::ContentCache;

/// One cache namespace per content family.
#[derive(Debug, Clone, Default)]
pub struct Caches {
    pub youtube: Option<ContentCache>,
    pub arxiv: Option<ContentCache>,
    pub html: Option<ContentCache>,
}

impl Caches {
    /// Opens `data_dir/{youtube,arxiv,html}`. A namespace that cannot be
    /// opened is disabled rather than failing startup.
    pub fn open(data_dir: &Path) -> Self {
        Self {
            youtube: open_namespace(data_dir, "youtube"),
            arxiv: open_namespace(data_dir, "arxiv"),
            html: open_namespace(data_dir, "html"),
        }
    }
}

fn open_namespace(data_dir: &Path, name: &str) -> Option<ContentCache> {
    match ContentCache::open(data_dir.join(name)) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(namespace = name, error = %e, "Caching disabled for namespace");
            None
        }
    }
}

/// Cached value for `key`. Read failures count as misses.
pub fn read_through(cache: Option<&ContentCache>, key: &str) -> Option<String> {
    let cache = cache?;
    match cache.get(key) {
        Ok(Some(value)) => {
            info!(key, "Cache hit");
            Some(value)
        }
        Ok(None) => {
            debug!(key, "Cache miss");
            None
        }
        Err(e) => {
            warn!(key, error = %e, "Cache read failed, recomputing");
            None
        }
    }
}

/// Best-effort commit of a computed summary. Empty values are not stored.
pub fn write_through(cache: Option<&ContentCache>, key: &str, value: &str) {
    let Some(cache) = cache else {
        return;
    };
    if value.is_empty() {
        return;
    }
    match cache.put(key, value) {
        Ok(()) => debug!(key, bytes = value.len(), "Summary cached"),
        Err(e) => warn!(key, error = %e, "Cache write failed"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
    pub cached: bool,
}

/// Returns the cached summary for `key`, or runs `produce`, assembles its
/// whole stream and commits the result.
///
/// `produce` covers everything expensive (fetching, extraction and the model
/// call) so that a hit skips all of it. A failure anywhere in `produce` or
/// in the stream commits nothing, and neither does a response without text.
pub async fn summarize_cached<F, Fut>(
    cache: Option<&ContentCache>,
    key: &str,
    produce: F,
) -> Result<Summary>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<TextStream>>,
{
    if let Some(text) = read_through(cache, key) {
        return Ok(Summary { text, cached: true });
    }

    let text = collect_text(produce().await?).await?;
    write_through(cache, key, &text);
    Ok(Summary { text, cached: false })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryEvent {
    Fragment(String),
    Complete { cached: bool },
    Failed(String),
}

/// Events for a summary served straight from the cache.
pub fn cached_events(text: String) -> impl Stream<Item = SummaryEvent> + Send + 'static {
    stream::iter([SummaryEvent::Fragment(text), SummaryEvent::Complete { cached: true }])
}

struct Relay<F> {
    inner: TextStream,
    assembled: String,
    on_complete: Option<F>,
}

/// Forwards each fragment of `inner` as it arrives and calls `on_complete`
/// with the assembled text once the stream ends successfully with
/// non-empty text. After a failure the partial text is discarded and
/// `on_complete` is never called. A stream that ends without any text fails.
pub fn commit_on_complete<F>(
    inner: TextStream,
    on_complete: F,
) -> impl Stream<Item = SummaryEvent> + Send + 'static
where
    F: FnOnce(&str) + Send + 'static,
{
    let relay = Relay {
        inner,
        assembled: String::new(),
        on_complete: Some(on_complete),
    };

    stream::unfold(Some(relay), |relay| async move {
        let Some(mut relay) = relay else {
            return None;
        };
        match relay.inner.next().await {
            Some(Ok(fragment)) => {
                relay.assembled.push_str(&fragment);
                Some((SummaryEvent::Fragment(fragment), Some(relay)))
            }
            Some(Err(e)) => {
                warn!(error = %e, discarded = relay.assembled.len(), "Summary stream failed");
                Some((SummaryEvent::Failed(e.to_string()), None))
            }
            None if relay.assembled.is_empty() => {
                warn!("Summary stream ended without text");
                Some((SummaryEvent::Failed(NO_TEXT.to_string()), None))
            }
            None => {
                if let Some(on_complete) = relay.on_complete.take() {
                    on_complete(&relay.assembled);
                }
                Some((SummaryEvent::Complete { cached: false }, None))
            }
        }
    })
}

pub const TIMED_OUT: &str = "Request processing timed out";

/// Ends `events` with a failure once `deadline` passes. Whatever was pending
/// inside `events` is dropped, so nothing it would have committed is kept.
pub fn with_deadline<S>(events: S, deadline: Instant) -> impl Stream<Item = SummaryEvent> + Send
where
    S: Stream<Item = SummaryEvent> + Send + Unpin,
{
    stream::unfold(Some(events), move |events| async move {
        let Some(mut events) = events else {
            return None;
        };
        match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(event)) => Some((event, Some(events))),
            Ok(None) => None,
            Err(_) => {
                warn!("Summary stream timed out");
                Some((SummaryEvent::Failed(TIMED_OUT.to_string()), None))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn text_stream(items: Vec<Result<String>>) -> TextStream {
        Box::pin(stream::iter(items))
    }

    fn fragments(parts: &[&str]) -> TextStream {
        text_stream(parts.iter().map(|p| Ok(p.to_string())).collect())
    }

    fn create_test_cache() -> (ContentCache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = ContentCache::open(temp_dir.path().join("arxiv")).unwrap();
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn test_miss_computes_and_commits() {
        let (cache, _temp_dir) = create_test_cache();

        let summary =
            summarize_cached(Some(&cache), "paper", || async { Ok(fragments(&["# A", "\nbody"])) })
                .await
                .unwrap();

        assert_eq!(summary, Summary { text: "# A\nbody".into(), cached: false });
        assert_eq!(cache.get("paper").unwrap().as_deref(), Some("# A\nbody"));
    }

    #[tokio::test]
    async fn test_hit_skips_producer() {
        let (cache, _temp_dir) = create_test_cache();
        cache.put("paper", "stored").unwrap();
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let summary = summarize_cached(Some(&cache), "paper", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(fragments(&["fresh"]))
        })
        .await
        .unwrap();

        assert_eq!(summary, Summary { text: "stored".into(), cached: true });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_failure_commits_nothing() {
        let (cache, _temp_dir) = create_test_cache();

        let result = summarize_cached(Some(&cache), "paper", || async {
            Ok(text_stream(vec![Ok("partial".into()), Err(AppError::LlmError("cut off".into()))]))
        })
        .await;

        assert!(matches!(result, Err(AppError::LlmError(_))));
        assert!(cache.get("paper").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_recomputed() {
        let (cache, _temp_dir) = create_test_cache();
        std::fs::create_dir(cache.entry_path("paper")).unwrap();

        let summary =
            summarize_cached(Some(&cache), "paper", || async { Ok(fragments(&["fresh"])) })
                .await
                .expect("read and write failures must not reach the caller");

        assert_eq!(summary, Summary { text: "fresh".into(), cached: false });
    }

    #[tokio::test]
    async fn test_works_without_cache() {
        let summary = summarize_cached(None, "paper", || async { Ok(fragments(&["a", "b"])) })
            .await
            .unwrap();

        assert_eq!(summary.text, "ab");
        assert!(!summary.cached);
    }

    #[tokio::test]
    async fn test_empty_summary_is_an_error_and_not_cached() {
        let (cache, _temp_dir) = create_test_cache();

        let result = summarize_cached(Some(&cache), "paper", || async { Ok(fragments(&[])) }).await;

        assert!(matches!(result, Err(AppError::LlmError(ref msg)) if msg == NO_TEXT));
        assert!(cache.get("paper").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relay_forwards_fragments_then_commits() {
        let committed = Arc::new(Mutex::new(None));
        let sink = committed.clone();

        let relay = commit_on_complete(fragments(&["one ", "two"]), move |text| {
            *sink.lock().unwrap() = Some(text.to_string());
        });
        let events: Vec<SummaryEvent> = relay.collect().await;

        assert_eq!(
            events,
            vec![
                SummaryEvent::Fragment("one ".into()),
                SummaryEvent::Fragment("two".into()),
                SummaryEvent::Complete { cached: false },
            ]
        );
        assert_eq!(committed.lock().unwrap().as_deref(), Some("one two"));
    }

    #[tokio::test]
    async fn test_relay_discards_partial_text_on_failure() {
        let called = Arc::new(AtomicUsize::new(0));
        let counter = called.clone();
        let inner = text_stream(vec![
            Ok("partial".into()),
            Err(AppError::LlmError("boom".into())),
            Ok("never seen".into()),
        ]);

        let events: Vec<SummaryEvent> = commit_on_complete(inner, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SummaryEvent::Fragment("partial".into()));
        assert!(matches!(&events[1], SummaryEvent::Failed(msg) if msg.contains("boom")));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_relay_fails_when_stream_has_no_text() {
        let called = Arc::new(AtomicUsize::new(0));
        let counter = called.clone();

        let events: Vec<SummaryEvent> = commit_on_complete(fragments(&[]), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .collect()
        .await;

        assert_eq!(events, vec![SummaryEvent::Failed(NO_TEXT.to_string())]);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deadline_cuts_off_a_stalled_stream() {
        let called = Arc::new(AtomicUsize::new(0));
        let counter = called.clone();
        let stalled: TextStream = Box::pin(fragments(&["partial"]).chain(stream::pending()));
        let relay = commit_on_complete(stalled, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let deadline = Instant::now() + std::time::Duration::from_millis(50);

        let events: Vec<SummaryEvent> = with_deadline(relay.boxed(), deadline).collect().await;

        assert_eq!(
            events,
            vec![SummaryEvent::Fragment("partial".into()), SummaryEvent::Failed(TIMED_OUT.into())]
        );
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deadline_passes_finished_streams_through() {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);

        let events: Vec<SummaryEvent> =
            with_deadline(cached_events("stored".into()).boxed(), deadline).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1], SummaryEvent::Complete { cached: true });
    }

    #[tokio::test]
    async fn test_cached_events() {
        let events: Vec<SummaryEvent> = cached_events("stored".into()).collect().await;
        assert_eq!(
            events,
            vec![SummaryEvent::Fragment("stored".into()), SummaryEvent::Complete { cached: true }]
        );
    }

    #[test]
    fn test_caches_open_creates_namespaces() {
        let temp_dir = TempDir::new().unwrap();

        let caches = Caches::open(temp_dir.path());

        assert!(caches.youtube.is_some() && caches.arxiv.is_some() && caches.html.is_some());
        assert!(temp_dir.path().join("youtube").is_dir());
    }

    #[test]
    fn test_caches_open_disables_unavailable_namespace() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("arxiv"), "not a directory").unwrap();

        let caches = Caches::open(temp_dir.path());

        assert!(caches.arxiv.is_none());
        assert!(caches.youtube.is_some());
    }
}
