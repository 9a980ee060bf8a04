//! Debounced search input and search text tokenizing

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

lazy_static! {
    // A quoted phrase; the closing quote may still be missing while typing
    static ref QUOTED_PHRASE: Regex = Regex::new(r#""[^"]+"?"#).unwrap();
}

/// Wait for a value, then for a quiet period without newer values.
///
/// Every value received restarts the quiet period. Returns the latest value,
/// or `None` once the channel is closed with nothing pending.
pub async fn debounce<T>(rx: &mut mpsc::UnboundedReceiver<T>, quiet: Duration) -> Option<T> {
    let mut latest = rx.recv().await?;
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(value) => latest = value,
                None => return Some(latest),
            },
            _ = sleep(quiet) => return Some(latest),
        }
    }
}

/// Trailing debounce over raw search text.
///
/// Every settled value is handed to the callback; deciding whether it
/// changes the search is up to the receiver.
pub struct SearchDebouncer {
    sender: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl SearchDebouncer {
    pub fn spawn<F>(quiet: Duration, token: CancellationToken, mut on_settled: F) -> Self
    where
        F: FnMut(String) + Send + 'static,
    {
        let (sender, mut rx) = mpsc::unbounded_channel::<String>();
        let task = tokio::spawn(async move {
            loop {
                let settled = tokio::select! {
                    _ = token.cancelled() => break,
                    settled = debounce(&mut rx, quiet) => settled,
                };
                let Some(text) = settled else { break };
                tracing::debug!(%text, "search settled");
                on_settled(text);
            }
        });
        Self { sender, task }
    }

    /// Record one edit of the search field.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.sender.send(text.into());
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Split search text into the components a query must all match.
///
/// Curly quotes count as straight quotes; quoted phrases stay whole.
pub fn search_components(text: &str) -> Vec<String> {
    let normalized = text.replace(['\u{201C}', '\u{201D}'], "\"");
    let mut components = Vec::new();
    let mut cursor = 0;

    for phrase in QUOTED_PHRASE.find_iter(&normalized) {
        components.extend(split_words(&normalized[cursor..phrase.start()]));
        let inner = phrase.as_str().trim_start_matches('"');
        let inner = inner.strip_suffix('"').unwrap_or(inner);
        if !inner.is_empty() {
            components.push(inner.to_string());
        }
        cursor = phrase.end();
    }
    components.extend(split_words(&normalized[cursor..]));
    components
}

fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(' ').filter(|w| !w.is_empty()).map(str::to_string)
}
