//! Incremental transcript rendering
//!
//! Finalized transcript lines are revealed character by character into a
//! viewport, newest line scrolled into view after every reveal. Each line
//! owns an independent timer task; lines start rendering in append order
//! but may finish out of order when lengths differ, which is fine because
//! every line renders into its own slot.
//!
//! All in-flight reveals are cancellable so call teardown never races
//! timers against a cleared transcript.

use crate::protocol::{Direction, TranscriptLine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Reveal cadence: one character per tick.
pub const DEFAULT_CHAR_INTERVAL: Duration = Duration::from_millis(35);

/// Fixed word-substitution pairs applied before a line is typed out.
///
/// The speech vendor tends to split or mangle proper nouns; each pair
/// replaces the first occurrence of its left side, case-sensitively.
pub const WORD_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("Pen Deryn", "Penderyn"),
    ("Pen deryn", "Penderyn"),
    ("Pendryn", "Penderyn"),
];

/// Where revealed characters land.
pub trait Viewport: Send + Sync {
    /// Open a new empty line and return its slot index.
    fn push_line(&self, direction: Direction) -> usize;
    fn append_char(&self, line: usize, ch: char);
    fn scroll_to_bottom(&self);
    /// Drop all rendered lines.
    fn clear(&self);
}

/// A fully or partially revealed line in the viewport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub direction: Direction,
    pub text: String,
}

/// In-memory viewport, used by tests and as the render model for hosts.
#[derive(Default)]
pub struct TranscriptView {
    lines: Mutex<Vec<RenderedLine>>,
    scrolls: AtomicUsize,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<RenderedLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn scroll_count(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }
}

impl Viewport for TranscriptView {
    fn push_line(&self, direction: Direction) -> usize {
        let Ok(mut lines) = self.lines.lock() else {
            return 0;
        };
        lines.push(RenderedLine {
            direction,
            text: String::new(),
        });
        lines.len() - 1
    }

    fn append_char(&self, line: usize, ch: char) {
        if let Ok(mut lines) = self.lines.lock()
            && let Some(rendered) = lines.get_mut(line)
        {
            rendered.text.push(ch);
        }
    }

    fn scroll_to_bottom(&self) {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

pub struct TranscriptTypewriter {
    viewport: Arc<dyn Viewport>,
    substitutions: Vec<(String, String)>,
    interval: Duration,
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TranscriptTypewriter {
    pub fn new(viewport: Arc<dyn Viewport>) -> Self {
        let substitutions = WORD_SUBSTITUTIONS
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self {
            viewport,
            substitutions,
            interval: DEFAULT_CHAR_INTERVAL,
            cancel: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_substitutions(mut self, pairs: Vec<(String, String)>) -> Self {
        self.substitutions = pairs;
        self
    }

    /// First occurrence of each configured pair, case-sensitive.
    fn apply_substitutions(&self, content: &str) -> String {
        let mut out = content.to_string();
        for (from, to) in &self.substitutions {
            out = out.replacen(from.as_str(), to, 1);
        }
        out
    }

    /// Begin revealing a newly appended line.
    ///
    /// Slot allocation happens synchronously, so render start order is
    /// exactly append order even when reveals overlap.
    pub fn line_appended(&self, line: &TranscriptLine) {
        let content = self.apply_substitutions(&line.content);
        let slot = self.viewport.push_line(line.direction);
        self.viewport.scroll_to_bottom();

        let token = self
            .cancel
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default();
        let viewport = Arc::clone(&self.viewport);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            for ch in content.chars() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                viewport.append_char(slot, ch);
                viewport.scroll_to_bottom();
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }

    /// Stop every in-flight reveal and clear the viewport.
    ///
    /// The typewriter stays usable for the next call.
    pub fn cancel_all(&self) {
        if let Ok(mut cancel) = self.cancel.lock() {
            cancel.cancel();
            *cancel = CancellationToken::new();
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.viewport.clear();
    }

    /// Wait for all in-flight reveals to finish.
    pub async fn wait_idle(&self) {
        let pending: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return,
        };
        for task in pending {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Direction;

    fn fast_typewriter(view: &Arc<TranscriptView>) -> TranscriptTypewriter {
        TranscriptTypewriter::new(Arc::clone(view) as Arc<dyn Viewport>)
            .with_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_substitution_applied_before_typing() {
        let view = Arc::new(TranscriptView::new());
        let tw = fast_typewriter(&view);

        tw.line_appended(&TranscriptLine::new(
            "Welcome to Pen Deryn distillery",
            Direction::Received,
        ));
        tw.wait_idle().await;

        let lines = view.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Welcome to Penderyn distillery");
        assert!(!lines[0].text.contains("Pen Deryn"));
    }

    #[tokio::test]
    async fn test_render_start_order_is_append_order() {
        let view = Arc::new(TranscriptView::new());
        let tw = fast_typewriter(&view);

        tw.line_appended(&TranscriptLine::new("first, a long line", Direction::Received));
        tw.line_appended(&TranscriptLine::new("second", Direction::Sent));
        tw.line_appended(&TranscriptLine::new("third", Direction::Received));

        // Slots exist immediately and in order, before reveals complete.
        let lines = view.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].direction, Direction::Sent);

        tw.wait_idle().await;
        let lines = view.lines();
        assert_eq!(lines[0].text, "first, a long line");
        assert_eq!(lines[1].text, "second");
        assert_eq!(lines[2].text, "third");
    }

    #[tokio::test]
    async fn test_scrolls_follow_reveals() {
        let view = Arc::new(TranscriptView::new());
        let tw = fast_typewriter(&view);

        tw.line_appended(&TranscriptLine::new("hey", Direction::Sent));
        tw.wait_idle().await;

        // One scroll per revealed character plus one on line creation.
        assert_eq!(view.scroll_count(), 4);
    }

    #[tokio::test]
    async fn test_cancel_all_stops_inflight_reveals() {
        let view = Arc::new(TranscriptView::new());
        let tw = TranscriptTypewriter::new(Arc::clone(&view) as Arc<dyn Viewport>)
            .with_interval(Duration::from_millis(50));

        tw.line_appended(&TranscriptLine::new(
            "a line that would take seconds to finish typing out",
            Direction::Received,
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tw.cancel_all();

        assert!(view.lines().is_empty());

        // Nothing keeps typing into the cleared viewport.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(view.lines().is_empty());
    }

    #[tokio::test]
    async fn test_typewriter_reusable_after_cancel() {
        let view = Arc::new(TranscriptView::new());
        let tw = fast_typewriter(&view);

        tw.line_appended(&TranscriptLine::new("old call", Direction::Received));
        tw.cancel_all();

        tw.line_appended(&TranscriptLine::new("new call", Direction::Received));
        tw.wait_idle().await;

        let lines = view.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "new call");
    }
}
