//! Progress reporting for conversions and pagination.
//!
//! Work reports through a [`ProgressReporter`]; the reporter forwards
//! [`ProgressEvent`]s to an injected [`ProgressSink`]. The sink is whatever
//! the host application uses to show progress (a terminal bar, a channel
//! feeding a WebSocket, a test recorder). The core never knows which.
//!
//! The reporter, not the sink, owns the two guarantees callers rely on:
//!
//! * percentages are clamped to `[0, 100]` and never go backwards within
//!   one run, even when a stage reports out of order;
//! * [`ProgressReporter::finish`] emits exactly 100.
//!
//! Stages of a longer pipeline get a [`ProgressReporter::scoped`] child that
//! maps its own `0..=100` onto a slice of the parent's range, so a stage can
//! be written as if it ran alone.
//!
//! # Example
//!
//! ```rust
//! use docshift::progress::{ProgressEvent, ProgressReporter};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = {
//!     let seen = Arc::clone(&seen);
//!     move |e: &ProgressEvent| seen.lock().unwrap().push(e.percent)
//! };
//! let reporter = ProgressReporter::new(Arc::new(sink));
//! let stage = reporter.scoped(0.0, 50.0);
//! stage.report(50.0, "half of the first half");
//! reporter.finish("done");
//! assert_eq!(*seen.lock().unwrap(), vec![25.0, 100.0]);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Overall completion, `0.0..=100.0`, nondecreasing within one run.
    pub percent: f32,
    /// Human-readable status, e.g. `"Laying out page 3"`.
    pub label: String,
}

/// Receives progress events.
///
/// Implementations must be `Send + Sync`: dispatcher jobs run on the Tokio
/// pool and may report from any worker thread.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event. Used when the caller passes none.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Sink that forwards events into an unbounded Tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: &ProgressEvent) {
        // A closed receiver means the UI stopped listening; progress is advisory.
        let _ = self.tx.send(event.clone());
    }
}

/// Create a channel sink and the ordered event stream it feeds.
pub fn progress_channel() -> (ChannelSink, UnboundedReceiverStream<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, UnboundedReceiverStream::new(rx))
}

struct Shared {
    sink: Arc<dyn ProgressSink>,
    last: Mutex<f32>,
}

/// Monotonic, range-mapping front end to a [`ProgressSink`].
///
/// Cloning (or [`scoped`](Self::scoped)) shares the high-water mark, so
/// every reporter derived from one root obeys the same monotonic order.
#[derive(Clone)]
pub struct ProgressReporter {
    shared: Arc<Shared>,
    start: f32,
    end: f32,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                last: Mutex::new(0.0),
            }),
            start: 0.0,
            end: 100.0,
        }
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopProgress))
    }

    /// Child reporter whose `0..=100` covers `from..=to` of this one.
    pub fn scoped(&self, from: f32, to: f32) -> Self {
        let from = from.clamp(0.0, 100.0);
        let to = to.clamp(from, 100.0);
        Self {
            shared: Arc::clone(&self.shared),
            start: self.map(from),
            end: self.map(to),
        }
    }

    /// Report `percent` (of this reporter's range) with a status label.
    pub fn report(&self, percent: f32, label: impl Into<String>) {
        let target = self.map(percent);
        let mut last = self
            .shared
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let percent = target.max(*last);
        *last = percent;
        let event = ProgressEvent {
            percent,
            label: label.into(),
        };
        // Emit under the lock so concurrent reporters cannot reorder events.
        self.shared.sink.on_progress(&event);
    }

    /// Report the end of this reporter's range (100 for a root reporter).
    pub fn finish(&self, label: impl Into<String>) {
        self.report(100.0, label);
    }

    /// Highest percentage emitted so far across the whole run.
    pub fn last_percent(&self) -> f32 {
        *self
            .shared
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn map(&self, percent: f32) -> f32 {
        let p = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        let mapped = self.start + (self.end - self.start) * p / 100.0;
        // Exact endpoints: f32 rounding must not turn 100 into 99.99999.
        if p >= 100.0 {
            self.end
        } else {
            mapped
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, ProgressReporter) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |e: &ProgressEvent| seen.lock().unwrap().push(e.clone())
        };
        (seen, ProgressReporter::new(Arc::new(sink)))
    }

    #[test]
    fn never_goes_backwards() {
        let (seen, reporter) = recorder();
        reporter.report(40.0, "a");
        reporter.report(20.0, "b");
        reporter.report(60.0, "c");
        let percents: Vec<f32> = seen.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![40.0, 40.0, 60.0]);
        assert_eq!(seen.lock().unwrap()[1].label, "b");
    }

    #[test]
    fn clamps_out_of_range_values() {
        let (seen, reporter) = recorder();
        reporter.report(-5.0, "low");
        reporter.report(f32::NAN, "nan");
        reporter.report(250.0, "high");
        let percents: Vec<f32> = seen.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0.0, 0.0, 100.0]);
    }

    #[test]
    fn scoped_maps_into_parent_range() {
        let (seen, reporter) = recorder();
        let stage = reporter.scoped(10.0, 90.0);
        stage.report(0.0, "start");
        stage.report(50.0, "mid");
        stage.finish("stage done");
        let inner = stage.scoped(50.0, 100.0);
        inner.report(50.0, "inner");
        reporter.finish("done");
        let percents: Vec<f32> = seen.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10.0, 50.0, 90.0, 90.0, 100.0]);
    }

    #[test]
    fn clones_share_the_high_water_mark() {
        let (_seen, reporter) = recorder();
        let other = reporter.clone();
        other.report(70.0, "x");
        assert_eq!(reporter.last_percent(), 70.0);
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut stream) = progress_channel();
        let reporter = ProgressReporter::new(Arc::new(sink));
        reporter.report(10.0, "one");
        reporter.finish("two");
        drop(reporter);
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.label, "one");
        assert_eq!(second.percent, 100.0);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn noop_reporter_does_not_panic() {
        let reporter = ProgressReporter::noop();
        reporter.report(10.0, "x");
        reporter.finish("y");
        assert_eq!(reporter.last_percent(), 100.0);
    }
}
