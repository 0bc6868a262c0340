//! Position tracker - owns the location watch and forwards filtered fixes
//!
//! A watch is a spawned task reading a `PositionSource`. Fixes pass a
//! `FixFilter` before they reach the sink; errors are forwarded as-is.
//! `Timeout` keeps the watch alive, `PermissionDenied` and `Unavailable` end it.
//! There is no automatic retry: the host restarts the watch on request.

use crate::domain::error::PositionError;
use crate::domain::session::epoch_ms;
use crate::domain::types::PositionFix;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a position source yields
pub type SourceItem = Result<PositionFix, PositionError>;

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Fixes older than this (by their own timestamp) are dropped
    pub max_age: Duration,
    /// Longest wait for the next fix before reporting `Timeout`
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            max_age: Duration::from_secs(2),
            timeout: Duration::from_secs(15),
        }
    }
}

/// A stream of fixes. `None` means the source is gone.
#[async_trait]
pub trait PositionSource: Send {
    fn configure(&mut self, _options: &WatchOptions) {}

    async fn next_fix(&mut self) -> Option<SourceItem>;
}

#[async_trait]
impl PositionSource for mpsc::Receiver<SourceItem> {
    async fn next_fix(&mut self) -> Option<SourceItem> {
        self.recv().await
    }
}

#[async_trait]
impl PositionSource for broadcast::Receiver<SourceItem> {
    async fn next_fix(&mut self) -> Option<SourceItem> {
        loop {
            match self.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = %n, "position_source_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
impl PositionSource for Box<dyn PositionSource> {
    fn configure(&mut self, options: &WatchOptions) {
        (**self).configure(options)
    }

    async fn next_fix(&mut self) -> Option<SourceItem> {
        (**self).next_fix().await
    }
}

/// Opens a fresh source for each watch (initial start and every refresh)
pub trait PositionProvider: Send + Sync {
    fn open(&self) -> Box<dyn PositionSource>;
}

impl PositionProvider for broadcast::Sender<SourceItem> {
    fn open(&self) -> Box<dyn PositionSource> {
        Box::new(self.subscribe())
    }
}

/// What the watch delivers to its sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionUpdate {
    Fix(PositionFix),
    Error(PositionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixVerdict {
    Accepted,
    /// Older than or identical to the last delivered fix
    Stale,
    /// Older than `max_age`
    TooOld,
    /// Coordinates outside WGS84 range
    Invalid,
}

impl FixVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixVerdict::Accepted => "accepted",
            FixVerdict::Stale => "stale",
            FixVerdict::TooOld => "too_old",
            FixVerdict::Invalid => "invalid",
        }
    }
}

/// Drops fixes that are out of order, duplicated or too old
#[derive(Debug)]
pub struct FixFilter {
    last: Option<PositionFix>,
    max_age_ms: u64,
}

impl FixFilter {
    pub fn new(max_age: Duration) -> Self {
        Self { last: None, max_age_ms: max_age.as_millis() as u64 }
    }

    pub fn check(&mut self, fix: PositionFix, now_ms: u64) -> FixVerdict {
        if !fix.coord.is_valid() {
            return FixVerdict::Invalid;
        }
        if let Some(last) = self.last {
            if fix.ts <= last.ts {
                return FixVerdict::Stale;
            }
        }
        if now_ms.saturating_sub(fix.ts) > self.max_age_ms {
            return FixVerdict::TooOld;
        }
        self.last = Some(fix);
        FixVerdict::Accepted
    }

    pub fn last(&self) -> Option<&PositionFix> {
        self.last.as_ref()
    }
}

/// Handle to a running watch. Stopping consumes the handle; dropping it
/// also stops the watch.
pub struct WatchHandle {
    id: u64,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stop(mut self) {
        self.release();
    }

    /// True once the watch ended on its own (terminal error or source gone)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
            debug!(watch_id = %self.id, "position_watch_stopped");
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct PositionTracker;

impl PositionTracker {
    /// Spawn a watch over `source`, delivering updates to `sink`
    pub fn start<S, T>(mut source: S, options: WatchOptions, sink: mpsc::Sender<T>, metrics: Arc<Metrics>) -> WatchHandle
    where
        S: PositionSource + 'static,
        T: From<PositionUpdate> + Send + 'static,
    {
        let id = NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        source.configure(&options);
        info!(
            watch_id = %id,
            high_accuracy = %options.high_accuracy,
            max_age_ms = %options.max_age.as_millis(),
            timeout_ms = %options.timeout.as_millis(),
            "position_watch_started"
        );

        let task = tokio::spawn(async move {
            let mut filter = FixFilter::new(options.max_age);

            loop {
                let update = tokio::select! {
                    _ = &mut cancel_rx => break,
                    next = tokio::time::timeout(options.timeout, source.next_fix()) => match next {
                        Err(_) => PositionUpdate::Error(PositionError::Timeout),
                        Ok(None) => PositionUpdate::Error(PositionError::Unavailable),
                        Ok(Some(Err(e))) => PositionUpdate::Error(e),
                        Ok(Some(Ok(fix))) => {
                            metrics.record_fix_received();
                            match filter.check(fix, epoch_ms()) {
                                FixVerdict::Accepted => PositionUpdate::Fix(fix),
                                verdict => {
                                    metrics.record_fix_filtered();
                                    debug!(watch_id = %id, verdict = %verdict.as_str(), ts = %fix.ts, "position_fix_filtered");
                                    continue;
                                }
                            }
                        }
                    },
                };

                let terminal = match update {
                    PositionUpdate::Error(e) => {
                        warn!(watch_id = %id, error = %e.as_str(), "position_error");
                        e.is_terminal()
                    }
                    PositionUpdate::Fix(_) => false,
                };

                if sink.send(T::from(update)).await.is_err() {
                    debug!(watch_id = %id, "position_sink_closed");
                    break;
                }
                if terminal {
                    info!(watch_id = %id, "position_watch_ended");
                    break;
                }
            }
        });

        WatchHandle { id, cancel: Some(cancel_tx), task }
    }
}
