//! Rate limiting for reporters.
//!
//! [`Cooldown`] forwards the first notification for a status id and then
//! drops further non-terminal notifications for that id until the interval
//! has elapsed. Terminal transitions are always forwarded immediately and
//! clear the entry, so the final state of every status reaches the inner
//! reporter.
//!
//! ```text
//! t=0ms    started      ──▶ forwarded
//! t=100ms  in_progress  ──▶ dropped
//! t=400ms  in_progress  ──▶ dropped
//! t=1000ms in_progress  ──▶ forwarded
//! t=1100ms completed    ──▶ forwarded (terminal)
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use index_harness_core::TaskStatus;

use crate::reporter::Reporter;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

pub struct Cooldown<R> {
    inner: R,
    interval: Duration,
    last_emit: Mutex<HashMap<String, Instant>>,
}

impl<R: Reporter> Cooldown<R> {
    pub fn new(inner: R, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_emit: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_interval(inner: R) -> Self {
        Self::new(inner, DEFAULT_COOLDOWN)
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn should_forward(&self, status: &TaskStatus) -> bool {
        let mut last = self
            .last_emit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if status.is_terminal() {
            last.remove(&status.id);
            return true;
        }
        let now = Instant::now();
        match last.get(&status.id) {
            Some(prev) if now.duration_since(*prev) < self.interval => false,
            _ => {
                last.insert(status.id.clone(), now);
                true
            }
        }
    }
}

#[async_trait]
impl<R: Reporter> Reporter for Cooldown<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn notify(&self, status: &TaskStatus) -> Result<()> {
        if self.should_forward(status) {
            self.inner.notify(status).await
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index_harness_core::{Operation, ReportingState, Trackable};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(String, ReportingState)>>>);

    impl Recorder {
        fn states(&self) -> Vec<ReportingState> {
            self.0.lock().unwrap().iter().map(|(_, s)| *s).collect()
        }
    }

    #[async_trait]
    impl Reporter for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn notify(&self, status: &TaskStatus) -> Result<()> {
            self.0.lock().unwrap().push((status.id.clone(), status.state));
            Ok(())
        }
    }

    fn status() -> TaskStatus {
        TaskStatus::started(Operation::CommitScan, Trackable::commit("abc"), None)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_notifications_coalesce_and_terminal_flushes() {
        let recorder = Recorder::default();
        let cooldown = Cooldown::with_default_interval(recorder.clone());
        let mut s = status();
        s.set_total(100).unwrap();
        for i in 0..50 {
            s.set_current(i, "working").unwrap();
            cooldown.notify(&s).await.unwrap();
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        s.complete().unwrap();
        cooldown.notify(&s).await.unwrap();

        assert_eq!(
            recorder.states(),
            vec![ReportingState::InProgress, ReportingState::Completed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_again_after_interval() {
        let recorder = Recorder::default();
        let cooldown = Cooldown::new(recorder.clone(), Duration::from_millis(500));
        let mut s = status();
        cooldown.notify(&s).await.unwrap();
        s.set_current(1, "").unwrap();
        cooldown.notify(&s).await.unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        cooldown.notify(&s).await.unwrap();
        assert_eq!(
            recorder.states(),
            vec![ReportingState::Started, ReportingState::InProgress]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ids_are_limited_independently() {
        let recorder = Recorder::default();
        let cooldown = Cooldown::with_default_interval(recorder.clone());
        let a = status();
        let b = status();
        cooldown.notify(&a).await.unwrap();
        cooldown.notify(&b).await.unwrap();
        cooldown.notify(&a).await.unwrap();
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_clears_entry() {
        let cooldown = Cooldown::with_default_interval(Recorder::default());
        let mut s = status();
        cooldown.notify(&s).await.unwrap();
        s.fail("x").unwrap();
        cooldown.notify(&s).await.unwrap();
        assert!(cooldown.last_emit.lock().unwrap().is_empty());
    }
}
