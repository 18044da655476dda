use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime, Timelike};
use tokio::sync::watch;

/// Wall-clock source, in broker/session local time
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    async fn sleep(&self, duration: Duration);
}

/// Local system time with real sleeps
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test clock: time only moves through `set`, `advance` or `sleep`
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, time: NaiveDateTime) {
        *self.lock() = time;
    }

    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        let mut now = self.lock();
        *now += step;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    Cancelled,
}

/// Session timing: end-of-day cutoff and cancellable waits
#[derive(Clone)]
pub struct SessionClock {
    clock: Arc<dyn Clock>,
    end_time: NaiveTime,
    max_wait_slice: Duration,
}

impl SessionClock {
    pub fn new(clock: Arc<dyn Clock>, end_time: NaiveTime, max_wait_slice: Duration) -> Self {
        Self {
            clock,
            end_time,
            max_wait_slice,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn current_hour(&self) -> u32 {
        self.clock.now().hour()
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end_time
    }

    /// The configured end time of today has been reached
    pub fn is_over(&self) -> bool {
        self.clock.now().time() >= self.end_time
    }

    /// Sleep for `duration` unless shutdown is requested first
    ///
    /// Returns `false` when cancelled.
    pub async fn pause(&self, duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = cancelled(shutdown) => false,
            _ = self.clock.sleep(duration) => true,
        }
    }

    /// Wait until `target` in slices of at most `max_wait_slice`
    pub async fn wait_until(&self, target: NaiveDateTime, shutdown: &mut watch::Receiver<bool>) -> WaitOutcome {
        loop {
            let now = self.clock.now();
            if now >= target {
                return WaitOutcome::Reached;
            }

            let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(
                "⏳ Waiting {}min to start at {}",
                remaining.as_secs() / 60,
                target.format("%H:%M")
            );

            if !self.pause(remaining.min(self.max_wait_slice), shutdown).await {
                tracing::warn!("Wait for {} cancelled", target.format("%H:%M"));
                return WaitOutcome::Cancelled;
            }
        }
    }

    /// Wait until `hour:00` today; returns immediately once that hour has started
    pub async fn wait_until_hour(&self, hour: u32, shutdown: &mut watch::Receiver<bool>) -> WaitOutcome {
        let Some(target) = self.clock.now().date().and_hms_opt(hour, 0, 0) else {
            return WaitOutcome::Reached;
        };
        self.wait_until(target, shutdown).await
    }
}

/// Resolves once the shutdown flag is set; never resolves if the sender is gone
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn session(clock: &ManualClock) -> SessionClock {
        SessionClock::new(
            Arc::new(clock.clone()),
            NaiveTime::from_hms_opt(17, 54, 0).unwrap(),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(at(9, 0));
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), at(9, 1) + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_is_over() {
        let clock = ManualClock::new(at(17, 53));
        let session = session(&clock);
        assert!(!session.is_over());

        clock.set(at(17, 54));
        assert!(session.is_over());
    }

    #[tokio::test]
    async fn test_wait_until_hour_in_slices() {
        let clock = ManualClock::new(at(8, 40));
        let session = session(&clock);
        let (_tx, mut rx) = watch::channel(false);

        let outcome = session.wait_until_hour(9, &mut rx).await;

        assert_eq!(outcome, WaitOutcome::Reached);
        // 20 minutes = 4 slices of 5 minutes, never overshooting
        assert_eq!(clock.now(), at(9, 0));
    }

    #[tokio::test]
    async fn test_wait_for_started_hour_returns_immediately() {
        let clock = ManualClock::new(at(10, 15));
        let session = session(&clock);
        let (_tx, mut rx) = watch::channel(false);

        assert_eq!(session.wait_until_hour(9, &mut rx).await, WaitOutcome::Reached);
        assert_eq!(clock.now(), at(10, 15));
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let clock = ManualClock::new(at(6, 0));
        let session = session(&clock);
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        assert_eq!(session.wait_until_hour(9, &mut rx).await, WaitOutcome::Cancelled);
        assert_eq!(clock.now(), at(6, 0));
    }

    #[tokio::test]
    async fn test_pause_survives_dropped_sender() {
        let clock = ManualClock::new(at(9, 0));
        let session = session(&clock);
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        assert!(session.pause(Duration::from_secs(1), &mut rx).await);
    }
}
