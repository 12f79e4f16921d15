use crate::control::ControlFlags;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied,
    TimedOut,
    Cancelled,
}

/// Tick source for a bounded wait. `tick` sleeps one interval and reports
/// whether the window is still open. A timeout too large to represent as an
/// instant never expires.
#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    pub async fn tick(&self) -> bool {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return false;
        }
        tokio::time::sleep(self.interval.min(remaining)).await;
        true
    }
}

/// Re-evaluate `predicate` every `interval` until it holds, `timeout` elapses or
/// the cancel flag is raised. The predicate runs once before the first sleep.
pub async fn poll_until<F, Fut>(
    mut predicate: F,
    interval: Duration,
    timeout: Duration,
    flags: &ControlFlags,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poller = Poller::new(interval, timeout);
    loop {
        if flags.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if predicate().await {
            return PollOutcome::Satisfied;
        }
        if !poller.tick().await {
            return PollOutcome::TimedOut;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn satisfied_after_a_few_ticks() {
        let flags = ControlFlags::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = poll_until(
            || {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(4),
            Duration::from_secs(60),
            &flags,
        )
        .await;
        assert_eq!(outcome, PollOutcome::Satisfied);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_on_the_deadline() {
        let flags = ControlFlags::default();
        let started = Instant::now();
        let outcome = poll_until(
            || async { false },
            Duration::from_secs(4),
            Duration::from_secs(300),
            &flags,
        )
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(300) && elapsed < Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_keeps_ticking() {
        let poller = Poller::new(Duration::from_secs(5), Duration::MAX);
        assert!(!poller.expired());
        assert_eq!(poller.remaining(), Duration::MAX);
        let started = Instant::now();
        assert!(poller.tick().await);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_the_wait() {
        let flags = ControlFlags::default();
        flags.cancel();
        let outcome = poll_until(
            || async { true },
            Duration::from_secs(1),
            Duration::from_secs(10),
            &flags,
        )
        .await;
        assert_eq!(outcome, PollOutcome::Cancelled);
    }
}
