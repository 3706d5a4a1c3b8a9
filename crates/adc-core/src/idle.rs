use crate::ConfigError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    PointerMove,
    PointerClick,
    KeyDown,
    Scroll,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::PointerMove => "pointer-move",
            ActivityKind::PointerClick => "pointer-click",
            ActivityKind::KeyDown => "key-down",
            ActivityKind::Scroll => "scroll",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub at: Instant,
}

impl ActivityEvent {
    pub fn now(kind: ActivityKind) -> Self {
        Self {
            kind,
            at: Instant::now(),
        }
    }
}

pub fn timeout_from_minutes(timeout_minutes: f64) -> Result<Duration, ConfigError> {
    if !timeout_minutes.is_finite() || timeout_minutes <= 0.0 {
        return Err(ConfigError::InvalidIdleTimeout(timeout_minutes));
    }
    Duration::try_from_secs_f64(timeout_minutes * 60.0)
        .map_err(|_| ConfigError::InvalidIdleTimeout(timeout_minutes))
}

/// Debounced inactivity countdown.
///
/// Every [`ActivityEvent`] restarts the countdown at the full timeout measured
/// from the event's arrival time. When the countdown expires the callback runs
/// once and the monitor stops; it never re-arms by itself. [`IdleMonitor::stop`]
/// (or dropping the monitor) guarantees the callback can no longer start.
///
/// Must be started from within a tokio runtime.
pub struct IdleMonitor {
    activity_tx: Option<mpsc::UnboundedSender<ActivityEvent>>,
    armed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl IdleMonitor {
    pub fn start<F>(on_timeout: F, timeout_minutes: f64) -> Result<Self, ConfigError>
    where
        F: FnOnce() + Send + 'static,
    {
        let timeout = timeout_from_minutes(timeout_minutes)?;
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        let armed = Arc::new(AtomicBool::new(true));
        let deadline = Instant::now() + timeout;
        let task = tokio::spawn(run_countdown(
            activity_rx,
            deadline,
            timeout,
            armed.clone(),
            on_timeout,
        ));
        info!(
            event = "idle_monitor_started",
            timeout_secs = timeout.as_secs()
        );
        Ok(Self {
            activity_tx: Some(activity_tx),
            armed,
            task: Some(task),
            timeout,
        })
    }

    /// Feeds one activity event. Returns false once the monitor has fired or stopped.
    pub fn notify(&self, event: ActivityEvent) -> bool {
        if !self.is_running() {
            return false;
        }
        match &self.activity_tx {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn stop(&mut self) {
        let was_armed = self.armed.swap(false, Ordering::AcqRel);
        self.activity_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if was_armed {
            debug!(event = "idle_monitor_stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_countdown<F>(
    mut activity_rx: mpsc::UnboundedReceiver<ActivityEvent>,
    mut deadline: Instant,
    timeout: Duration,
    armed: Arc<AtomicBool>,
    on_timeout: F,
) where
    F: FnOnce(),
{
    loop {
        tokio::select! {
            biased;
            maybe_event = activity_rx.recv() => {
                let Some(event) = maybe_event else {
                    return;
                };
                if event.at >= deadline {
                    break;
                }
                deadline = event.at + timeout;
            }
            _ = tokio::time::sleep_until(deadline) => {
                break;
            }
        }
    }

    if armed.swap(false, Ordering::AcqRel) {
        info!(event = "idle_timeout", timeout_secs = timeout.as_secs());
        on_timeout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const MINUTE: Duration = Duration::from_secs(60);

    fn counting_monitor(minutes: f64) -> (IdleMonitor, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let monitor = IdleMonitor::start(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            minutes,
        )
        .expect("valid timeout");
        (monitor, fired)
    }

    async fn advance(by: Duration) {
        tokio::time::advance(by).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn non_positive_timeouts_fail_fast() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                timeout_from_minutes(bad),
                Err(ConfigError::InvalidIdleTimeout(_))
            ));
        }
        assert_eq!(timeout_from_minutes(15.0).unwrap(), 15 * MINUTE);
        assert_eq!(timeout_from_minutes(0.5).unwrap(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_zero_timeout() {
        let result = IdleMonitor::start(|| {}, 0.0);
        assert!(matches!(result, Err(ConfigError::InvalidIdleTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_spaced_under_timeout_never_fires() {
        let (monitor, fired) = counting_monitor(15.0);
        let kinds = [
            ActivityKind::PointerMove,
            ActivityKind::KeyDown,
            ActivityKind::Scroll,
            ActivityKind::PointerClick,
        ];

        for round in 0..12 {
            advance(15 * MINUTE - Duration::from_secs(1)).await;
            assert!(monitor.notify(ActivityEvent::now(kinds[round % kinds.len()])));
            tokio::task::yield_now().await;
        }

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_fires_exactly_once_then_stops() {
        let (mut monitor, fired) = counting_monitor(15.0);

        advance(15 * MINUTE + Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_running());

        assert!(!monitor.notify(ActivityEvent::now(ActivityKind::KeyDown)));
        advance(60 * MINUTE).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        monitor.stop();
        advance(60 * MINUTE).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_restarts_the_full_countdown() {
        let (monitor, fired) = counting_monitor(1.0);

        advance(Duration::from_secs(50)).await;
        monitor.notify(ActivityEvent::now(ActivityKind::PointerMove));
        tokio::task::yield_now().await;

        advance(Duration::from_secs(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_just_before_expiry_prevents_firing() {
        let (mut monitor, fired) = counting_monitor(15.0);

        advance(15 * MINUTE - Duration::from_millis(1)).await;
        monitor.stop();
        advance(60 * MINUTE).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!monitor.is_running());
        assert!(!monitor.notify(ActivityEvent::now(ActivityKind::Scroll)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_monitor_detaches_it() {
        let (monitor, fired) = counting_monitor(1.0);
        drop(monitor);
        advance(10 * MINUTE).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
