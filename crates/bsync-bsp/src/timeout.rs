use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Sliding idle timeout.
///
/// [`IdleTimeout::reset`] restarts the window; [`IdleTimeout::elapsed`] resolves only once a full
/// window passes with no reset in between. Clones share the same window, so one task can reset it
/// while another waits on it.
#[derive(Debug, Clone)]
pub struct IdleTimeout {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    duration: Duration,
    window: watch::Sender<Window>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    generation: u64,
    deadline: Instant,
}

/// How a single window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    Elapsed,
    Reset,
}

impl IdleTimeout {
    /// Start a timeout whose first window opens now.
    pub fn new(duration: Duration) -> Self {
        let (window, _) = watch::channel(Window {
            generation: 0,
            deadline: Instant::now() + duration,
        });
        Self {
            inner: Arc::new(Inner { duration, window }),
        }
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    /// Cancel the current window and open a fresh one.
    pub fn reset(&self) {
        let duration = self.inner.duration;
        self.inner.window.send_modify(|window| {
            window.generation += 1;
            window.deadline = Instant::now() + duration;
        });
    }

    pub fn deadline(&self) -> Instant {
        self.inner.window.borrow().deadline
    }

    /// Resolves when the window open at call time ends, either by elapsing or by a reset.
    pub fn current_window(&self) -> impl std::future::Future<Output = WindowOutcome> + Send + 'static {
        let mut rx = self.inner.window.subscribe();
        let window = *rx.borrow_and_update();
        async move {
            tokio::select! {
                _ = tokio::time::sleep_until(window.deadline) => {
                    if rx.borrow().generation == window.generation {
                        WindowOutcome::Elapsed
                    } else {
                        WindowOutcome::Reset
                    }
                }
                _ = rx.changed() => WindowOutcome::Reset,
            }
        }
    }

    /// Resolves once some window elapses without being reset.
    pub async fn elapsed(&self) {
        loop {
            if self.current_window().await == WindowOutcome::Elapsed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn silent_window_elapses() {
        let timeout = IdleTimeout::new(Duration::from_secs(5));
        let start = Instant::now();
        timeout.elapsed().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_the_current_window() {
        let timeout = IdleTimeout::new(Duration::from_secs(5));
        let window = timeout.current_window();
        tokio::time::sleep(Duration::from_secs(3)).await;
        timeout.reset();
        assert_eq!(window.await, WindowOutcome::Reset);
    }

    #[tokio::test(start_paused = true)]
    async fn resets_slide_the_deadline() {
        let timeout = IdleTimeout::new(Duration::from_secs(5));
        let resetter = timeout.clone();
        let start = Instant::now();
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(4)).await;
                resetter.reset();
            }
        });
        timeout.elapsed().await;
        // Last reset at 12s, then a full silent window.
        assert_eq!(start.elapsed(), Duration::from_secs(17));
    }
}
