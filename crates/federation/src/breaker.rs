use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-wide circuit breaker guarding cold-tier calls. Failures are
/// kept in a rolling window; crossing the threshold opens the circuit for
/// a cooldown, during which federated reads degrade to hot-only.
pub struct CircuitBreaker {
    state: Mutex<State>,
    threshold: usize,
    window: Duration,
    cooldown: Duration,
}

#[derive(Default)]
struct State {
    failures: VecDeque<Instant>,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: usize, window: Duration, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            threshold,
            window,
            cooldown,
        }
    }

    /// Whether a cold-tier call may proceed right now.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.failures.clear();
        state.open_until = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match state.open_until {
            Some(open_until) if now < open_until => false,
            Some(_) => {
                // Cooldown elapsed; close and start a fresh window.
                state.open_until = None;
                state.failures.clear();
                true
            }
            None => true,
        }
    }

    fn record_failure_at(&self, now: Instant) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.failures.push_back(now);
        let window = self.window;
        while let Some(first) = state.failures.front() {
            if now.duration_since(*first) > window {
                state.failures.pop_front();
            } else {
                break;
            }
        }
        if state.failures.len() >= self.threshold {
            state.open_until = Some(now + self.cooldown);
            tracing::warn!(
                failures = state.failures.len(),
                cooldown_ms = self.cooldown.as_millis() as u64,
                "cold tier circuit opened"
            );
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60), Duration::from_secs(30))
    }
}
