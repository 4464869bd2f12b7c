use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::BreakerSettings;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub call_timeout: Duration,
    /// Rolling window over which the error rate is evaluated.
    pub window: Duration,
    /// Minimum calls in the window before the breaker may open.
    pub min_calls: u32,
    pub failure_rate: f64,
    /// How long an open breaker waits before letting a trial call through.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
            window: Duration::from_secs(60),
            min_calls: 10,
            failure_rate: 0.5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            call_timeout: Duration::from_secs(settings.call_timeout_seconds),
            min_calls: settings.failure_threshold,
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit `{0}` is open")]
    Open(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Open and timeout failures are transient from the caller's viewpoint.
    pub fn is_fast_failure(&self) -> bool {
        matches!(self, CircuitError::Open(_) | CircuitError::Timeout(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    opened_at: Option<Instant>,
    outcomes: VecDeque<(Instant, bool)>,
}

/// A named breaker wrapping one class of outbound platform calls. Opens when
/// the windowed error rate crosses the threshold, fails fast while open, and
/// lets a single trial call through after the reset timeout.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                opened_at: None,
                outcomes: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call<F, T, E>(&self, fut: F) -> Result<T, CircuitError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        let result = match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CircuitError::Inner(e)),
            Err(_) => Err(CircuitError::Timeout(self.config.call_timeout)),
        };

        self.record(result.is_ok());
        result
    }

    fn admit<E>(&self) -> Result<(), CircuitError<E>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
                if expired {
                    inner.state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(CircuitError::Open(self.name.clone()))
                }
            }
        }
    }

    fn record(&self, ok: bool) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        inner.outcomes.push_back((now, ok));
        let window = self.config.window;
        while inner
            .outcomes
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            inner.outcomes.pop_front();
        }

        match inner.state {
            State::HalfOpen => {
                if ok {
                    inner.state = State::Closed;
                    inner.opened_at = None;
                    inner.outcomes.clear();
                } else {
                    inner.state = State::Open;
                    inner.opened_at = Some(now);
                    warn!(breaker = %self.name, "trial call failed, circuit re-opened");
                }
            }
            State::Closed => {
                let total = inner.outcomes.len() as u32;
                if total >= self.config.min_calls {
                    let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
                    let rate = failures as f64 / f64::from(total);
                    if rate >= self.config.failure_rate {
                        inner.state = State::Open;
                        inner.opened_at = Some(now);
                        warn!(
                            breaker = %self.name,
                            failures,
                            total,
                            "error rate over threshold, circuit opened"
                        );
                    }
                }
            }
            State::Open => {}
        }
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.inner.lock().unwrap().state == State::Open
    }
}

/// Registry handing out one breaker per name (one per platform here).
pub struct CircuitBreakers {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }
}
