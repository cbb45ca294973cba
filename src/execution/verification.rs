//! Verification routines - the independent check racing the pipeline components

use crate::core::{HarnessError, LineBus, SubscriptionId};
use async_trait::async_trait;
use regex::Regex;
use std::borrow::Cow;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// A check run concurrently with the pipeline
///
/// Returning `Ok` means verified; any error fails the run with that reason.
#[async_trait]
pub trait Verification: Send + Sync {
    async fn verify(&self) -> Result<(), HarnessError>;
}

/// Verification that never completes, leaving the outcome to the components
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverVerifies;

#[async_trait]
impl Verification for NeverVerifies {
    async fn verify(&self) -> Result<(), HarnessError> {
        std::future::pending().await
    }
}

/// Adapter turning an async closure into a `Verification`
pub struct FnVerification<F>(F);

/// Wrap `routine` as a verification
pub fn verify_fn<F, Fut>(routine: F) -> FnVerification<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HarnessError>> + Send,
{
    FnVerification(routine)
}

#[async_trait]
impl<F, Fut> Verification for FnVerification<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HarnessError>> + Send,
{
    async fn verify(&self) -> Result<(), HarnessError> {
        (self.0)().await
    }
}

/// Counter that reaches zero once, waitable with a timeout
#[derive(Debug, Clone)]
pub struct CountdownLatch {
    remaining: Arc<watch::Sender<usize>>,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        let (remaining, _) = watch::channel(count);
        Self {
            remaining: Arc::new(remaining),
        }
    }

    /// Decrement, saturating at zero
    pub fn count_down(&self) {
        self.remaining.send_if_modified(|remaining| {
            if *remaining == 0 {
                return false;
            }
            *remaining -= 1;
            true
        });
    }

    pub fn count(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Wait for zero; false if `timeout` elapsed first
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.subscribe();
        let reached = match tokio::time::timeout(timeout, remaining.wait_for(|n| *n == 0)).await {
            Ok(reached) => reached.is_ok(),
            Err(_) => false,
        };
        reached
    }
}

/// Remove terminal color escape sequences
pub fn strip_color_codes(line: &str) -> Cow<'_, str> {
    static COLOR_CODES: OnceLock<Regex> = OnceLock::new();
    COLOR_CODES
        .get_or_init(|| Regex::new(r"\x1B\[[;\d]*m").expect("color code pattern is valid"))
        .replace_all(line, "")
}

/// How an output line is recognised
#[derive(Debug, Clone)]
pub enum LineMatcher {
    /// Substring match
    Contains(String),
    /// Regex match; with a threshold, capture group 1 must parse as a number above it
    Regex {
        regex: Regex,
        min_value: Option<f64>,
    },
}

/// Pattern applied to each output line
#[derive(Debug, Clone)]
pub struct LinePattern {
    matcher: LineMatcher,
    strip_colors: bool,
}

impl LinePattern {
    pub fn contains(text: &str) -> Self {
        Self {
            matcher: LineMatcher::Contains(text.to_string()),
            strip_colors: false,
        }
    }

    pub fn regex(pattern: &str, min_value: Option<f64>) -> Result<Self, HarnessError> {
        let regex = Regex::new(pattern).map_err(|e| {
            HarnessError::InvalidDefinition(format!("invalid pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            matcher: LineMatcher::Regex { regex, min_value },
            strip_colors: false,
        })
    }

    pub fn strip_colors(mut self, strip: bool) -> Self {
        self.strip_colors = strip;
        self
    }

    pub fn matches(&self, line: &str) -> bool {
        let line = if self.strip_colors {
            strip_color_codes(line)
        } else {
            Cow::Borrowed(line)
        };

        match &self.matcher {
            LineMatcher::Contains(text) => line.contains(text.as_str()),
            LineMatcher::Regex {
                regex,
                min_value: None,
            } => regex.is_match(&line),
            LineMatcher::Regex {
                regex,
                min_value: Some(min),
            } => regex
                .captures(&line)
                .and_then(|captures| captures.get(1))
                .and_then(|value| value.as_str().trim().parse::<f64>().ok())
                .is_some_and(|value| value > *min),
        }
    }
}

/// Waits for `count` matching lines on a bus within a timeout
///
/// Subscribes on construction, so attach it before the component launches.
/// The subscription is removed on drop.
#[derive(Debug)]
pub struct PatternCountdown {
    bus: LineBus,
    subscription: SubscriptionId,
    latch: CountdownLatch,
    expected: usize,
    timeout: Duration,
}

impl PatternCountdown {
    pub fn attach(bus: &LineBus, pattern: LinePattern, count: usize, timeout: Duration) -> Self {
        let latch = CountdownLatch::new(count);
        let counter = latch.clone();
        let subscription = bus.subscribe(move |line: &String| {
            if pattern.matches(line) {
                debug!("Matched verification line: {}", line);
                counter.count_down();
            }
        });

        Self {
            bus: bus.clone(),
            subscription,
            latch,
            expected: count,
            timeout,
        }
    }

    /// Matches seen so far
    pub fn observed(&self) -> usize {
        self.expected - self.latch.count()
    }
}

impl Drop for PatternCountdown {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}

#[async_trait]
impl Verification for PatternCountdown {
    async fn verify(&self) -> Result<(), HarnessError> {
        if self.latch.wait(self.timeout).await {
            debug!("Observed {} matching lines", self.expected);
            Ok(())
        } else {
            Err(HarnessError::VerificationTimeout {
                expected: self.expected,
                observed: self.observed(),
                timeout_ms: self.timeout.as_millis() as u64,
            })
        }
    }
}
