//! Single-assignment result cell
//!
//! Any number of tasks may race to settle the gate; exactly one transition from
//! unsettled to settled happens and every later attempt is a silent no-op. Waiters
//! observe the winning payload (or error) no matter when they start waiting.

use crate::core::error::HarnessError;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

type Slot<T> = Option<Result<T, HarnessError>>;

/// First-settlement-wins result cell
pub struct SettlementGate<T> {
    slot: watch::Sender<Slot<T>>,
}

impl<T: Clone + Send + Sync> SettlementGate<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Settle with a value; true only for the call that performed the transition
    pub fn try_settle_value(&self, value: T) -> bool {
        self.try_settle(Ok(value))
    }

    /// Settle with an error; true only for the call that performed the transition
    pub fn try_settle_error(&self, error: HarnessError) -> bool {
        self.try_settle(Err(error))
    }

    fn try_settle(&self, outcome: Result<T, HarnessError>) -> bool {
        let mut outcome = Some(outcome);
        // The check and the write happen under the channel's write lock.
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The settled outcome, if any, without waiting
    pub fn peek(&self) -> Option<Result<T, HarnessError>> {
        self.slot.borrow().clone()
    }

    /// Wait until the gate settles, or until `timeout` elapses
    ///
    /// # Errors
    /// - the stored error if the gate settled with one
    /// - `HarnessError::TimedOut` if `timeout` elapsed first
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<T, HarnessError> {
        let mut rx = self.slot.subscribe();
        let settled = async move {
            let slot = rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| HarnessError::InterruptedWait)?;
            slot.clone().unwrap_or(Err(HarnessError::InterruptedWait))
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, settled)
                .await
                .unwrap_or_else(|_| Err(HarnessError::TimedOut(limit.as_millis() as u64))),
            None => settled.await,
        }
    }
}

impl<T: Clone + Send + Sync> Default for SettlementGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for SettlementGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementGate")
            .field("slot", &*self.slot.borrow())
            .finish()
    }
}
