//! Idle eviction timer.
//!
//! The manager owns one [`IdleUnloadScheduler`] inside its transition lock,
//! so arming and cancelling are always serialized with the stream counter.

use crate::defaults;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long a model may sit unused before it is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Zero means evict as soon as the last stream is released.
    pub idle_timeout: Duration,
    /// Never evict automatically; only an explicit unload releases the model.
    pub always_keep: bool,
}

impl RetentionPolicy {
    pub fn idle_after(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            always_keep: false,
        }
    }

    pub fn immediate() -> Self {
        Self::idle_after(Duration::ZERO)
    }

    pub fn keep_forever() -> Self {
        Self {
            idle_timeout: Duration::ZERO,
            always_keep: true,
        }
    }

    /// What to do once the manager becomes idle under this policy.
    pub fn idle_action(&self) -> IdleAction {
        if self.always_keep {
            IdleAction::Keep
        } else if self.idle_timeout.is_zero() {
            IdleAction::UnloadNow
        } else {
            IdleAction::UnloadAfter(self.idle_timeout)
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        let idle_timeout =
            humantime::parse_duration(defaults::IDLE_TIMEOUT).unwrap_or(Duration::from_secs(30));
        Self::idle_after(idle_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    Keep,
    UnloadNow,
    UnloadAfter(Duration),
}

/// A single cancellable delayed task.
///
/// Arming replaces any previously armed task. Dropping the scheduler
/// cancels whatever is armed.
#[derive(Debug, Default)]
pub struct IdleUnloadScheduler {
    task: Option<JoinHandle<()>>,
}

impl IdleUnloadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `delay` unless cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        }));
    }

    /// Abort the armed task. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                let pending = !task.is_finished();
                task.abort();
                pending
            }
            None => false,
        }
    }

    /// Forget the armed task without aborting it.
    ///
    /// Used by the firing task itself, which must not abort its own future.
    pub fn disarm(&mut self) {
        self.task = None;
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for IdleUnloadScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
