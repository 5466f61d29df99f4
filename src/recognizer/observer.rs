//! Host notifications around model loads.

use crate::recognizer::fingerprint::ConfigFingerprint;
use std::panic::{self, AssertUnwindSafe};

/// Fire-and-forget hooks invoked synchronously around a model load.
///
/// Both methods default to no-ops. A panic inside a hook is caught and
/// logged; it never aborts the load.
pub trait LoadObserver: Send + Sync {
    fn on_load_start(&self, _fingerprint: &ConfigFingerprint) {}

    /// Called after the load attempt, whether or not it succeeded.
    fn on_load_done(&self, _fingerprint: &ConfigFingerprint, _success: bool) {}
}

/// Run a hook, swallowing panics.
pub(crate) fn notify(manager: &str, hook: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(manager, hook, "load observer panicked; continuing");
    }
}
