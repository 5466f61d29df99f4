//! Resource-managed streaming recognizer.
//!
//! [`RecognizerManager`] owns one expensive backend model, hands out
//! [`StreamSession`]s over it, and evicts it after an idle period.

pub mod backend;
pub mod fingerprint;
pub mod manager;
pub mod observer;
pub mod scheduler;
pub mod session;

pub use backend::{InferenceBackend, MockBackend, ModelHandle, StreamHandle};
pub use fingerprint::{ConfigFingerprint, FlagValue};
pub use manager::{ManagerState, PrepareOutcome, RecognizerManager, RecognizerManagerBuilder};
pub use observer::LoadObserver;
pub use scheduler::{IdleAction, IdleUnloadScheduler, RetentionPolicy};
pub use session::StreamSession;
