//! Handle to one utterance's recognition stream.

use crate::recognizer::manager::Shared;
use std::fmt;
use std::sync::{Arc, Weak};

/// One active utterance bound to the model that was loaded when it was
/// created.
///
/// The backend stream itself lives inside the manager, under its native
/// lock; the session only names it. Release it with
/// [`RecognizerManager::release_stream`](super::manager::RecognizerManager::release_stream).
/// A session dropped without being released is released in the background
/// on the current tokio runtime.
pub struct StreamSession {
    id: u64,
    generation: u64,
    owner: Weak<Shared>,
    released: bool,
}

impl StreamSession {
    pub(crate) fn new(id: u64, generation: u64, owner: Weak<Shared>) -> Self {
        Self {
            id,
            generation,
            owner,
            released: false,
        }
    }

    /// Manager-unique stream id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Load generation of the model this stream is bound to.
    ///
    /// Every successful model load bumps the generation, so two sessions
    /// with the same generation share one model instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if this session was issued by the manager owning `shared`.
    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(shared))
    }

    /// Take over release duty from `Drop`.
    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(manager = %owner.name(), stream = id, "stream dropped without release");
                runtime.spawn(async move {
                    owner.release_stream(id).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    manager = %owner.name(),
                    stream = id,
                    "stream dropped outside a tokio runtime; it stays counted as active"
                );
            }
        }
    }
}
