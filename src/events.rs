//! Events delivered to the application.
//!
//! All events of a link travel through one broadcast channel, so a
//! subscriber sees them in exactly the order the link produced them.

use crate::protocol::file::FileChunk;

/// Something the link reports to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link came up or went down.
    ConnectionChanged {
        /// Whether the link is now connected.
        connected: bool,
        /// Advertised name of the device, empty when disconnected.
        device_name: String,
        /// Platform identifier of the device, empty when disconnected.
        device_id: String,
    },
    /// A complete inbound text message, terminator removed and trimmed.
    Message(String),
    /// A binary file chunk was received.
    FileChunk(FileChunk),
    /// A non-fatal problem while processing inbound data.
    Error {
        /// Description of the problem.
        context: String,
    },
}

/// Callback handle for unregistering callbacks.
///
/// The callback stays registered until the handle is dropped or
/// [`CallbackHandle::unregister`] is called.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}
