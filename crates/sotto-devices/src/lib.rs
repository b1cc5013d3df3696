//! Device selection and label memory for sotto.
//!
//! This crate decides which input device a recording session should use and
//! keeps that decision meaningful across unplugs, sleeps, and renames: it
//! reconciles live enumeration against the remembered selection, caches
//! human-readable device names, and raises availability notices when the
//! selected device disappears or comes back.

mod labels;
mod reconcile;
mod select;

#[cfg(test)]
mod testing;

use async_trait::async_trait;
pub use labels::{JsonLabelStore, LabelCache, LabelResolver, LabelStore, MemoryLabelStore};
pub use reconcile::Reconciler;
pub use select::SelectionController;
use sotto_core::Device;
use thiserror::Error;

/// Errors that can occur while talking to device collaborators.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("selection persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Severity of a user-facing availability notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Warning,
    Success,
}

/// Source of the live input-device list.
///
/// Implement this trait to plug in an enumeration backend (cpal, an IPC
/// bridge to another process, a scripted list in tests, ...).
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Enumerate the currently usable input devices, OS default first. The
    /// returned ids never include [`sotto_core::AUTOMATIC_DEVICE_ID`].
    async fn enumerate(&self) -> Result<Vec<Device>>;

    /// Returns the name of this provider for logging/debugging.
    fn name(&self) -> &str;
}

/// Durable home for the selected device id.
#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// Load the stored selection; `None` means automatic.
    async fn load(&self) -> Result<Option<String>>;

    /// Store the selection; `None` means automatic.
    async fn save(&self, id: Option<&str>) -> Result<()>;
}

/// Sink for user-facing availability notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}
