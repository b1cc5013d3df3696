//! In-memory fakes shared by the reconciler and controller tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sotto_core::Device;
use tokio::sync::{Notify, Semaphore};

use crate::{DeviceError, DeviceProvider, NoticeKind, Notifier, Result, SelectionStore};

/// Replays a fixed sequence of enumeration results, then empty lists.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Vec<Device>>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Vec<Device>>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceProvider for ScriptedProvider {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Holds each enumeration open until the test releases it, so a refresh
/// can be caught mid-flight.
pub struct GatedProvider {
    list: Vec<Device>,
    started: Notify,
    release: Semaphore,
    calls: AtomicUsize,
}

impl GatedProvider {
    pub fn new(list: Vec<Device>) -> Arc<Self> {
        Arc::new(Self {
            list,
            started: Notify::new(),
            release: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Waits until an enumeration has entered the gate.
    pub async fn entered(&self) {
        self.started.notified().await;
    }

    /// Lets one held enumeration finish.
    pub fn release_one(&self) {
        self.release.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceProvider for GatedProvider {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.acquire().await.unwrap().forget();
        Ok(self.list.clone())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Keeps the persisted selection in memory.
pub struct MemorySelectionStore {
    stored: Mutex<Option<String>>,
    saves: AtomicUsize,
    fail_loads: bool,
    fail_saves: bool,
}

impl MemorySelectionStore {
    pub fn new(stored: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(stored.map(str::to_string)),
            saves: AtomicUsize::new(0),
            fail_loads: false,
            fail_saves: false,
        })
    }

    /// A store whose loads always fail.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(None),
            saves: AtomicUsize::new(0),
            fail_loads: true,
            fail_saves: false,
        })
    }

    /// A store that loads fine but rejects every save. Save attempts
    /// still count.
    pub fn failing_saves() -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(None),
            saves: AtomicUsize::new(0),
            fail_loads: false,
            fail_saves: true,
        })
    }

    pub fn stored(&self) -> Option<String> {
        self.stored.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SelectionStore for MemorySelectionStore {
    async fn load(&self) -> Result<Option<String>> {
        if self.fail_loads {
            return Err(DeviceError::Persistence("store offline".to_string()));
        }
        Ok(self.stored.lock().clone())
    }

    async fn save(&self, id: Option<&str>) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(DeviceError::Persistence("store offline".to_string()));
        }
        *self.stored.lock() = id.map(str::to_string);
        Ok(())
    }
}

/// Captures notices for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeKind, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<(NoticeKind, String)> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        self.notices.lock().push((kind, message.to_string()));
    }
}
