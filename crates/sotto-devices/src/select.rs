//! The selection controller: public operations over the reconciler, the
//! state snapshot, and fan-out to subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use sotto_core::{AUTOMATIC_DEVICE_ID, Device, SelectionState};
use tracing::{debug, error, warn};

use crate::labels::LabelResolver;
use crate::reconcile::Reconciler;
use crate::{DeviceProvider, Notifier, SelectionStore};

type Subscriber = Box<dyn Fn(&SelectionState) + Send + Sync>;

/// Drives device selection: owns the state snapshot, serializes
/// reconciliation turns, and fans state changes out to subscribers.
///
/// Cheap to clone; clones share the same controller. The fire-and-forget
/// operations (`select_device`, `on_focus_gained`) spawn onto the ambient
/// tokio runtime, so the controller must live inside one.
///
/// Subscriber callbacks run on the turn that changed the state. Keep them
/// light and do not call back into the controller from inside one.
#[derive(Clone)]
pub struct SelectionController {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn DeviceProvider>,
    store: Arc<dyn SelectionStore>,
    notifier: Arc<dyn Notifier>,
    state: RwLock<SelectionState>,
    recon: Mutex<Reconciler>,
    refreshing: AtomicBool,
    loading: AtomicBool,
    provider_failed: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SelectionController {
    /// Builds the controller and loads the persisted selection.
    ///
    /// A loaded non-automatic id shows up immediately as a disconnected
    /// placeholder, so the UI presents the remembered choice instead of
    /// flashing a default until the first refresh lands. Call
    /// [`refresh`](Self::refresh) afterwards to populate the live list.
    pub async fn new(
        provider: Arc<dyn DeviceProvider>,
        store: Arc<dyn SelectionStore>,
        notifier: Arc<dyn Notifier>,
        resolver: LabelResolver,
    ) -> Self {
        let recon = Reconciler::new(resolver);

        let current_id = match store.load().await {
            Ok(saved) => saved.unwrap_or_else(|| AUTOMATIC_DEVICE_ID.to_string()),
            Err(e) => {
                warn!(error = %e, "Failed to load selected device, using automatic");
                AUTOMATIC_DEVICE_ID.to_string()
            }
        };
        debug!(device = %current_id, "Loaded device selection");

        let mut state = SelectionState::initial(recon.resolver().labels());
        if current_id != AUTOMATIC_DEVICE_ID {
            state.devices.push(Device::disconnected(
                &current_id,
                recon.resolver().missing_label(&current_id),
            ));
            state.current_id = current_id;
        }

        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                notifier,
                state: RwLock::new(state),
                recon: Mutex::new(recon),
                refreshing: AtomicBool::new(false),
                loading: AtomicBool::new(false),
                provider_failed: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Read-only snapshot of the current selection state.
    pub fn state(&self) -> SelectionState {
        self.inner.state.read().clone()
    }

    /// True while a loading refresh is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::Acquire)
    }

    /// Registers a listener called after every state change. Returns the
    /// listener's slot index.
    pub fn subscribe(&self, listener: impl Fn(&SelectionState) + Send + Sync + 'static) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.push(Box::new(listener));
        subscribers.len() - 1
    }

    /// Selects `id` now and kicks persistence plus a fresh reconciliation
    /// off in the background.
    ///
    /// The optimistic state is visible to [`state`](Self::state) and
    /// subscribers before either lands; the stored value maps the automatic
    /// sentinel to nothing stored.
    pub fn select_device(&self, id: &str) {
        debug!(device = %id, "Device selected");

        // A reconciling refresh holds the recon lock across its
        // read-reconcile-write span; the optimistic update must not land
        // inside that span.
        let snapshot = {
            let mut recon = self.inner.recon.lock();
            let snapshot = {
                let mut state = self.inner.state.write();
                state.current_id = id.to_string();
                if id == AUTOMATIC_DEVICE_ID {
                    state.fallback_active = false;
                    state.preferred_label.clear();
                }
                state.clone()
            };
            if id == AUTOMATIC_DEVICE_ID {
                recon.clear_fallback();
            } else if let Some(device) = snapshot.devices.iter().find(|d| d.id == id) {
                recon.resolver_mut().remember(id, &device.label);
            }
            snapshot
        };

        self.notify_subscribers(&snapshot);

        let this = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let stored = (id != AUTOMATIC_DEVICE_ID).then_some(id.as_str());
            if let Err(e) = this.inner.store.save(stored).await {
                warn!(error = %e, "Failed to persist device selection");
            }
            this.refresh(false).await;
        });
    }

    /// Fetches the live device list and reconciles it with the current
    /// selection.
    ///
    /// At most one refresh runs at a time; calls landing while one is in
    /// flight return immediately without effect. The selection id is read
    /// fresh once enumeration completes, so a refresh that outlives a
    /// `select_device` reconciles against the newer choice.
    ///
    /// An enumeration failure keeps the previous state. Only the first
    /// failure of a streak logs at error level; repeats stay at debug
    /// until a poll succeeds.
    pub async fn refresh(&self, show_loading: bool) {
        let inner = &self.inner;
        if inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Refresh already in flight, skipping");
            return;
        }

        if show_loading {
            inner.loading.store(true, Ordering::Release);
        }

        match inner.provider.enumerate().await {
            Ok(live) => {
                inner.provider_failed.store(false, Ordering::Release);
                // One turn under the recon lock: the selection id is read
                // fresh here, after enumeration, and the state swap stays
                // inside the same span (lock order recon, then state).
                let next = {
                    let mut recon = inner.recon.lock();
                    let current_id = inner.state.read().current_id.clone();
                    let next = recon.reconcile(&live, &current_id, inner.notifier.as_ref());
                    *inner.state.write() = next.clone();
                    next
                };
                self.notify_subscribers(&next);
            }
            Err(e) => {
                if inner.provider_failed.swap(true, Ordering::AcqRel) {
                    debug!(
                        provider = inner.provider.name(),
                        error = %e,
                        "Input device enumeration still failing"
                    );
                } else {
                    error!(
                        provider = inner.provider.name(),
                        error = %e,
                        "Failed to enumerate input devices"
                    );
                }
            }
        }

        if show_loading {
            inner.loading.store(false, Ordering::Release);
        }
        inner.refreshing.store(false, Ordering::Release);
    }

    /// The window regained focus; devices may have changed while it was
    /// away. Triggers a non-loading refresh.
    pub fn on_focus_gained(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            this.refresh(false).await;
        });
    }

    fn notify_subscribers(&self, state: &SelectionState) {
        for listener in self.inner.subscribers.lock().iter() {
            listener(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use sotto_core::DeviceLabels;

    use super::*;
    use crate::labels::{LabelResolver, MemoryLabelStore};
    use crate::testing::{GatedProvider, MemorySelectionStore, RecordingNotifier, ScriptedProvider};
    use crate::{DeviceError, NoticeKind};

    fn resolver() -> LabelResolver {
        LabelResolver::new(MemoryLabelStore::new(), DeviceLabels::default())
    }

    /// Lets spawned turns (persistence, background refreshes) run to
    /// completion on the test runtime.
    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initial_state_from_store() {
        let store = MemorySelectionStore::new(Some("mic-2"));
        let resolver = LabelResolver::new(
            MemoryLabelStore::with_entries([("mic-2", "Blue Yeti")]),
            DeviceLabels::default(),
        );
        let controller = SelectionController::new(
            ScriptedProvider::new(vec![]),
            store,
            RecordingNotifier::shared(),
            resolver,
        )
        .await;

        let state = controller.state();
        assert_eq!(state.current_id, "mic-2");
        assert_eq!(state.devices.len(), 2);
        assert_eq!(state.devices[0].id, AUTOMATIC_DEVICE_ID);
        assert_eq!(state.devices[1].label, "Blue Yeti (Disconnected)");
        assert!(state.devices[1].is_disconnected);
        assert!(!state.fallback_active);
    }

    #[tokio::test]
    async fn test_initial_state_defaults_to_automatic() {
        let controller = SelectionController::new(
            ScriptedProvider::new(vec![]),
            MemorySelectionStore::new(None),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        let state = controller.state();
        assert_eq!(state.current_id, AUTOMATIC_DEVICE_ID);
        assert_eq!(state.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_automatic() {
        let controller = SelectionController::new(
            ScriptedProvider::new(vec![]),
            MemorySelectionStore::failing(),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        assert_eq!(controller.state().current_id, AUTOMATIC_DEVICE_ID);
    }

    #[tokio::test]
    async fn test_refresh_reconciles_live_list() {
        let provider = ScriptedProvider::new(vec![Ok(vec![
            Device::new("mic-a", "Desk Mic"),
            Device::new("mic-b", "USB Mic"),
        ])]);
        let controller = SelectionController::new(
            provider.clone(),
            MemorySelectionStore::new(None),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        controller.refresh(false).await;

        let state = controller.state();
        assert_eq!(state.devices.len(), 3);
        assert_eq!(state.devices[0].id, AUTOMATIC_DEVICE_ID);
        assert!(!controller.is_loading());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_state() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![Device::new("mic-a", "Desk Mic")]),
            Err(DeviceError::Enumeration("backend offline".to_string())),
        ]);
        let notifier = RecordingNotifier::shared();
        let controller = SelectionController::new(
            provider.clone(),
            MemorySelectionStore::new(None),
            notifier.clone(),
            resolver(),
        )
        .await;

        controller.refresh(false).await;
        let before = controller.state();

        controller.refresh(false).await;
        assert_eq!(controller.state(), before);
        assert_eq!(provider.calls(), 2);
        assert!(notifier.notices().is_empty());
    }

    /// Counts error-level events while installed as the thread default
    /// subscriber.
    struct ErrorCounter {
        errors: Arc<AtomicUsize>,
    }

    impl tracing::Subscriber for ErrorCounter {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[tokio::test]
    async fn test_enumeration_failure_streak_logs_error_once() {
        let errors = Arc::new(AtomicUsize::new(0));
        let _guard = tracing::subscriber::set_default(ErrorCounter {
            errors: errors.clone(),
        });

        let offline = || Err(DeviceError::Enumeration("backend offline".to_string()));
        let provider = ScriptedProvider::new(vec![offline(), offline(), Ok(vec![]), offline()]);
        let controller = SelectionController::new(
            provider,
            MemorySelectionStore::new(None),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        controller.refresh(false).await;
        controller.refresh(false).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        // A successful poll ends the streak; the next failure is news again.
        controller.refresh(false).await;
        controller.refresh(false).await;
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_select_device_persists_and_reconciles() {
        let provider = ScriptedProvider::new(vec![Ok(vec![Device::new("mic-b", "USB Mic")])]);
        let store = MemorySelectionStore::new(None);
        let controller = SelectionController::new(
            provider.clone(),
            store.clone(),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        controller.select_device("mic-b");
        assert_eq!(controller.state().current_id, "mic-b");

        settle().await;
        assert_eq!(store.stored().as_deref(), Some("mic-b"));
        assert_eq!(provider.calls(), 1);

        let state = controller.state();
        assert!(!state.fallback_active);
        assert_eq!(state.devices.len(), 2);
    }

    #[tokio::test]
    async fn test_select_device_survives_save_failure() {
        let provider = ScriptedProvider::new(vec![Ok(vec![Device::new("mic-b", "USB Mic")])]);
        let store = MemorySelectionStore::failing_saves();
        let controller = SelectionController::new(
            provider.clone(),
            store.clone(),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        controller.select_device("mic-b");
        settle().await;

        // A rejected write leaves the optimistic selection standing and
        // the follow-up reconcile still runs.
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.stored(), None);
        let state = controller.state();
        assert_eq!(state.current_id, "mic-b");
        assert!(!state.fallback_active);
        assert_eq!(state.devices.len(), 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_select_automatic_clears_fallback() {
        let provider = ScriptedProvider::new(vec![Ok(vec![]), Ok(vec![])]);
        let store = MemorySelectionStore::new(Some("mic-a"));
        let notifier = RecordingNotifier::shared();
        let controller = SelectionController::new(
            provider.clone(),
            store.clone(),
            notifier.clone(),
            resolver(),
        )
        .await;

        controller.refresh(false).await;
        assert!(controller.state().fallback_active);

        controller.select_device(AUTOMATIC_DEVICE_ID);
        let optimistic = controller.state();
        assert!(!optimistic.fallback_active);
        assert!(optimistic.preferred_label.is_empty());

        settle().await;
        assert_eq!(store.stored(), None);
        assert_eq!(store.save_count(), 1);
        // No spurious "available again" after the user walked away
        assert!(notifier.notices().is_empty());
        assert_eq!(controller.state().devices.len(), 1);
    }

    #[tokio::test]
    async fn test_second_refresh_while_pending_is_skipped() {
        let provider = GatedProvider::new(vec![Device::new("mic-a", "Desk Mic")]);
        let controller = SelectionController::new(
            provider.clone(),
            MemorySelectionStore::new(None),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh(true).await }
        });
        provider.entered().await;
        assert!(controller.is_loading());

        controller.refresh(false).await;
        assert_eq!(provider.calls(), 1);

        provider.release_one();
        first.await.unwrap();

        assert!(!controller.is_loading());
        assert_eq!(controller.state().devices.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_refresh_reads_fresh_selection() {
        let provider = GatedProvider::new(vec![Device::new("mic-a", "Desk Mic")]);
        let store = MemorySelectionStore::new(None);
        let controller = SelectionController::new(
            provider.clone(),
            store.clone(),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh(false).await }
        });
        provider.entered().await;
        assert!(!controller.is_loading());

        // Selection changes while enumeration is still in flight. The
        // select turn's own refresh bounces off the guard.
        controller.select_device("mic-b");
        settle().await;
        assert_eq!(store.stored().as_deref(), Some("mic-b"));
        assert_eq!(provider.calls(), 1);

        provider.release_one();
        first.await.unwrap();

        let state = controller.state();
        assert_eq!(state.current_id, "mic-b");
        assert!(state.fallback_active);
        assert!(
            state
                .devices
                .iter()
                .any(|d| d.id == "mic-b" && d.is_disconnected)
        );
    }

    #[tokio::test]
    async fn test_unplug_warning_flows_through_controller() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![Device::new("mic-b", "USB Mic")]),
            Ok(vec![]),
        ]);
        let notifier = RecordingNotifier::shared();
        let controller = SelectionController::new(
            provider.clone(),
            MemorySelectionStore::new(Some("mic-b")),
            notifier.clone(),
            resolver(),
        )
        .await;

        controller.refresh(false).await;
        controller.refresh(false).await;

        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, NoticeKind::Warning);
        assert_eq!(
            notices[0].1,
            "USB Mic is unavailable. Switched to System Default (Automatic)."
        );
    }

    #[tokio::test]
    async fn test_subscribers_observe_updates() {
        let seen = Arc::new(AtomicUsize::new(0));
        let controller = SelectionController::new(
            ScriptedProvider::new(vec![Ok(vec![Device::new("mic-a", "Desk Mic")])]),
            MemorySelectionStore::new(None),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        let counter = seen.clone();
        controller.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.refresh(false).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        controller.select_device("mic-a");
        assert!(seen.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_focus_gained_refreshes_quietly() {
        let provider = ScriptedProvider::new(vec![Ok(vec![Device::new("mic-a", "Desk Mic")])]);
        let controller = SelectionController::new(
            provider.clone(),
            MemorySelectionStore::new(None),
            RecordingNotifier::shared(),
            resolver(),
        )
        .await;

        controller.on_focus_gained();
        settle().await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(controller.state().devices.len(), 2);
        assert!(!controller.is_loading());
    }
}
