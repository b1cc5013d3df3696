//! Reconciliation of live device enumeration against the remembered
//! selection.

use sotto_core::{AUTOMATIC_DEVICE_ID, Device, SelectionState};
use tracing::info;

use crate::labels::LabelResolver;
use crate::{NoticeKind, Notifier};

/// Merges a live device list with the current selection, classifies the
/// fallback state, and raises availability notices on transitions.
///
/// Edge detection keeps one piece of memory between runs, the previous
/// fallback target. Interleaving two runs would corrupt it, so callers
/// serialize reconciliations (the controller's refresh guard does this).
pub struct Reconciler {
    resolver: LabelResolver,
    last_fallback_id: Option<String>,
    ran_once: bool,
}

impl Reconciler {
    pub fn new(resolver: LabelResolver) -> Self {
        Self {
            resolver,
            last_fallback_id: None,
            ran_once: false,
        }
    }

    pub fn resolver(&self) -> &LabelResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut LabelResolver {
        &mut self.resolver
    }

    /// Forgets the previous fallback target. Used when selection moves to
    /// automatic, which would otherwise read as the missing device having
    /// come back.
    pub fn clear_fallback(&mut self) {
        self.last_fallback_id = None;
    }

    /// Runs one reconciliation turn and returns the next selection state.
    ///
    /// `live` never contains the automatic sentinel. The very first run
    /// after construction records state without notifying, so a selection
    /// that was already missing at startup does not greet the user with a
    /// warning.
    pub fn reconcile(
        &mut self,
        live: &[Device],
        current_id: &str,
        notifier: &dyn Notifier,
    ) -> SelectionState {
        for device in live {
            self.resolver.remember(&device.id, &device.label);
        }

        let current_found = current_id == AUTOMATIC_DEVICE_ID
            || live.iter().any(|device| device.id == current_id);
        let fallback_active = current_id != AUTOMATIC_DEVICE_ID && !current_found;
        let current_base_label = self.resolver.preferred_base_label(current_id);

        let mut devices = Vec::with_capacity(live.len() + 2);
        devices.push(Device::automatic(self.resolver.labels()));
        devices.extend(
            live.iter()
                .map(|device| Device::new(device.id.clone(), device.label.clone())),
        );
        // Keep the selection visible even while it is missing.
        if fallback_active {
            devices.push(Device::disconnected(
                current_id,
                self.resolver.missing_label(current_id),
            ));
        }

        if self.ran_once {
            self.detect_edges(fallback_active, current_id, &current_base_label, notifier);
        }
        self.ran_once = true;
        self.last_fallback_id = fallback_active.then(|| current_id.to_string());

        SelectionState {
            current_id: current_id.to_string(),
            devices,
            fallback_active,
            preferred_label: if fallback_active {
                current_base_label
            } else {
                String::new()
            },
        }
    }

    fn detect_edges(
        &self,
        fallback_active: bool,
        current_id: &str,
        current_base_label: &str,
        notifier: &dyn Notifier,
    ) {
        let labels = self.resolver.labels();

        if fallback_active && self.last_fallback_id.as_deref() != Some(current_id) {
            info!(
                device = %current_base_label,
                "Selected device unavailable, falling back to automatic"
            );
            notifier.notify(
                NoticeKind::Warning,
                &labels.unavailable_message(current_base_label, &labels.fallback_target()),
            );
        }

        if !fallback_active {
            if let Some(previous) = self.last_fallback_id.as_deref() {
                let restored = self.resolver.preferred_base_label(previous);
                info!(device = %restored, "Selected device available again");
                notifier.notify(NoticeKind::Success, &labels.restored_message(&restored));
            }
        }
    }
}
