//! Input device identity, selection state, and display strings.

use serde::{Deserialize, Serialize};

/// Reserved id meaning "let the application pick a device".
///
/// Never a real device id: enumeration never returns it, persistence maps it
/// to "nothing stored", and the label cache never holds an entry for it.
pub const AUTOMATIC_DEVICE_ID: &str = "automatic";

/// Literal id some backends report for the OS system-default input.
///
/// Unlike [`AUTOMATIC_DEVICE_ID`] this is a real, selectable id that passes
/// through to the backend unchanged. It only gets special label handling.
pub const SYSTEM_DEFAULT_DEVICE_ID: &str = "default";

/// True for ids with reserved label handling (never cached by name).
pub fn is_reserved_id(id: &str) -> bool {
    id == AUTOMATIC_DEVICE_ID || id == SYSTEM_DEFAULT_DEVICE_ID
}

/// A selectable audio input device as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Opaque backend-assigned identifier.
    pub id: String,
    /// Human-readable name.
    pub label: String,
    /// Set on the placeholder entry for a remembered device that is missing
    /// from the live list.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_disconnected: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Device {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_disconnected: false,
        }
    }

    /// Placeholder entry for a device that is remembered but absent.
    pub fn disconnected(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_disconnected: true,
        }
    }

    /// The automatic entry shown at the top of every device list.
    pub fn automatic(labels: &DeviceLabels) -> Self {
        Self::new(AUTOMATIC_DEVICE_ID, labels.automatic.clone())
    }
}

/// Snapshot of the device-selection subsystem.
///
/// Derived state: recomputed on every refresh and every selection, never
/// persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionState {
    /// Selected device id; [`AUTOMATIC_DEVICE_ID`] when no explicit choice.
    pub current_id: String,
    /// Devices to present: the automatic entry first, then live devices,
    /// then at most one disconnected placeholder for a missing selection.
    pub devices: Vec<Device>,
    /// True while the selection is absent and capture falls back to the
    /// automatic choice.
    pub fallback_active: bool,
    /// Base label of the missing selection while fallback is active,
    /// empty otherwise.
    pub preferred_label: String,
}

impl SelectionState {
    /// State before anything is known: automatic selection, the automatic
    /// entry as the only device.
    pub fn initial(labels: &DeviceLabels) -> Self {
        Self {
            current_id: AUTOMATIC_DEVICE_ID.to_string(),
            devices: vec![Device::automatic(labels)],
            fallback_active: false,
            preferred_label: String::new(),
        }
    }
}

/// Display strings for device entries and availability notices.
///
/// Everything user-visible this subsystem produces is assembled from these
/// fields, so a frontend can localize in one place. Defaults are English.
#[derive(Debug, Clone)]
pub struct DeviceLabels {
    /// Label of the automatic entry at the top of the device list.
    pub automatic: String,
    /// Display name for the OS system-default passthrough id.
    pub system_default: String,
    /// Marker for entries that are remembered but absent.
    pub disconnected: String,
    /// Placeholder name backends report when no specific name is known.
    pub generic: String,
    /// Warning template; `{device}` and `{fallback}` are substituted.
    pub unavailable_notice: String,
    /// Recovery template; `{device}` is substituted.
    pub restored_notice: String,
}

impl Default for DeviceLabels {
    fn default() -> Self {
        Self {
            automatic: "Automatic".to_string(),
            system_default: "System Default".to_string(),
            disconnected: "Disconnected".to_string(),
            generic: "Microphone".to_string(),
            unavailable_notice: "{device} is unavailable. Switched to {fallback}.".to_string(),
            restored_notice: "{device} is available again.".to_string(),
        }
    }
}

impl DeviceLabels {
    /// Suffix carried by disconnected entries, e.g. " (Disconnected)".
    pub fn disconnected_suffix(&self) -> String {
        format!(" ({})", self.disconnected)
    }

    /// What capture falls back to while the selection is missing,
    /// e.g. "System Default (Automatic)".
    pub fn fallback_target(&self) -> String {
        format!("{} ({})", self.system_default, self.automatic)
    }

    /// Warning message for a selection that went missing.
    pub fn unavailable_message(&self, device: &str, fallback: &str) -> String {
        self.unavailable_notice
            .replace("{device}", device)
            .replace("{fallback}", fallback)
    }

    /// Recovery message for a selection that came back.
    pub fn restored_message(&self, device: &str) -> String {
        self.restored_notice.replace("{device}", device)
    }
}
