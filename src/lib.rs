// Re-export from sub-crates
pub use sotto_audio::{CpalDeviceProvider, ResolvedInput, probe_input_device};
pub use sotto_core::{
    APP_NAME, APP_NAME_PRETTY, AUTOMATIC_DEVICE_ID, Config, ConfigManager, DEFAULT_LOG_LEVEL,
    Device, DeviceLabels, SYSTEM_DEFAULT_DEVICE_ID, SelectionState, is_reserved_id,
};
pub use sotto_devices::{
    DeviceError, DeviceProvider, JsonLabelStore, LabelResolver, NoticeKind, Notifier,
    SelectionController, SelectionStore,
};

// App-specific modules
pub mod notify;
pub mod store;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
