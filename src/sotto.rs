use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use sotto::notify::{NotificationLayer, ToastNotifier};
use sotto::store::ConfigSelectionStore;
use sotto::{
    AUTOMATIC_DEVICE_ID, Config, ConfigManager, CpalDeviceProvider, DEFAULT_LOG_LEVEL,
    DeviceLabels, JsonLabelStore, LabelResolver, SelectionController, SelectionState, VERSION,
    probe_input_device,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How often the device list is re-checked for hot-plug changes.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SOTTO_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .finish()
        .with(NotificationLayer::new())
        .init();

    // Load config
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });
    // save back the config to create the file if it doesn't exist
    if let Err(e) = config_manager.save(&config) {
        warn!(error = %e, "Failed to write config file");
    }

    let notifier = Arc::new(ToastNotifier::new(config.notices()));
    let resolver = LabelResolver::new(JsonLabelStore::new()?, DeviceLabels::default());
    let store = Arc::new(ConfigSelectionStore::new(config_manager, config));
    let provider = Arc::new(CpalDeviceProvider::new());

    let controller = SelectionController::new(provider, store, notifier, resolver).await;

    let last_logged = Mutex::new(controller.state());
    controller.subscribe(move |state| {
        let mut last = last_logged.lock();
        if *last != *state {
            *last = state.clone();
            info!(
                device = %state.current_id,
                fallback = state.fallback_active,
                devices = state.devices.len(),
                "Selection updated"
            );
        }
    });

    controller.refresh(true).await;
    info!(version = VERSION, "Sotto ready");
    print_devices(&controller.state());
    print_help();

    // stdin on its own thread; lines flow into the select loop below
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        use std::io::BufRead;

        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut poll = interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = poll.tick() => {
                controller.on_focus_gained();
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if !handle_command(&controller, line.trim()).await {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Handles one command line. Returns false when the loop should exit.
async fn handle_command(controller: &SelectionController, line: &str) -> bool {
    let (command, arg) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "list" | "l" => print_devices(&controller.state()),
        "refresh" | "r" => {
            controller.refresh(true).await;
            print_devices(&controller.state());
        }
        "auto" | "a" => {
            controller.select_device(AUTOMATIC_DEVICE_ID);
            println!("Selected automatic input");
        }
        "use" | "u" => {
            if arg.is_empty() {
                println!("usage: use <index|device id>");
            } else {
                use_device(controller, arg).await;
            }
        }
        "help" | "h" | "?" => print_help(),
        "quit" | "q" | "exit" => return false,
        _ => println!("Unknown command {command:?}, try 'help'"),
    }

    true
}

async fn use_device(controller: &SelectionController, target: &str) {
    let state = controller.state();
    let id = match target.parse::<usize>() {
        Ok(index) => match state.devices.get(index) {
            Some(device) => device.id.clone(),
            None => {
                println!("No device at index {index}");
                return;
            }
        },
        Err(_) => target.to_string(),
    };

    controller.select_device(&id);
    println!("Selected {id}");

    if id != AUTOMATIC_DEVICE_ID {
        let probe_id = id.clone();
        let probed = tokio::task::spawn_blocking(move || probe_input_device(&probe_id)).await;
        if let Ok(Some(input)) = probed {
            info!(
                device = %input.name,
                sample_rate = input.sample_rate,
                channels = input.channels,
                "Input device resolved"
            );
        }
    }
}

fn print_devices(state: &SelectionState) {
    println!("Input devices:");
    for (index, device) in state.devices.iter().enumerate() {
        let marker = if device.id == state.current_id { '*' } else { ' ' };
        println!("{marker} [{index}] {}", device.label);
    }
    if state.fallback_active {
        println!(
            "  (capturing from the system default until {} returns)",
            state.preferred_label
        );
    }
}

fn print_help() {
    println!("commands: list, use <index|device id>, auto, refresh, help, quit");
}
