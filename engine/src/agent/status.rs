//! Progress reporting while waiting for the first token
//!
//! The status activity polls model residency at a fixed interval and emits
//! a human-readable message whenever the text changes. It stops as soon as
//! the shared done signal is raised and never emits after that.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::TurnEvent;
use crate::llm::{ModelBackend, ModelResidency};

/// Message for the current wait.
///
/// While the model is loading the message carries the share already in GPU
/// memory; once it is resident it carries the elapsed wait. A model that
/// stays partly offloaded never reaches 100%, so a share that has stopped
/// moving (`settled`) counts as loaded.
pub fn status_message(
    model: &str,
    residency: Option<&ModelResidency>,
    elapsed: Duration,
    settled: bool,
) -> String {
    let secs = elapsed.as_secs();
    match residency {
        None => format!("Waiting for the model backend ({}s)", secs),
        Some(r) if !r.resident => format!("Loading {} into memory ({}s)", model, secs),
        Some(r) => match r.vram_percent() {
            Some(pct) if pct < 100 && !settled => format!("Loading {}: {}% in GPU memory", model, pct),
            _ => format!("{} is thinking, waiting for first token ({}s)", model, secs),
        },
    }
}

/// Poll residency and report progress until `done` is raised.
pub async fn run_status_loop(
    backend: Arc<dyn ModelBackend>,
    interval: Duration,
    mut done: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<TurnEvent>,
) {
    let start = Instant::now();
    let mut last = String::new();
    let mut last_share: Option<u8> = None;
    let mut emitted = 0usize;

    loop {
        if *done.borrow() {
            break;
        }
        let residency = tokio::select! {
            biased;
            _ = done.changed() => break,
            r = backend.residency() => r.ok(),
        };
        if *done.borrow() {
            break;
        }

        let share = residency.filter(|r| r.resident).and_then(|r| r.vram_percent());
        let settled = share.is_some() && share == last_share;
        last_share = share;

        let message = status_message(backend.model(), residency.as_ref(), start.elapsed(), settled);
        if message != last {
            if events.send(TurnEvent::Status(message.clone())).is_err() {
                break;
            }
            emitted += 1;
            last = message;
        }

        tokio::select! {
            biased;
            changed = done.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Status loop stopped after {} messages", emitted);
}
