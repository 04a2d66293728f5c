// ── Environment monitors ──
//
// Two independent producers wrapping raw platform event feeds:
// transport changes (debounced) and screen on/off (deduplicated).
// Monitors never fail permanently -- a closed feed is logged and the
// last-known value is retained for all subscribers.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{NetworkType, ScreenState};

/// Publishes the active default-route transport as a
/// distinct-until-changed stream. Rapid transitions (e.g. wifi drop
/// followed by mobile attach) are coalesced through a debounce window:
/// the timer restarts on every raw event and only the final value is
/// published.
pub struct TransportMonitor {
    rx: watch::Receiver<NetworkType>,
}

impl TransportMonitor {
    /// Spawn the monitor over a raw platform feed. The published value
    /// starts at [`NetworkType::None`] until the feed reports.
    pub fn spawn(
        mut raw: mpsc::Receiver<NetworkType>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(NetworkType::None);

        tokio::spawn(async move {
            let mut pending: Option<NetworkType> = None;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = raw.recv() => {
                        match event {
                            // Restarting the loop restarts the debounce
                            // timer below, coalescing bursts.
                            Some(transport) => pending = Some(transport),
                            None => {
                                warn!("transport feed closed; retaining last value");
                                break;
                            }
                        }
                    }
                    () = sleep(debounce), if pending.is_some() => {
                        if let Some(transport) = pending.take() {
                            let changed = tx.send_if_modified(|cur| {
                                if *cur == transport {
                                    false
                                } else {
                                    *cur = transport;
                                    true
                                }
                            });
                            if changed {
                                debug!(%transport, "transport changed");
                            }
                        }
                    }
                }
            }
        });

        Self { rx }
    }

    pub fn current(&self) -> NetworkType {
        *self.rx.borrow()
    }

    /// Subscribers observe the current value immediately, then every
    /// distinct change.
    pub fn subscribe(&self) -> watch::Receiver<NetworkType> {
        self.rx.clone()
    }
}

/// Publishes the device screen state. Duplicate events from the
/// platform are suppressed; no debounce is applied.
pub struct ScreenMonitor {
    rx: watch::Receiver<ScreenState>,
}

impl ScreenMonitor {
    pub fn spawn(mut raw: mpsc::Receiver<ScreenState>, cancel: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(ScreenState::On);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = raw.recv() => {
                        match event {
                            Some(screen) => {
                                tx.send_if_modified(|cur| {
                                    if *cur == screen {
                                        false
                                    } else {
                                        debug!(%screen, "screen state changed");
                                        *cur = screen;
                                        true
                                    }
                                });
                            }
                            None => {
                                warn!("screen feed closed; retaining last value");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self { rx }
    }

    pub fn current(&self) -> ScreenState {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScreenState> {
        self.rx.clone()
    }
}
