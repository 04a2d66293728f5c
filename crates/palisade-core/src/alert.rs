// ── User-visible alerts ──
//
// The core raises alerts; presenting them (notification, tile badge)
// is the embedder's job. The default sink just logs.

use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    /// The tunnel could not be established repeatedly.
    TunnelFailing,
    /// Every enforcement backend failed; traffic is NOT being filtered.
    EnforcementLost,
}

pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert, message: &str);
    fn clear(&self, alert: Alert);
}

/// Log-only sink for embedders without a notification surface.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert, message: &str) {
        error!(?alert, detail = message, "alert raised");
    }

    fn clear(&self, alert: Alert) {
        info!(?alert, "alert cleared");
    }
}
