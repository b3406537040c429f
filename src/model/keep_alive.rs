//! Device/session types and the keep-alive monitor's state

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of failed checks before a recovery is attempted.
pub const MAX_FAILURES: u32 = 3;

/// Device class as reported by the session backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    Computer,
    Smartphone,
    Speaker,
    Other,
}

/// Information about a remote playback device
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    pub fn is_desktop_class(&self) -> bool {
        self.kind == DeviceKind::Computer
    }
}

/// Pick the device to transfer playback to: the last known-good device if it
/// is still listed, else a desktop-class device, else the first one.
pub fn choose_recovery_target<'a>(
    devices: &'a [DeviceInfo],
    last_known_good: Option<&str>,
) -> Option<&'a DeviceInfo> {
    last_known_good
        .and_then(|id| devices.iter().find(|d| d.id == id))
        .or_else(|| devices.iter().find(|d| d.is_desktop_class()))
        .or_else(|| devices.first())
}

#[derive(Clone, Debug, Serialize)]
pub struct KeepAliveState {
    pub enabled: bool,
    pub last_active_device_id: Option<String>,
    pub last_successful_ping: DateTime<Utc>,
    pub consecutive_failures: u32,
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self {
            enabled: false,
            last_active_device_id: None,
            last_successful_ping: Utc::now(),
            consecutive_failures: 0,
        }
    }
}

impl KeepAliveState {
    pub fn record_success(&mut self, device_id: String, now: DateTime<Utc>) {
        self.last_active_device_id = Some(device_id);
        self.last_successful_ping = now;
        self.consecutive_failures = 0;
    }

    /// Count a failed check. Returns true once recovery should be attempted.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.needs_recovery()
    }

    pub fn needs_recovery(&self) -> bool {
        self.consecutive_failures >= MAX_FAILURES
    }
}
