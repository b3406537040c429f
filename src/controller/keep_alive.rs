//! Keep-alive: detects a lost playback session and moves it back to a device

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::model::{choose_recovery_target, DeviceInfo, KeepAliveState};
use crate::provider::{DeviceSession, ProviderRegistry};

use super::scheduler::ScheduledTask;

const CHECK_INTERVAL: Duration = Duration::from_secs(120);
const SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct KeepAliveMonitor {
    registry: Arc<ProviderRegistry>,
    state: RwLock<KeepAliveState>,
    task: ScheduledTask,
}

impl KeepAliveMonitor {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            state: RwLock::new(KeepAliveState::default()),
            task: ScheduledTask::new("keep-alive"),
        }
    }

    pub async fn status(&self) -> KeepAliveState {
        self.state.read().await.clone()
    }

    /// Start health checks, running the first one right away.
    /// Returns false if already enabled.
    pub async fn enable(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.write().await;
            if state.enabled {
                return false;
            }
            state.enabled = true;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        self.task.start(CHECK_INTERVAL, true, move || {
            let weak = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.tick().await;
                }
            }
        });
        tracing::info!(interval_secs = CHECK_INTERVAL.as_secs(), "Keep-alive enabled");
        true
    }

    /// Returns false if it was not enabled.
    pub async fn disable(&self) -> bool {
        self.task.cancel();
        let mut state = self.state.write().await;
        if !state.enabled {
            return false;
        }
        state.enabled = false;
        tracing::info!("Keep-alive disabled");
        true
    }

    async fn tick(&self) {
        if !self.state.read().await.enabled {
            return;
        }

        let provider = match self.registry.active().await {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(error = %e, "Keep-alive has no active provider");
                return;
            }
        };
        let Some(session) = provider.device_session() else {
            tracing::trace!(provider = %provider.tag(), "Active provider has no device session, skipping keep-alive");
            return;
        };

        self.check_health(session).await;
    }

    /// One health check. Returns true if an active device was found.
    async fn check_health(&self, session: &dyn DeviceSession) -> bool {
        match find_active_device(session).await {
            Ok(Some(device)) => {
                tracing::debug!(device = %device.name, "Playback session healthy");
                self.state.write().await.record_success(device.id, Utc::now());
                return true;
            }
            Ok(None) => tracing::debug!("No active playback device"),
            Err(EngineError::AuthenticationFailure(msg)) => {
                tracing::error!(error = %msg, "Authentication lost, disabling keep-alive");
                self.disable().await;
                return false;
            }
            Err(e) => tracing::warn!(error = %e, "Keep-alive check failed"),
        }

        let (failures, should_recover) = {
            let mut state = self.state.write().await;
            let should_recover = state.record_failure();
            (state.consecutive_failures, should_recover)
        };
        if !should_recover {
            return false;
        }

        tracing::info!(failures, "Attempting playback session recovery");
        match self.recover(session).await {
            Ok(device) => {
                tracing::info!(device = %device.name, "Playback session recovered");
                self.state.write().await.record_success(device.id, Utc::now());
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, failures, "Playback session recovery failed");
                false
            }
        }
    }

    /// Transfer playback (without starting it) to the best available device,
    /// then confirm the session picked it up.
    async fn recover(&self, session: &dyn DeviceSession) -> Result<DeviceInfo> {
        let devices = session.devices().await?;
        let last_known_good = self.state.read().await.last_active_device_id.clone();
        let target = choose_recovery_target(&devices, last_known_good.as_deref())
            .ok_or_else(|| EngineError::RecoveryFailed("no devices available".into()))?;

        tracing::debug!(device = %target.name, device_id = %target.id, "Transferring playback");
        session.transfer_playback(&target.id, false).await?;
        tokio::time::sleep(SETTLE_DELAY).await;

        session
            .session_device()
            .await?
            .ok_or_else(|| EngineError::RecoveryFailed(format!("{} did not become active", target.name)))
    }

    /// Make sure the session has an active device, transferring to one if
    /// needed. Backends without device sessions always succeed.
    pub async fn ensure_active_device(&self) -> bool {
        let provider = match self.registry.active().await {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(error = %e, "No active provider");
                return false;
            }
        };
        let Some(session) = provider.device_session() else {
            return true;
        };

        if let Ok(Some(device)) = find_active_device(session).await {
            self.state.write().await.record_success(device.id, Utc::now());
            return true;
        }

        match self.recover(session).await {
            Ok(device) => {
                self.state.write().await.record_success(device.id, Utc::now());
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not activate a playback device");
                false
            }
        }
    }

    pub async fn recover_and_play(&self) -> bool {
        if !self.ensure_active_device().await {
            return false;
        }

        let provider = match self.registry.active().await {
            Ok(provider) => provider,
            Err(_) => return false,
        };
        match provider.device_session() {
            Some(session) => match session.resume().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Resume after recovery failed");
                    false
                }
            },
            None => {
                provider.play();
                true
            }
        }
    }
}

/// The session's device, else any device flagged active.
async fn find_active_device(session: &dyn DeviceSession) -> Result<Option<DeviceInfo>> {
    if let Some(device) = session.session_device().await? {
        return Ok(Some(device));
    }
    let devices = session.devices().await?;
    Ok(devices.into_iter().find(|d| d.is_active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemorySettingsStore, Settings};
    use crate::model::{DeviceKind, ProviderTag};
    use crate::provider::MusicProvider;
    use crate::testing::{device, FakeProvider};

    async fn monitor(tag: ProviderTag) -> (Arc<FakeProvider>, Arc<KeepAliveMonitor>) {
        let store = MemorySettingsStore::new(Settings {
            active_music_provider: Some(tag),
            ..Settings::default()
        });
        let registry = Arc::new(ProviderRegistry::new(Arc::new(store)));
        let provider = Arc::new(FakeProvider::new(tag));
        let shared = Arc::clone(&provider);
        registry
            .register(tag, move || Arc::clone(&shared) as Arc<dyn MusicProvider>)
            .await;

        let monitor = Arc::new(KeepAliveMonitor::new(registry));
        monitor.state.write().await.enabled = true;
        (provider, monitor)
    }

    fn offline_devices() -> Vec<DeviceInfo> {
        vec![
            device("phone", DeviceKind::Smartphone, false),
            device("laptop", DeviceKind::Computer, false),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn third_failed_check_transfers_to_desktop_device() {
        let (provider, monitor) = monitor(ProviderTag::Spotify).await;
        provider.set_devices(offline_devices());
        provider.transfer_activates_device(true);

        monitor.tick().await;
        monitor.tick().await;
        assert!(provider.calls_to("transfer_playback").is_empty());
        assert_eq!(monitor.status().await.consecutive_failures, 2);

        monitor.tick().await;
        assert_eq!(
            provider.calls_to("transfer_playback"),
            vec!["transfer_playback laptop false".to_string()]
        );
        let status = monitor.status().await;
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_active_device_id.as_deref(), Some("laptop"));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_prefers_last_known_good_device() {
        let (provider, monitor) = monitor(ProviderTag::Spotify).await;
        provider.set_session_device(Some(device("kitchen", DeviceKind::Speaker, true)));
        monitor.tick().await;

        provider.set_session_device(None);
        let mut devices = offline_devices();
        devices.push(device("kitchen", DeviceKind::Speaker, false));
        provider.set_devices(devices);

        for _ in 0..3 {
            monitor.tick().await;
        }
        assert_eq!(
            provider.calls_to("transfer_playback"),
            vec!["transfer_playback kitchen false".to_string()]
        );
    }

    #[tokio::test]
    async fn active_device_in_listing_resets_failures() {
        let (provider, monitor) = monitor(ProviderTag::Spotify).await;
        provider.set_devices(offline_devices());
        monitor.tick().await;
        monitor.tick().await;
        assert_eq!(monitor.status().await.consecutive_failures, 2);

        provider.set_devices(vec![device("phone", DeviceKind::Smartphone, true)]);
        monitor.tick().await;

        let status = monitor.status().await;
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_active_device_id.as_deref(), Some("phone"));
        assert!(provider.calls_to("transfer_playback").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_count_as_failures() {
        let (provider, monitor) = monitor(ProviderTag::Spotify).await;
        provider.fail("session_device");
        provider.set_devices(offline_devices());

        for _ in 0..3 {
            monitor.tick().await;
        }
        assert_eq!(provider.calls_to("transfer_playback").len(), 1);
        assert_eq!(monitor.status().await.consecutive_failures, 3);

        monitor.tick().await;
        assert_eq!(provider.calls_to("transfer_playback").len(), 2);
    }

    #[tokio::test]
    async fn backends_without_sessions_are_skipped() {
        let (provider, monitor) = monitor(ProviderTag::YouTube).await;
        for _ in 0..4 {
            monitor.tick().await;
        }
        assert_eq!(monitor.status().await.consecutive_failures, 0);
        assert!(provider.calls().is_empty());
        assert!(monitor.ensure_active_device().await);
    }

    #[tokio::test(start_paused = true)]
    async fn recover_and_play_transfers_then_resumes() {
        let (provider, monitor) = monitor(ProviderTag::Spotify).await;
        provider.set_devices(offline_devices());
        provider.transfer_activates_device(true);

        assert!(monitor.recover_and_play().await);
        assert_eq!(
            provider.calls(),
            vec!["transfer_playback laptop false".to_string(), "resume".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_active_device_reports_failure() {
        let (provider, monitor) = monitor(ProviderTag::Spotify).await;
        provider.set_devices(Vec::new());
        assert!(!monitor.ensure_active_device().await);
        assert!(!monitor.recover_and_play().await);
        assert!(provider.calls_to("resume").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_checks_immediately() {
        let (provider, monitor) = monitor(ProviderTag::Spotify).await;
        monitor.state.write().await.enabled = false;
        provider.set_session_device(Some(device("laptop", DeviceKind::Computer, true)));

        assert!(monitor.enable().await);
        assert!(!monitor.enable().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.status().await.last_active_device_id.as_deref(), Some("laptop"));

        assert!(monitor.disable().await);
        assert!(!monitor.disable().await);
        assert!(!monitor.status().await.enabled);
    }
}
