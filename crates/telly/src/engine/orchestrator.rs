use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tokio::task::JoinSet;
use tokio::time::interval_at;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::control::TvControl;
use super::debounce::Debouncer;
use super::event::MediaKey;
use super::event::SequenceOutcome;
use super::AutomationSettings;
use crate::config::LogLevel;
use crate::device::TvConfiguration;
use crate::diagnostics::DiagnosticSink;
use crate::host::AccessibilityCheck;
use crate::host::HostEvent;
use crate::host::HostEventReceiver;
use crate::store::ConfigStore;
use crate::webos::ClientEvent;
use crate::webos::ClientEventReceiver;
use crate::webos::ForegroundSource;
use crate::webos::TvCommand;
use crate::wol::WakeSender;

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub tv: Arc<dyn TvControl>,
    pub waker: Arc<dyn WakeSender>,
    pub configs: Arc<dyn ConfigStore>,
    pub access: Arc<dyn AccessibilityCheck>,
    pub sink: Arc<dyn DiagnosticSink>,
}

struct AutomationState {
    wake: Debouncer,
    sleep: Debouncer,
    media_keys: bool,
}

struct Inner {
    deps: Collaborators,
    settings: AutomationSettings,
    state: Mutex<AutomationState>,
}

#[derive(Debug, Clone, Copy)]
enum Sequence {
    Wake,
    Sleep,
}

/// Drives the TV from host power events.
///
/// Cheap to clone; host events are handled on spawned tasks that share one
/// debounce state, so overlapping triggers are resolved by whichever task
/// checks the debouncer first.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(deps: Collaborators, settings: AutomationSettings) -> Self {
        let state = AutomationState {
            wake: Debouncer::new(settings.debounce),
            sleep: Debouncer::new(settings.debounce),
            media_keys: false,
        };
        Self {
            inner: Arc::new(Inner {
                deps,
                settings,
                state: Mutex::new(state),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AutomationState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tv(&self) -> &dyn TvControl {
        self.inner.deps.tv.as_ref()
    }

    fn saved_config(&self) -> Option<TvConfiguration> {
        match self.inner.deps.configs.load() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load saved TV");
                None
            }
        }
    }

    fn debounce(&self, sequence: Sequence) -> Result<(), std::time::Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        match sequence {
            Sequence::Wake => state.wake.check(now),
            Sequence::Sleep => state.sleep.check(now),
        }
    }

    /// Run whatever `event` calls for under the saved configuration.
    pub async fn handle_host_event(&self, event: HostEvent) -> SequenceOutcome {
        info!(%event, "host power event");
        if event == HostEvent::ScreenSleep {
            return SequenceOutcome::Ignored;
        }

        let Some(config) = self.saved_config() else {
            debug!(%event, "no saved TV");
            return SequenceOutcome::Disabled;
        };

        let outcome = match event {
            HostEvent::Wake | HostEvent::ScreenWake if config.wake_with_host => {
                self.wake_sequence(&config).await
            }
            HostEvent::Sleep if config.sleep_with_host => self.sleep_sequence(&config).await,
            _ => SequenceOutcome::Disabled,
        };
        info!(%event, %outcome, "host power event handled");
        outcome
    }

    /// Wake the TV and bring it to the host's input.
    ///
    /// Only the wake packet and the connect can abort the sequence; screen on,
    /// input switch and PC mode are each best-effort.
    pub async fn wake_sequence(&self, config: &TvConfiguration) -> SequenceOutcome {
        if let Err(elapsed) = self.debounce(Sequence::Wake) {
            info!(elapsed = ?elapsed, "wake sequence debounced");
            return SequenceOutcome::Debounced { elapsed };
        }
        info!(tv = %config.name, address = %config.ip_address, "wake sequence starting");

        self.tv().disconnect();

        if let Err(e) = self.inner.deps.waker.wake(&config.mac_address).await {
            error!(mac = %config.mac_address, error = %e, "wake packet failed, aborting wake sequence");
            self.record(LogLevel::Error, "wake", &format!("wake packet failed: {}", e));
            return SequenceOutcome::Aborted(e.to_string());
        }

        sleep(self.inner.settings.settle_delay).await;

        if let Err(e) = self.tv().connect(config).await {
            error!(address = %config.ip_address, error = %e, "connect failed, aborting wake sequence");
            self.record(LogLevel::Error, "wake", &format!("connect failed: {}", e));
            return SequenceOutcome::Aborted(e.to_string());
        }

        if let Err(e) = self.tv().send_command(TvCommand::ScreenOn) {
            warn!(error = %e, "screen on failed");
        }

        if config.switch_input_on_wake {
            match self.tv().send_command(TvCommand::SetInput(config.preferred_input)) {
                Ok(()) => info!(input = %config.preferred_input, "switched input"),
                Err(e) => warn!(input = %config.preferred_input, error = %e, "input switch failed"),
            }
        }

        if config.enable_pc_mode {
            self.ensure_pc_mode(config).await;
        }

        SequenceOutcome::Completed
    }

    async fn ensure_pc_mode(&self, config: &TvConfiguration) {
        let input = config.preferred_input;
        let mut pc_mode = self.tv().snapshot().capabilities.is_pc_mode(input);

        if pc_mode.is_none() {
            match self.tv().request(TvCommand::GetInputList).await {
                Ok(fields) => {
                    pc_mode = fields
                        .devices
                        .unwrap_or_default()
                        .iter()
                        .find(|device| device.id == input.wire_id())
                        .and_then(|device| device.icon.as_deref())
                        .map(|icon| icon.to_ascii_lowercase().contains("pc"));
                }
                Err(e) => warn!(error = %e, "input list unavailable, setting PC mode blind"),
            }
        }

        if pc_mode == Some(true) {
            debug!(%input, "already in PC mode");
            return;
        }
        match self.tv().send_command(TvCommand::pc_mode(input)) {
            Ok(()) => info!(%input, "enabled PC mode"),
            Err(e) => warn!(%input, error = %e, "PC mode failed"),
        }
    }

    /// Power the TV off, unless it is showing another source.
    pub async fn sleep_sequence(&self, config: &TvConfiguration) -> SequenceOutcome {
        if let Err(elapsed) = self.debounce(Sequence::Sleep) {
            info!(elapsed = ?elapsed, "sleep sequence debounced");
            return SequenceOutcome::Debounced { elapsed };
        }

        let preferred = ForegroundSource::Input(config.preferred_input);
        match self.tv().snapshot().foreground {
            Some(current) if current != preferred => {
                info!(current = %current, preferred = %config.preferred_input, "TV is on another source, leaving it on");
                self.tv().disconnect();
                return SequenceOutcome::SkippedOtherSource(current);
            }
            Some(_) => debug!("TV is on the host's input"),
            None => info!("current input unknown, powering off"),
        }

        if let Err(e) = self.tv().send_command(TvCommand::PowerOff) {
            warn!(error = %e, "power off failed");
        }
        self.tv().disconnect();
        SequenceOutcome::Completed
    }

    /// Connect at startup if the saved TV asks for it. Returns whether a
    /// session is up.
    pub async fn auto_connect(&self) -> bool {
        let Some(config) = self.saved_config() else {
            debug!("no saved TV, not auto-connecting");
            return false;
        };
        if !config.auto_connect {
            debug!(tv = %config.name, "auto-connect disabled");
            return false;
        }

        let attempts = self.inner.settings.connect_attempts;
        for attempt in 1..=attempts {
            match self.tv().connect(&config).await {
                Ok(()) => {
                    info!(tv = %config.name, attempt, "auto-connected");
                    return true;
                }
                Err(e) => {
                    warn!(address = %config.ip_address, attempt, attempts, error = %e, "auto-connect attempt failed")
                }
            }
            if attempt < attempts {
                sleep(self.inner.settings.backoff_step * attempt).await;
            }
        }

        warn!(address = %config.ip_address, attempts, "giving up on auto-connect");
        false
    }

    /// Turn the media key bridge on or off. Enabling without permission
    /// leaves it off. Returns the resulting setting.
    pub fn set_media_keys_enabled(&self, enabled: bool) -> bool {
        let granted = enabled && self.inner.deps.access.has_permission();
        if enabled && !granted {
            warn!("no permission to capture media keys, leaving them off");
        }
        self.lock().media_keys = granted;
        granted
    }

    pub fn media_keys_enabled(&self) -> bool {
        self.lock().media_keys
    }

    /// Forward a media key. Returns whether a command went out.
    pub fn handle_media_key(&self, key: MediaKey) -> bool {
        if !self.media_keys_enabled() {
            return false;
        }
        let command = match key {
            MediaKey::VolumeUp => TvCommand::VolumeUp,
            MediaKey::VolumeDown => TvCommand::VolumeDown,
            MediaKey::Mute if self.tv().snapshot().muted == Some(true) => TvCommand::Unmute,
            MediaKey::Mute => TvCommand::Mute,
        };
        match self.tv().send_command(command) {
            Ok(()) => true,
            Err(e) => {
                debug!(?key, error = %e, "media key not forwarded");
                false
            }
        }
    }

    fn diagnostics_verbose(&self) -> bool {
        self.inner.settings.diagnostics_enabled && self.inner.settings.diagnostics_verbose
    }

    fn record(&self, level: LogLevel, category: &str, message: &str) {
        if self.inner.settings.diagnostics_enabled {
            self.inner.deps.sink.log(level, category, message, None);
        }
    }

    /// Re-issue the bootstrap queries so their payloads are captured. Returns
    /// how many were sent.
    pub fn diagnostic_snapshot(&self) -> usize {
        if !self.tv().snapshot().connection.is_connected() {
            self.inner
                .deps
                .sink
                .log(LogLevel::Debug, "snapshot", "skipped, not connected", None);
            return 0;
        }

        let mut sent = 0;
        for command in [
            TvCommand::GetForegroundApp,
            TvCommand::GetInputList,
            TvCommand::GetSoundOutput,
            TvCommand::GetVolume,
        ] {
            match self.tv().send_command(command.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(uri = command.uri(), error = %e, "snapshot query failed"),
            }
        }
        sent
    }

    /// React to a notification from the protocol client.
    pub fn apply_client_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::StateChanged(state) => {
                info!(%state, "TV connection");
                self.record(LogLevel::Info, "connection", &state.to_string());
            }
            ClientEvent::VolumeChanged { volume, muted } => {
                debug!(volume, ?muted, "TV volume");
            }
            ClientEvent::InputChanged(Some(source)) => info!(%source, "TV source"),
            ClientEvent::InputChanged(None) => info!("TV source unknown"),
            ClientEvent::SoundOutputChanged(output) => {
                info!(%output, "TV sound output");
                self.record(LogLevel::Info, "sound_output", output.wire_id());
            }
            ClientEvent::CapabilitiesChanged(capabilities) => {
                debug!(transport = ?capabilities.transport, inputs = capabilities.input_icons.len(), "TV capabilities");
            }
            ClientEvent::Captured { kind, raw } => {
                if self.diagnostics_verbose() {
                    let metadata = BTreeMap::from([("type".to_string(), kind)]);
                    self.inner
                        .deps
                        .sink
                        .log(LogLevel::Debug, "payload", &raw, Some(&metadata));
                }
            }
        }
    }

    /// Main loop: host events, client events and the diagnostic timer, until
    /// `shutdown` resolves or nothing is left to wait on. Sequences still in
    /// flight are aborted before the final disconnect.
    pub async fn run(
        &self,
        mut host_events: HostEventReceiver,
        mut client_events: ClientEventReceiver,
        shutdown: impl Future<Output = ()>,
    ) {
        let mut ticker = self.diagnostics_verbose().then(|| {
            let period = self.inner.settings.diagnostics_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut sequences = JoinSet::new();
        tokio::pin!(shutdown);

        info!("orchestrator running");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = host_events.recv() => {
                    let this = self.clone();
                    sequences.spawn(async move {
                        this.handle_host_event(event).await;
                    });
                }
                Some(result) = sequences.join_next(), if !sequences.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "host event task failed");
                    }
                }
                Some(event) = client_events.recv() => self.apply_client_event(event),
                _ = tick(&mut ticker), if ticker.is_some() => {
                    let sent = self.diagnostic_snapshot();
                    debug!(sent, "diagnostic snapshot");
                }
                else => break,
            }
        }

        info!(running = sequences.len(), "orchestrator stopping");
        sequences.shutdown().await;
        self.tv().disconnect();
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
