//! JarEngine - wires the stores together for one host process.
//!
//! One `SyncGateway` is shared by the settings store, the archive store and
//! the jar. Every mutation runs on the caller's thread; network I/O runs
//! wherever the gateway's dispatch mode puts it. Snapshots delivered by the
//! gateway are applied when the host calls [`JarEngine::pump`].
//!
//! ```rust,ignore
//! use coinjar_core::{AppConfig, DispatchMode, JarEngine, StorageConfig};
//!
//! let storage = StorageConfig::discover()?;
//! let config = AppConfig::load(&storage.config_file())?.with_env_overrides();
//! let mut engine = JarEngine::from_config(&storage, &config, DispatchMode::Background)?;
//! engine.start_sync();
//! engine.add_coins(3);
//! ```

use std::sync::Arc;

use crate::archive::{Archive, ArchivePage};
use crate::config::AppConfig;
use crate::error::Result;
use crate::events::{EventBus, Totals};
use crate::jar::{AddOutcome, JarStateMachine, ThumbnailSource};
use crate::persist::{FileStore, PersistentStore};
use crate::record::{record_title, RecordConfig, RecordOutcome, Slider};
use crate::settings::{Settings, SettingsPatch, SettingsStore};
use crate::storage::StorageConfig;
use crate::sync::{DispatchMode, PollHandle, SyncGateway};
use crate::tasks::PendingTask;

pub struct JarEngine {
    settings: SettingsStore,
    jar: JarStateMachine,
    gateway: SyncGateway,
    events: EventBus,
    record: RecordConfig,
    poll: Option<PollHandle>,
}

impl JarEngine {
    /// Restores persisted state. The jar starts at the settings' capacity.
    pub fn new(
        persist: Arc<dyn PersistentStore>,
        gateway: SyncGateway,
        defaults: Settings,
        record: RecordConfig,
    ) -> Self {
        let events = EventBus::new();
        let settings = SettingsStore::new(
            Arc::clone(&persist),
            gateway.clone(),
            events.clone(),
            defaults,
        );
        let jar = JarStateMachine::new(
            persist,
            gateway.clone(),
            events.clone(),
            settings.get().jar_capacity,
        );
        Self {
            settings,
            jar,
            gateway,
            events,
            record,
            poll: None,
        }
    }

    /// File-backed engine under `storage`, syncing if `[remote]` is active.
    pub fn from_config(
        storage: &StorageConfig,
        config: &AppConfig,
        dispatch: DispatchMode,
    ) -> Result<Self> {
        if let Err(err) = storage.ensure_dirs() {
            tracing::warn!(
                root = %storage.root().display(),
                error = %err,
                "Storage directory unavailable; changes will not be persisted"
            );
        }
        let gateway = SyncGateway::from_config(&config.remote, dispatch)?;
        Ok(Self::new(
            Arc::new(FileStore::new(storage.clone())),
            gateway,
            config.default_settings(),
            RecordConfig::from_section(&config.record),
        ))
    }

    pub fn with_thumbnails(mut self, thumbnails: Box<dyn ThumbnailSource>) -> Self {
        self.jar = self.jar.with_thumbnails(thumbnails);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn gateway(&self) -> &SyncGateway {
        &self.gateway
    }

    pub fn jar(&self) -> &JarStateMachine {
        &self.jar
    }

    // ─────────────────────────────────────────────────────────────────────
    // Getters
    // ─────────────────────────────────────────────────────────────────────

    pub fn coins(&self) -> u32 {
        self.jar.coins()
    }

    pub fn capacity(&self) -> u32 {
        self.jar.capacity()
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn archives(&self) -> &[Archive] {
        self.jar.archives().list()
    }

    pub fn archive_page(&self, index: usize) -> ArchivePage {
        self.jar.archives().page(index)
    }

    pub fn totals(&self) -> Totals {
        self.jar.totals()
    }

    pub fn pending_title(&self) -> Option<&str> {
        self.jar.pending_title()
    }

    pub fn tasks(&self) -> &[PendingTask] {
        self.jar.tasks()
    }

    pub fn record_config(&self) -> &RecordConfig {
        &self.record
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_coins(&mut self, amount: i64) -> AddOutcome {
        self.jar.add_coins(amount)
    }

    /// Adds `amount`, carrying overflow into the next cycle until nothing is
    /// left or a step makes no progress.
    pub fn deposit(&mut self, amount: i64) -> Vec<AddOutcome> {
        let mut steps = Vec::new();
        let mut remaining = amount;
        while remaining > 0 {
            let step = self.jar.add_coins(remaining);
            steps.push(step);
            if step.added == 0 && !step.sealed {
                tracing::debug!(remaining, "Deposit stalled; dropping remainder");
                break;
            }
            remaining = step.overflow as i64;
        }
        steps
    }

    /// Scores the sliders and deposits the coins, capped to the jar's free
    /// space. A zero result clears the pending title instead.
    pub fn record(&mut self, title: &str, sliders: &[Slider]) -> RecordOutcome {
        let title = record_title(title);
        let coins = self.record.coins_for(sliders).min(self.jar.free_space());
        let steps = if coins > 0 {
            self.jar.set_pending_title(Some(&title));
            self.deposit(coins as i64)
        } else {
            self.jar.set_pending_title(None);
            Vec::new()
        };
        tracing::info!(title = %title, coins, "Recorded");
        RecordOutcome {
            title,
            coins,
            steps,
        }
    }

    pub fn reset_coins(&mut self, initial: u32) {
        self.jar.reset_coins(initial);
    }

    pub fn register_task(&mut self, task: &PendingTask) -> bool {
        self.jar.register_task(task)
    }

    pub fn register_tasks_from_text(&mut self, text: &str) -> usize {
        self.jar.register_tasks_from_text(text)
    }

    pub fn set_pending_title(&mut self, title: Option<&str>) {
        self.jar.set_pending_title(title);
    }

    /// Updates settings and carries a capacity change to the jar.
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Settings {
        let settings = self.settings.update(patch);
        self.jar.set_capacity(settings.jar_capacity);
        settings
    }

    /// Goes through settings so the new capacity is persisted and synced.
    pub fn set_capacity(&mut self, value: f64) -> u32 {
        self.update_settings(&SettingsPatch::capacity(value));
        self.jar.capacity()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────

    /// Applies snapshots delivered by the gateway. Settings go first so a
    /// capacity change is in place before remote jar state lands.
    pub fn pump(&mut self) -> bool {
        let mut changed = self.settings.process_remote();
        changed |= self
            .jar
            .adopt_remote_capacity(self.settings.get().jar_capacity);
        changed |= self.jar.process_remote();
        changed
    }

    /// Pulls every resource on the calling thread, then applies.
    pub fn sync_now(&mut self) -> bool {
        self.gateway.pull_all();
        self.pump()
    }

    pub fn start_sync(&mut self) {
        if !self.gateway.is_enabled() || self.poll.is_some() {
            return;
        }
        self.poll = Some(self.gateway.start_polling());
    }

    pub fn stop_sync(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.stop();
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.poll.as_ref().is_some_and(PollHandle::is_running)
    }

    pub fn request_sync(&self) {
        self.gateway.request_immediate_pull();
    }
}
