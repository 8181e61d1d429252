//! CoinJar - FFI entry point for Swift/Kotlin/Python hosts.
//!
//! Wraps a [`JarEngine`] behind a mutex. Events are buffered and handed out
//! through `drain_events`, which hosts call after each mutation or on a UI
//! timer together with `pump`.

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::{Mutex, MutexGuard};

use crate::archive::{Archive, ArchivePage};
use crate::config::AppConfig;
use crate::engine::JarEngine;
use crate::error::CoinJarFfiError;
use crate::events::{JarEvent, Totals};
use crate::jar::AddOutcome;
use crate::record::{RecordOutcome, Slider};
use crate::settings::{Settings, SettingsPatch};
use crate::storage::StorageConfig;
use crate::sync::DispatchMode;
use crate::tasks::PendingTask;

#[derive(uniffi::Object)]
pub struct CoinJar {
    engine: Mutex<JarEngine>,
    events: Mutex<Receiver<JarEvent>>,
}

impl CoinJar {
    /// Wraps an already-built engine. Not exposed to FFI.
    pub fn with_engine(engine: JarEngine) -> Self {
        let (_, events) = engine.events().channel();
        Self {
            engine: Mutex::new(engine),
            events: Mutex::new(events),
        }
    }

    fn engine(&self) -> MutexGuard<'_, JarEngine> {
        self.engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[uniffi::export]
impl CoinJar {
    /// Opens the jar stored under `root` (default `~/.coinjar`, or
    /// `COINJAR_HOME`). Network calls run on background threads.
    #[uniffi::constructor]
    pub fn new(root: Option<String>) -> Result<Self, CoinJarFfiError> {
        let storage = match root {
            Some(root) => StorageConfig::with_root(PathBuf::from(root)),
            None => StorageConfig::discover()?,
        };
        let config = AppConfig::load(&storage.config_file())?.with_env_overrides();
        let engine = JarEngine::from_config(&storage, &config, DispatchMode::Background)?;
        Ok(Self::with_engine(engine))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Getters
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn coins(&self) -> u32 {
        self.engine().coins()
    }

    pub fn capacity(&self) -> u32 {
        self.engine().capacity()
    }

    pub fn settings(&self) -> Settings {
        self.engine().settings()
    }

    pub fn archives(&self) -> Vec<Archive> {
        self.engine().archives().to_vec()
    }

    pub fn archive_page(&self, page: u32) -> ArchivePage {
        self.engine().archive_page(page as usize)
    }

    pub fn totals(&self) -> Totals {
        self.engine().totals()
    }

    pub fn pending_title(&self) -> Option<String> {
        self.engine().pending_title().map(str::to_string)
    }

    pub fn tasks(&self) -> Vec<PendingTask> {
        self.engine().tasks().to_vec()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn add_coins(&self, amount: i64) -> AddOutcome {
        self.engine().add_coins(amount)
    }

    pub fn deposit(&self, amount: i64) -> Vec<AddOutcome> {
        self.engine().deposit(amount)
    }

    pub fn record(&self, title: String, sliders: Vec<Slider>) -> RecordOutcome {
        self.engine().record(&title, &sliders)
    }

    pub fn reset_coins(&self, initial: u32) {
        self.engine().reset_coins(initial)
    }

    pub fn set_capacity(&self, value: f64) -> u32 {
        self.engine().set_capacity(value)
    }

    pub fn register_task(&self, task: PendingTask) -> bool {
        self.engine().register_task(&task)
    }

    pub fn register_tasks_from_text(&self, text: String) -> u32 {
        self.engine().register_tasks_from_text(&text) as u32
    }

    pub fn set_pending_title(&self, title: Option<String>) {
        self.engine().set_pending_title(title.as_deref())
    }

    pub fn update_settings(&self, patch: SettingsPatch) -> Settings {
        self.engine().update_settings(&patch)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Sync & events
    // ─────────────────────────────────────────────────────────────────────────────

    /// Applies remote snapshots received since the last call.
    pub fn pump(&self) -> bool {
        self.engine().pump()
    }

    pub fn start_sync(&self) {
        self.engine().start_sync()
    }

    pub fn stop_sync(&self) {
        self.engine().stop_sync()
    }

    pub fn request_sync(&self) {
        self.engine().request_sync()
    }

    /// Events emitted since the last call, oldest first.
    pub fn drain_events(&self) -> Vec<JarEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .try_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn opens_under_custom_root_and_buffers_events() {
        let temp = TempDir::new().unwrap();
        let jar = CoinJar::new(Some(temp.path().to_string_lossy().to_string())).unwrap();
        jar.set_capacity(20.0);
        jar.add_coins(25);

        let events = jar.drain_events();
        assert!(events
            .iter()
            .any(|event| matches!(event, JarEvent::JarFilled { overflow: 5, .. })));
        assert!(jar.drain_events().is_empty());
        assert_eq!(jar.archives().len(), 1);
        assert_eq!(jar.archive_page(0).entries.len(), 1);
    }

    #[test]
    fn state_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_string_lossy().to_string();
        {
            let jar = CoinJar::new(Some(root.clone())).unwrap();
            jar.add_coins(7);
            jar.register_tasks_from_text("読書: 20ページ".to_string());
        }
        let reopened = CoinJar::new(Some(root)).unwrap();
        assert_eq!(reopened.coins(), 7);
        assert_eq!(reopened.tasks()[0].detail.as_deref(), Some("20ページ"));
    }

    #[test]
    fn malformed_config_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[remote\n").unwrap();
        let result = CoinJar::new(Some(temp.path().to_string_lossy().to_string()));
        assert!(result.is_err());
    }
}
