//! The coin counter and its seal-on-full lifecycle.
//!
//! ```text
//!   Filling ──add_coins──► coins ≥ capacity ──► seal ──► Filling (coins = 0)
//! ```
//!
//! A seal is atomic from the caller's view: every event is emitted after the
//! archive exists and the counter has been reset, so a listener never sees a
//! full jar without its archive.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use coinjar_protocol::{
    epoch, format_timestamp, next_version, read_count, read_string, Resource, VersionedPayload,
};
use serde::Serialize;
use ulid::Ulid;

use crate::archive::{Archive, ArchiveStore, DEFAULT_THUMBNAIL};
use crate::events::{EventBus, JarEvent, Totals};
use crate::persist::{load_snapshot, save_snapshot, PersistentStore, STATE_KEY};
use crate::settings::{clamp_capacity, CAPACITY_RANGE};
use crate::sync::{RawSnapshot, Subscription, SyncGateway};
use crate::tasks::{PendingTask, TaskRegistry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, uniffi::Record)]
pub struct AddOutcome {
    pub added: u32,
    pub overflow: u32,
    pub sealed: bool,
}

/// Produces the thumbnail reference stored on a sealed archive.
pub trait ThumbnailSource: Send + Sync {
    fn thumbnail_for(&self, title: &str, capacity: u32, sealed_at: DateTime<Utc>) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultThumbnail;

impl ThumbnailSource for DefaultThumbnail {
    fn thumbnail_for(&self, _title: &str, _capacity: u32, _sealed_at: DateTime<Utc>) -> String {
        DEFAULT_THUMBNAIL.to_string()
    }
}

/// `2026/1/30の成果`
pub fn default_archive_title(date: NaiveDate) -> String {
    format!("{}の成果", date.format("%Y/%-m/%-d"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument<'a> {
    coins: u32,
    tasks: &'a [PendingTask],
    pending_title: Option<&'a str>,
}

pub struct JarStateMachine {
    coins: u32,
    capacity: u32,
    pending_title: Option<String>,
    tasks: TaskRegistry,
    updated_at: DateTime<Utc>,
    archives: ArchiveStore,
    thumbnails: Box<dyn ThumbnailSource>,
    persist: Arc<dyn PersistentStore>,
    gateway: SyncGateway,
    events: EventBus,
    subscription: Subscription,
}

impl JarStateMachine {
    /// Restores the open cycle and archive list from `persist`. Restored
    /// coins are clamped to `capacity`.
    pub fn new(
        persist: Arc<dyn PersistentStore>,
        gateway: SyncGateway,
        events: EventBus,
        capacity: u32,
    ) -> Self {
        let capacity = capacity.clamp(CAPACITY_RANGE.0, CAPACITY_RANGE.1);
        let archives = ArchiveStore::new(Arc::clone(&persist), gateway.clone());

        let mut jar = Self {
            coins: 0,
            capacity,
            pending_title: None,
            tasks: TaskRegistry::new(),
            updated_at: epoch(),
            archives,
            thumbnails: Box::new(DefaultThumbnail),
            persist,
            gateway: gateway.clone(),
            events,
            subscription: gateway.subscribe(Resource::State),
        };
        if let Some(snapshot) = load_snapshot(jar.persist.as_ref(), STATE_KEY) {
            jar.load_fields(&snapshot);
            jar.coins = jar.coins.min(capacity);
            jar.updated_at = snapshot.updated_at;
        }
        jar.gateway.seed_version(Resource::State, jar.updated_at);
        jar
    }

    pub fn with_thumbnails(mut self, thumbnails: Box<dyn ThumbnailSource>) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    pub fn coins(&self) -> u32 {
        self.coins
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn free_space(&self) -> u32 {
        self.capacity.saturating_sub(self.coins)
    }

    pub fn pending_title(&self) -> Option<&str> {
        self.pending_title.as_deref()
    }

    pub fn tasks(&self) -> &[PendingTask] {
        self.tasks.tasks()
    }

    pub fn archives(&self) -> &ArchiveStore {
        &self.archives
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Recomputed on every call.
    pub fn totals(&self) -> Totals {
        Totals {
            coins: self.archives.total_coins() + self.coins as u64,
            tasks: self.archives.total_tasks() + self.tasks.len() as u64,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_coins(&mut self, amount: i64) -> AddOutcome {
        if amount <= 0 {
            tracing::debug!(amount, "Ignored non-positive coin addition");
            return AddOutcome::default();
        }
        let amount = amount.min(u32::MAX as i64) as u32;
        let was_at_capacity = self.coins >= self.capacity;
        let added = self.free_space().min(amount);
        let overflow = amount - added;
        self.coins += added;
        let filled_count = self.coins;
        tracing::debug!(amount, added, overflow, total = self.coins, "Coins added to jar");

        // A remote capacity shrink can leave coins above capacity. Adding
        // nothing to such a jar is a stale observation, not a fill.
        let stale = was_at_capacity && self.coins > self.capacity && added == 0;
        if self.coins < self.capacity || stale {
            if added > 0 {
                self.touch();
            }
            self.events.emit(&JarEvent::CoinsChanged { count: filled_count });
            if added > 0 {
                self.emit_totals();
            }
            return AddOutcome {
                added,
                overflow,
                sealed: false,
            };
        }

        let archive = self.seal();
        self.events.emit(&JarEvent::CoinsChanged { count: filled_count });
        self.events.emit(&JarEvent::JarFilled { archive, overflow });
        self.events.emit(&JarEvent::ArchivesUpdated {
            archives: self.archives.list().to_vec(),
        });
        self.events.emit(&JarEvent::CoinsChanged { count: self.coins });
        self.emit_totals();
        AddOutcome {
            added,
            overflow,
            sealed: true,
        }
    }

    pub fn reset_coins(&mut self, initial: u32) {
        self.coins = initial.min(self.capacity);
        self.touch();
        tracing::debug!(value = self.coins, "Coin count reset");
        self.events.emit(&JarEvent::CoinsChanged { count: self.coins });
        self.emit_totals();
    }

    /// Changes capacity. Coins above the new capacity are discarded; this
    /// never seals the jar. Returns false if nothing changed.
    pub fn set_capacity(&mut self, value: u32) -> bool {
        self.resize(value, true)
    }

    /// Capacity change that arrived with remote settings. A truncation stays
    /// local and keeps the current version: the writer of the settings has
    /// already pushed its own state, which must still win the next merge.
    pub fn adopt_remote_capacity(&mut self, value: u32) -> bool {
        self.resize(value, false)
    }

    fn resize(&mut self, value: u32, publish: bool) -> bool {
        let capacity = clamp_capacity(value as f64, self.capacity);
        if capacity == self.capacity {
            return false;
        }
        self.capacity = capacity;
        let truncated = self.coins > capacity;
        if truncated {
            tracing::info!(
                from = self.coins,
                to = capacity,
                "Truncating coins to new capacity"
            );
            self.coins = capacity;
            if publish {
                self.touch();
            } else {
                save_snapshot(self.persist.as_ref(), STATE_KEY, &self.snapshot());
            }
            self.events.emit(&JarEvent::CoinsChanged { count: self.coins });
        }
        tracing::info!(capacity, "Capacity updated");
        self.events.emit(&JarEvent::CapacityChanged { capacity });
        if truncated {
            self.emit_totals();
        }
        true
    }

    pub fn register_task(&mut self, task: &PendingTask) -> bool {
        if !self.tasks.register(task) {
            return false;
        }
        self.touch();
        self.emit_totals();
        true
    }

    pub fn register_tasks_from_text(&mut self, text: &str) -> usize {
        let count = self.tasks.register_text(text);
        if count > 0 {
            self.touch();
            self.emit_totals();
        }
        count
    }

    /// Title for the next sealed archive; blank clears it.
    pub fn set_pending_title(&mut self, title: Option<&str>) {
        let title = title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string);
        if title == self.pending_title {
            return;
        }
        self.pending_title = title;
        self.touch();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Remote merge
    // ─────────────────────────────────────────────────────────────────────

    /// Drains archive and state snapshots delivered by the gateway.
    pub fn process_remote(&mut self) -> bool {
        let mut changed = false;
        if self.archives.process_remote() {
            self.events.emit(&JarEvent::ArchivesUpdated {
                archives: self.archives.list().to_vec(),
            });
            self.emit_totals();
            changed = true;
        }
        for snapshot in self.subscription.drain() {
            changed |= self.apply_remote_state(&snapshot);
        }
        changed
    }

    /// Applies a newer remote open-cycle snapshot. Coins are taken as-is,
    /// even above the local capacity.
    pub fn apply_remote_state(&mut self, snapshot: &RawSnapshot) -> bool {
        if !snapshot.is_newer_than(self.updated_at) {
            tracing::debug!("Ignoring stale remote state");
            return false;
        }
        self.load_fields(snapshot);
        self.updated_at = snapshot.updated_at;
        save_snapshot(self.persist.as_ref(), STATE_KEY, &self.snapshot());
        tracing::info!(coins = self.coins, tasks = self.tasks.len(), "Applied remote state");
        self.events.emit(&JarEvent::CoinsChanged { count: self.coins });
        self.emit_totals();
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn seal(&mut self) -> Archive {
        let now = Utc::now();
        let title = self
            .pending_title
            .take()
            .unwrap_or_else(|| default_archive_title(Local::now().date_naive()));
        let archive = Archive {
            id: Ulid::new().to_string(),
            thumbnail_ref: self.thumbnails.thumbnail_for(&title, self.capacity, now),
            title,
            coins: self.capacity,
            created_at: format_timestamp(&now),
            tasks: self.tasks.take(),
        };
        tracing::info!(
            id = %archive.id,
            title = %archive.title,
            coins = archive.coins,
            "Jar filled; archive sealed"
        );
        self.archives.seal(archive.clone());
        self.coins = 0;
        self.touch();
        archive
    }

    fn load_fields(&mut self, snapshot: &RawSnapshot) {
        self.coins = read_count(snapshot.field("coins")).unwrap_or(0);
        self.tasks
            .replace(PendingTask::list_from_value(snapshot.field("tasks")));
        self.pending_title = read_string(snapshot.field("pendingTitle"))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
    }

    fn snapshot(&self) -> VersionedPayload<StateDocument<'_>> {
        VersionedPayload::new(
            StateDocument {
                coins: self.coins,
                tasks: self.tasks.tasks(),
                pending_title: self.pending_title.as_deref(),
            },
            self.updated_at,
        )
    }

    /// New local version, then persist and push.
    fn touch(&mut self) {
        self.updated_at = next_version(self.updated_at);
        let snapshot = self.snapshot();
        save_snapshot(self.persist.as_ref(), STATE_KEY, &snapshot);
        self.gateway.push(Resource::State, &snapshot);
    }

    fn emit_totals(&self) {
        self.events.emit(&JarEvent::TotalsChanged {
            totals: self.totals(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::persist::MemoryStore;
    use serde_json::json;
    use std::sync::mpsc::Receiver;

    fn jar(capacity: u32) -> (JarStateMachine, Receiver<JarEvent>, MemoryStore) {
        let persist = MemoryStore::new();
        let events = EventBus::new();
        let (_, rx) = events.channel();
        let jar = JarStateMachine::new(
            Arc::new(persist.clone()),
            SyncGateway::disabled(),
            events,
            capacity,
        );
        (jar, rx, persist)
    }

    fn kinds(rx: &Receiver<JarEvent>) -> Vec<EventKind> {
        rx.try_iter().map(|event| event.kind()).collect()
    }

    #[test]
    fn non_positive_amount_is_a_no_op() {
        let (mut jar, rx, _) = jar(100);
        assert_eq!(jar.add_coins(0), AddOutcome::default());
        assert_eq!(jar.add_coins(-4), AddOutcome::default());
        assert!(kinds(&rx).is_empty());
    }

    #[test]
    fn partial_fill() {
        let (mut jar, rx, _) = jar(100);
        let outcome = jar.add_coins(30);
        assert_eq!(
            outcome,
            AddOutcome {
                added: 30,
                overflow: 0,
                sealed: false
            }
        );
        assert_eq!(jar.coins(), 30);
        assert_eq!(kinds(&rx), vec![EventKind::CoinsChanged, EventKind::TotalsChanged]);
    }

    #[test]
    fn overflowing_add_seals_with_overflow() {
        let (mut jar, rx, _) = jar(100);
        jar.add_coins(95);
        let _ = kinds(&rx);

        let outcome = jar.add_coins(10);
        assert_eq!(
            outcome,
            AddOutcome {
                added: 5,
                overflow: 5,
                sealed: true
            }
        );
        assert_eq!(jar.coins(), 0);
        assert_eq!(jar.archives().len(), 1);
        assert_eq!(jar.archives().list()[0].coins, 100);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events[0], JarEvent::CoinsChanged { count: 100 });
        assert!(matches!(events[1], JarEvent::JarFilled { overflow: 5, .. }));
        assert_eq!(events[2].kind(), EventKind::ArchivesUpdated);
        assert_eq!(events[3], JarEvent::CoinsChanged { count: 0 });
        assert_eq!(events[4].kind(), EventKind::TotalsChanged);

        let follow_up = jar.add_coins(5);
        assert_eq!(
            follow_up,
            AddOutcome {
                added: 5,
                overflow: 0,
                sealed: false
            }
        );
    }

    #[test]
    fn seal_moves_title_and_tasks_into_archive() {
        let (mut jar, _rx, _) = jar(20);
        jar.set_pending_title(Some("  週末の片付け "));
        jar.register_tasks_from_text("買い物: 牛乳を買う\n\n次のタスク");
        jar.add_coins(20);

        let archive = &jar.archives().list()[0];
        assert_eq!(archive.title, "週末の片付け");
        assert_eq!(archive.tasks.len(), 2);
        assert_eq!(archive.thumbnail_ref, DEFAULT_THUMBNAIL);
        assert!(jar.tasks().is_empty());
        assert_eq!(jar.pending_title(), None);
    }

    #[test]
    fn default_title_uses_date() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert_eq!(default_archive_title(date), "2026/1/5の成果");
        let (mut jar, _rx, _) = jar(20);
        jar.add_coins(20);
        assert!(jar.archives().list()[0].title.ends_with("の成果"));
    }

    #[test]
    fn shrinking_capacity_truncates_without_sealing() {
        let (mut jar, rx, _) = jar(100);
        jar.add_coins(80);
        let _ = kinds(&rx);

        assert!(jar.set_capacity(50));
        assert_eq!(jar.coins(), 50);
        assert!(jar.archives().is_empty());
        let seen = kinds(&rx);
        assert!(!seen.contains(&EventKind::JarFilled));
        assert_eq!(seen[0], EventKind::CoinsChanged);
        assert_eq!(seen[1], EventKind::CapacityChanged);
    }

    #[test]
    fn unchanged_capacity_is_a_no_op() {
        let (mut jar, rx, _) = jar(100);
        assert!(!jar.set_capacity(100));
        assert!(kinds(&rx).is_empty());

        assert!(jar.set_capacity(5_000));
        assert_eq!(jar.capacity(), 500);
        let _ = kinds(&rx);
        assert!(!jar.set_capacity(600));
        assert!(kinds(&rx).is_empty());
    }

    #[test]
    fn stale_remote_overfill_does_not_seal() {
        let (mut jar, _rx, _) = jar(20);
        let incoming = VersionedPayload::from_value(json!({
            "coins": 30,
            "tasks": [],
            "pendingTitle": null,
            "updatedAt": "2099-01-01T00:00:00.000Z"
        }))
        .unwrap();
        assert!(jar.apply_remote_state(&incoming));
        assert_eq!(jar.coins(), 30);

        let outcome = jar.add_coins(3);
        assert_eq!(
            outcome,
            AddOutcome {
                added: 0,
                overflow: 3,
                sealed: false
            }
        );
        assert!(jar.archives().is_empty());
    }

    #[test]
    fn remote_capacity_truncation_keeps_version() {
        let (mut jar, rx, persist) = jar(100);
        jar.add_coins(60);
        let version = jar.updated_at();
        let _ = kinds(&rx);

        assert!(jar.adopt_remote_capacity(40));
        assert_eq!(jar.coins(), 40);
        assert_eq!(jar.updated_at(), version);
        assert_eq!(
            kinds(&rx),
            vec![
                EventKind::CoinsChanged,
                EventKind::CapacityChanged,
                EventKind::TotalsChanged
            ]
        );

        let stored = load_snapshot(&persist, STATE_KEY).unwrap();
        assert_eq!(stored.field("coins"), Some(&json!(40)));
        assert_eq!(stored.updated_at, version);
    }

    #[test]
    fn full_jar_after_truncation_seals_on_next_add() {
        let (mut jar, _rx, _) = jar(100);
        jar.add_coins(60);
        jar.set_capacity(40);
        let outcome = jar.add_coins(2);
        assert!(outcome.sealed);
        assert_eq!(outcome.overflow, 2);
        assert_eq!(jar.archives().list()[0].coins, 40);
    }

    #[test]
    fn state_survives_restart() {
        let (mut jar, _rx, persist) = jar(100);
        jar.add_coins(12);
        jar.register_task(&PendingTask::new("散歩", Some("30分")).unwrap());
        jar.set_pending_title(Some("朝"));

        let restored = JarStateMachine::new(
            Arc::new(persist),
            SyncGateway::disabled(),
            EventBus::new(),
            100,
        );
        assert_eq!(restored.coins(), 12);
        assert_eq!(restored.tasks().len(), 1);
        assert_eq!(restored.pending_title(), Some("朝"));
        assert_eq!(restored.updated_at(), jar.updated_at());
    }

    #[test]
    fn stale_remote_state_is_ignored() {
        let (mut jar, rx, _) = jar(100);
        jar.add_coins(10);
        let _ = kinds(&rx);
        let stale = VersionedPayload::new(json!({"coins": 50}), jar.updated_at());
        assert!(!jar.apply_remote_state(&stale));
        assert_eq!(jar.coins(), 10);
        assert!(kinds(&rx).is_empty());
    }

    #[test]
    fn totals_include_open_cycle() {
        let (mut jar, _rx, _) = jar(20);
        jar.register_task(&PendingTask::new("a", None).unwrap());
        jar.add_coins(20);
        jar.add_coins(3);
        jar.register_task(&PendingTask::new("b", None).unwrap());
        assert_eq!(jar.totals(), Totals { coins: 23, tasks: 2 });
    }

    #[test]
    fn custom_thumbnail_source() {
        struct Fixed;
        impl ThumbnailSource for Fixed {
            fn thumbnail_for(&self, title: &str, capacity: u32, _: DateTime<Utc>) -> String {
                format!("thumb://{capacity}/{title}")
            }
        }
        let (jar, _rx, _) = jar(20);
        let mut jar = jar.with_thumbnails(Box::new(Fixed));
        jar.set_pending_title(Some("x"));
        jar.add_coins(25);
        assert_eq!(jar.archives().list()[0].thumbnail_ref, "thumb://20/x");
    }
}
