//! Sealed jar cycles, newest first.
//!
//! The list is one resource: a newer remote copy replaces it wholesale. Two
//! clients sealing at overlapping times keep whichever list was written last.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use coinjar_protocol::{
    epoch, format_timestamp, next_version, read_count, read_string, Resource, VersionedPayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::persist::{load_snapshot, save_snapshot, PersistentStore, ARCHIVES_KEY};
use crate::sync::{RawSnapshot, Subscription, SyncGateway};
use crate::tasks::PendingTask;

pub const ARCHIVE_PAGE_SIZE: usize = 6;
pub const DEFAULT_THUMBNAIL: &str = "/default-thumb.svg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct Archive {
    pub id: String,
    pub title: String,
    /// Capacity of the jar when it was sealed.
    pub coins: u32,
    pub created_at: String,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_ref: String,
    #[serde(default)]
    pub tasks: Vec<PendingTask>,
}

impl Archive {
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        Some(Self {
            id: read_string(value.get("id")).unwrap_or_default(),
            title: read_string(value.get("title")).unwrap_or_default(),
            coins: read_count(value.get("coins")).unwrap_or(0),
            created_at: read_string(value.get("createdAt"))
                .unwrap_or_else(|| format_timestamp(&Utc::now())),
            thumbnail_ref: read_string(value.get("thumbnailUrl"))
                .unwrap_or_else(|| DEFAULT_THUMBNAIL.to_string()),
            tasks: PendingTask::list_from_value(value.get("tasks")),
        })
    }

    pub fn list_from_value(value: Option<&Value>) -> Vec<Self> {
        value
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Self::from_value).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct ArchivePage {
    pub entries: Vec<Archive>,
    /// Zero-based, clamped into range.
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize)]
struct ArchivesDocument<'a> {
    entries: &'a [Archive],
}

pub struct ArchiveStore {
    entries: Vec<Archive>,
    updated_at: DateTime<Utc>,
    persist: Arc<dyn PersistentStore>,
    gateway: SyncGateway,
    subscription: Subscription,
}

impl ArchiveStore {
    pub fn new(persist: Arc<dyn PersistentStore>, gateway: SyncGateway) -> Self {
        let (entries, updated_at) = match load_snapshot(persist.as_ref(), ARCHIVES_KEY) {
            Some(snapshot) => (
                Archive::list_from_value(snapshot.field("entries")),
                snapshot.updated_at,
            ),
            None => (Vec::new(), epoch()),
        };
        gateway.seed_version(Resource::Archives, updated_at);
        let subscription = gateway.subscribe(Resource::Archives);
        Self {
            entries,
            updated_at,
            persist,
            gateway,
            subscription,
        }
    }

    pub fn list(&self) -> &[Archive] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn total_pages(&self) -> usize {
        self.entries.len().div_ceil(ARCHIVE_PAGE_SIZE).max(1)
    }

    pub fn page(&self, index: usize) -> ArchivePage {
        let total_pages = self.total_pages();
        let page = index.min(total_pages - 1);
        let entries = self
            .entries
            .iter()
            .skip(page * ARCHIVE_PAGE_SIZE)
            .take(ARCHIVE_PAGE_SIZE)
            .cloned()
            .collect();
        ArchivePage {
            entries,
            page: page as u32,
            total_pages: total_pages as u32,
        }
    }

    pub fn total_coins(&self) -> u64 {
        self.entries.iter().map(|entry| entry.coins as u64).sum()
    }

    pub fn total_tasks(&self) -> u64 {
        self.entries.iter().map(|entry| entry.tasks.len() as u64).sum()
    }

    /// Prepends a freshly sealed archive, then persists and pushes the list.
    pub fn seal(&mut self, archive: Archive) {
        self.entries.insert(0, archive);
        self.updated_at = next_version(self.updated_at);
        self.save_and_push();
    }

    /// Replaces the list with a newer remote copy. Returns true if applied.
    pub fn apply_remote(&mut self, snapshot: &RawSnapshot) -> bool {
        if !snapshot.is_newer_than(self.updated_at) {
            tracing::debug!("Ignoring stale remote archives");
            return false;
        }
        self.entries = Archive::list_from_value(snapshot.field("entries"));
        self.updated_at = snapshot.updated_at;
        save_snapshot(self.persist.as_ref(), ARCHIVES_KEY, &self.snapshot());
        tracing::info!(count = self.entries.len(), "Applied remote archives");
        true
    }

    pub fn process_remote(&mut self) -> bool {
        let mut applied = false;
        for snapshot in self.subscription.drain() {
            applied |= self.apply_remote(&snapshot);
        }
        applied
    }

    fn snapshot(&self) -> VersionedPayload<ArchivesDocument<'_>> {
        VersionedPayload::new(
            ArchivesDocument {
                entries: &self.entries,
            },
            self.updated_at,
        )
    }

    fn save_and_push(&self) {
        let snapshot = self.snapshot();
        save_snapshot(self.persist.as_ref(), ARCHIVES_KEY, &snapshot);
        self.gateway.push(Resource::Archives, &snapshot);
    }
}
