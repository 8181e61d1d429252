//! Tunable jar parameters with clamping, persistence and room sync.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use coinjar_protocol::{epoch, next_version, read_number, Resource, VersionedPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{EventBus, JarEvent};
use crate::persist::{load_snapshot, save_snapshot, PersistentStore, SETTINGS_KEY};
use crate::sync::{RawSnapshot, Subscription, SyncGateway};

pub const CAPACITY_RANGE: (u32, u32) = (20, 500);
pub const DROP_INTERVAL_RANGE: (u32, u32) = (30, 400);
pub const BOUNCINESS_RANGE: (f64, f64) = (0.0, 0.8);
pub const FRICTION_RANGE: (f64, f64) = (0.0, 1.0);

const EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub jar_capacity: u32,
    /// Milliseconds between dropped coins.
    pub drop_interval: u32,
    pub coin_bounciness: f64,
    pub coin_friction: f64,
    pub coin_static_friction: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jar_capacity: 100,
            drop_interval: 90,
            coin_bounciness: 0.12,
            coin_friction: 0.45,
            coin_static_friction: 0.9,
        }
    }
}

/// Partial update. Values are raw numbers so hosts can pass whatever a UI
/// produced; `apply` sanitizes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub jar_capacity: Option<f64>,
    pub drop_interval: Option<f64>,
    pub coin_bounciness: Option<f64>,
    pub coin_friction: Option<f64>,
    pub coin_static_friction: Option<f64>,
}

impl SettingsPatch {
    pub fn capacity(value: f64) -> Self {
        Self {
            jar_capacity: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub fn clamp_capacity(value: f64, previous: u32) -> u32 {
    clamp_int(value, previous, CAPACITY_RANGE)
}

fn clamp_int(value: f64, previous: u32, (min, max): (u32, u32)) -> u32 {
    if !value.is_finite() {
        return previous.clamp(min, max);
    }
    value.round().clamp(min as f64, max as f64) as u32
}

fn clamp_float(value: f64, previous: f64, (min, max): (f64, f64)) -> f64 {
    let value = if value.is_finite() { value } else { previous };
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

impl Settings {
    /// Merges a patch over `self`. Non-finite fields keep the current value.
    pub fn apply(&self, patch: &SettingsPatch) -> Settings {
        Settings {
            jar_capacity: clamp_int(
                patch.jar_capacity.unwrap_or(self.jar_capacity as f64),
                self.jar_capacity,
                CAPACITY_RANGE,
            ),
            drop_interval: clamp_int(
                patch.drop_interval.unwrap_or(self.drop_interval as f64),
                self.drop_interval,
                DROP_INTERVAL_RANGE,
            ),
            coin_bounciness: clamp_float(
                patch.coin_bounciness.unwrap_or(self.coin_bounciness),
                self.coin_bounciness,
                BOUNCINESS_RANGE,
            ),
            coin_friction: clamp_float(
                patch.coin_friction.unwrap_or(self.coin_friction),
                self.coin_friction,
                FRICTION_RANGE,
            ),
            coin_static_friction: clamp_float(
                patch.coin_static_friction.unwrap_or(self.coin_static_friction),
                self.coin_static_friction,
                FRICTION_RANGE,
            ),
        }
    }

    pub fn clamped(&self) -> Settings {
        self.apply(&SettingsPatch::default())
    }

    /// Integer fields exact, coefficients within 1e-4.
    pub fn approx_eq(&self, other: &Settings) -> bool {
        self.jar_capacity == other.jar_capacity
            && self.drop_interval == other.drop_interval
            && (self.coin_bounciness - other.coin_bounciness).abs() < EPSILON
            && (self.coin_friction - other.coin_friction).abs() < EPSILON
            && (self.coin_static_friction - other.coin_static_friction).abs() < EPSILON
    }

    /// Field-level lenient decode: wrong or missing fields keep `fallback`.
    pub fn from_value(value: &Value, fallback: &Settings) -> Settings {
        fallback.apply(&SettingsPatch {
            jar_capacity: read_number(value.get("jarCapacity")),
            drop_interval: read_number(value.get("dropInterval")),
            coin_bounciness: read_number(value.get("coinBounciness")),
            coin_friction: read_number(value.get("coinFriction")),
            coin_static_friction: read_number(value.get("coinStaticFriction")),
        })
    }
}

/// Wire shape of the `settings` resource.
#[derive(Debug, Clone, Serialize)]
struct SettingsDocument {
    settings: Settings,
}

/// Reads `{settings: {...}}`, tolerating a bare settings object.
fn decode_document(payload: &Value, fallback: &Settings) -> Settings {
    match payload.get("settings") {
        Some(inner) if inner.is_object() => Settings::from_value(inner, fallback),
        _ => Settings::from_value(payload, fallback),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

pub struct SettingsStore {
    current: Settings,
    updated_at: DateTime<Utc>,
    persist: Arc<dyn PersistentStore>,
    gateway: SyncGateway,
    events: EventBus,
    subscription: Subscription,
}

impl SettingsStore {
    /// Loads the persisted copy over `defaults` and subscribes to the room.
    pub fn new(
        persist: Arc<dyn PersistentStore>,
        gateway: SyncGateway,
        events: EventBus,
        defaults: Settings,
    ) -> Self {
        let defaults = defaults.clamped();
        let (current, updated_at) = match load_snapshot(persist.as_ref(), SETTINGS_KEY) {
            Some(snapshot) => (
                decode_document(&snapshot.payload, &defaults),
                snapshot.updated_at,
            ),
            None => (defaults, epoch()),
        };
        gateway.seed_version(Resource::Settings, updated_at);
        let subscription = gateway.subscribe(Resource::Settings);
        Self {
            current,
            updated_at,
            persist,
            gateway,
            events,
            subscription,
        }
    }

    pub fn get(&self) -> Settings {
        self.current
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Clamps and merges `patch`. Persists, pushes and emits only if the
    /// result actually differs.
    pub fn update(&mut self, patch: &SettingsPatch) -> Settings {
        let merged = self.current.apply(patch);
        if merged.approx_eq(&self.current) {
            tracing::debug!("Settings update is a no-op");
            return self.current;
        }
        self.current = merged;
        self.updated_at = next_version(self.updated_at);
        let snapshot = self.snapshot();
        save_snapshot(self.persist.as_ref(), SETTINGS_KEY, &snapshot);
        self.gateway.push(Resource::Settings, &snapshot);
        tracing::info!(capacity = merged.jar_capacity, "Settings updated");
        self.events.emit(&JarEvent::SettingsChanged { settings: merged });
        self.current
    }

    /// Applies a remote snapshot if it is newer than the local version.
    /// Returns true when the effective settings changed.
    pub fn apply_remote(&mut self, snapshot: &RawSnapshot) -> bool {
        if !snapshot.is_newer_than(self.updated_at) {
            tracing::debug!("Ignoring stale remote settings");
            return false;
        }
        let incoming = decode_document(&snapshot.payload, &self.current);
        self.updated_at = snapshot.updated_at;
        save_snapshot(self.persist.as_ref(), SETTINGS_KEY, &self.snapshot_of(incoming));
        if incoming.approx_eq(&self.current) {
            return false;
        }
        self.current = incoming;
        tracing::info!(capacity = incoming.jar_capacity, "Applied remote settings");
        self.events.emit(&JarEvent::SettingsChanged { settings: incoming });
        true
    }

    /// Applies everything the gateway delivered since the last call.
    pub fn process_remote(&mut self) -> bool {
        let mut changed = false;
        for snapshot in self.subscription.drain() {
            changed |= self.apply_remote(&snapshot);
        }
        changed
    }

    fn snapshot(&self) -> VersionedPayload<SettingsDocument> {
        self.snapshot_of(self.current)
    }

    fn snapshot_of(&self, settings: Settings) -> VersionedPayload<SettingsDocument> {
        VersionedPayload::new(SettingsDocument { settings }, self.updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::persist::MemoryStore;
    use coinjar_protocol::parse_timestamp;
    use serde_json::json;

    fn store_with(persist: MemoryStore) -> (SettingsStore, std::sync::mpsc::Receiver<JarEvent>) {
        let events = EventBus::new();
        let (_, rx) = events.channel();
        let store = SettingsStore::new(
            Arc::new(persist),
            SyncGateway::disabled(),
            events,
            Settings::default(),
        );
        (store, rx)
    }

    #[test]
    fn clamping_valid_settings_is_a_fixed_point() {
        let settings = Settings::default();
        assert_eq!(settings.clamped(), settings);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let patched = Settings::default().apply(&SettingsPatch {
            jar_capacity: Some(1_000.0),
            drop_interval: Some(1.0),
            coin_bounciness: Some(2.0),
            coin_friction: Some(-1.0),
            coin_static_friction: Some(0.5),
        });
        assert_eq!(patched.jar_capacity, 500);
        assert_eq!(patched.drop_interval, 30);
        assert_eq!(patched.coin_bounciness, 0.8);
        assert_eq!(patched.coin_friction, 0.0);
        assert_eq!(patched.coin_static_friction, 0.5);
    }

    #[test]
    fn non_finite_values_keep_previous() {
        let previous = Settings {
            jar_capacity: 60,
            ..Settings::default()
        };
        let patched = previous.apply(&SettingsPatch {
            jar_capacity: Some(f64::NAN),
            coin_friction: Some(f64::INFINITY),
            ..SettingsPatch::default()
        });
        assert_eq!(patched.jar_capacity, 60);
        assert_eq!(patched.coin_friction, previous.coin_friction);
    }

    #[test]
    fn capacity_is_rounded() {
        let patched = Settings::default().apply(&SettingsPatch::capacity(42.6));
        assert_eq!(patched.jar_capacity, 43);
    }

    #[test]
    fn lenient_decode_keeps_fallback_for_bad_fields() {
        let decoded = Settings::from_value(
            &json!({"jarCapacity": "lots", "dropInterval": 120, "coinFriction": null}),
            &Settings::default(),
        );
        assert_eq!(decoded.jar_capacity, 100);
        assert_eq!(decoded.drop_interval, 120);
        assert_eq!(decoded.coin_friction, 0.45);
    }

    #[test]
    fn update_emits_once_and_persists() {
        let persist = MemoryStore::new();
        let (mut store, rx) = store_with(persist.clone());

        store.update(&SettingsPatch::capacity(50.0));
        store.update(&SettingsPatch::capacity(50.2));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::SettingsChanged);
        let saved = load_snapshot(&persist, SETTINGS_KEY).unwrap();
        assert_eq!(saved.payload["settings"]["jarCapacity"], json!(50));
        assert_eq!(saved.updated_at, store.updated_at());
    }

    #[test]
    fn tiny_coefficient_changes_are_ignored() {
        let (mut store, rx) = store_with(MemoryStore::new());
        store.update(&SettingsPatch {
            coin_friction: Some(0.45 + 0.00001),
            ..SettingsPatch::default()
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(store.updated_at(), epoch());
    }

    #[test]
    fn loads_persisted_snapshot() {
        let persist = MemoryStore::new();
        persist.write(
            SETTINGS_KEY,
            r#"{"settings":{"jarCapacity":250,"dropInterval":60},"updatedAt":"2026-01-01T00:00:00.000Z"}"#,
        );
        let (store, _) = store_with(persist);
        assert_eq!(store.get().jar_capacity, 250);
        assert_eq!(store.get().drop_interval, 60);
        assert_eq!(store.get().coin_bounciness, 0.12);
    }

    #[test]
    fn stale_remote_settings_are_ignored() {
        let (mut store, rx) = store_with(MemoryStore::new());
        store.update(&SettingsPatch::capacity(80.0));
        let _ = rx.try_iter().count();

        let stale = VersionedPayload::new(
            json!({"settings": {"jarCapacity": 300}}),
            store.updated_at() - chrono::Duration::seconds(1),
        );
        assert!(!store.apply_remote(&stale));
        assert_eq!(store.get().jar_capacity, 80);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn newer_remote_settings_apply_and_emit() {
        let (mut store, rx) = store_with(MemoryStore::new());
        let at = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        let incoming = VersionedPayload::new(json!({"settings": {"jarCapacity": 300}}), at);
        assert!(store.apply_remote(&incoming));
        assert_eq!(store.get().jar_capacity, 300);
        assert_eq!(store.updated_at(), at);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn newer_remote_with_equal_values_is_silent() {
        let (mut store, rx) = store_with(MemoryStore::new());
        let at = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        let incoming = VersionedPayload::new(json!({"settings": Settings::default()}), at);
        assert!(!store.apply_remote(&incoming));
        assert_eq!(store.updated_at(), at);
        assert!(rx.try_recv().is_err());
    }
}
