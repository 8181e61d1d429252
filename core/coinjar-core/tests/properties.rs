//! Property tests for the jar arithmetic, settings clamping and LWW delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use coinjar_core::{
    parse_tasks, DispatchMode, EventBus, EventKind, JarEvent, JarStateMachine, MemoryStore,
    Resource, RoomStore, Settings, SettingsPatch, SyncGateway,
};
use proptest::prelude::*;
use serde_json::json;

fn jar(capacity: u32) -> (JarStateMachine, std::sync::mpsc::Receiver<JarEvent>) {
    let events = EventBus::new();
    let (_, rx) = events.channel();
    let jar = JarStateMachine::new(
        Arc::new(MemoryStore::new()),
        SyncGateway::disabled(),
        events,
        capacity,
    );
    (jar, rx)
}

fn stamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

fn settings_strategy() -> impl Strategy<Value = Settings> {
    (20u32..=500, 30u32..=400, 0.0f64..=0.8, 0.0f64..=1.0, 0.0f64..=1.0).prop_map(
        |(jar_capacity, drop_interval, coin_bounciness, coin_friction, coin_static_friction)| {
            Settings {
                jar_capacity,
                drop_interval,
                coin_bounciness,
                coin_friction,
                coin_static_friction,
            }
        },
    )
}

proptest! {
    #[test]
    fn prop_add_below_capacity_is_exact(
        capacity in 20u32..=500,
        start in 0u32..500,
        amount in 1i64..500,
    ) {
        let start = start % capacity;
        prop_assume!((start as i64) + amount < capacity as i64);
        let (mut jar, _rx) = jar(capacity);
        jar.add_coins(start as i64);

        let outcome = jar.add_coins(amount);
        prop_assert_eq!(outcome.added as i64, amount);
        prop_assert_eq!(outcome.overflow, 0);
        prop_assert!(!outcome.sealed);
        prop_assert_eq!(jar.coins() as i64, start as i64 + amount);
    }

    #[test]
    fn prop_filling_add_seals_exactly_once(
        capacity in 20u32..=500,
        start in 0u32..500,
        amount in 1i64..2_000,
    ) {
        let start = start % capacity;
        prop_assume!((start as i64) + amount >= capacity as i64);
        let (mut jar, rx) = jar(capacity);
        jar.add_coins(start as i64);
        let _ = rx.try_iter().count();

        let outcome = jar.add_coins(amount);
        prop_assert!(outcome.sealed);
        prop_assert_eq!(jar.coins(), 0);
        prop_assert_eq!(jar.archives().len(), 1);
        prop_assert_eq!(jar.archives().list()[0].coins, capacity);
        prop_assert_eq!(outcome.overflow as i64, (amount - (capacity - start) as i64).max(0));

        let fills = rx.try_iter().filter(|event| event.kind() == EventKind::JarFilled).count();
        prop_assert_eq!(fills, 1);
    }

    #[test]
    fn prop_set_capacity_never_fills(start in 0u32..500, capacity in 0u32..1_000) {
        let (mut jar, rx) = jar(500);
        jar.add_coins(start as i64);
        jar.set_capacity(capacity);

        prop_assert!(jar.archives().is_empty());
        prop_assert!(jar.coins() <= jar.capacity());
        prop_assert!(rx.try_iter().all(|event| event.kind() != EventKind::JarFilled));
    }

    #[test]
    fn prop_clamp_is_a_fixed_point(settings in settings_strategy()) {
        prop_assert_eq!(settings.clamped(), settings);
    }

    #[test]
    fn prop_sanitized_settings_are_in_range(
        capacity in proptest::num::f64::ANY,
        interval in proptest::num::f64::ANY,
        bounce in proptest::num::f64::ANY,
    ) {
        let patched = Settings::default().apply(&SettingsPatch {
            jar_capacity: Some(capacity),
            drop_interval: Some(interval),
            coin_bounciness: Some(bounce),
            ..SettingsPatch::default()
        });
        prop_assert!((20..=500).contains(&patched.jar_capacity));
        prop_assert!((30..=400).contains(&patched.drop_interval));
        prop_assert!((0.0..=0.8).contains(&patched.coin_bounciness));
        prop_assert_eq!(patched.clamped(), patched);
    }

    #[test]
    fn prop_only_strictly_newer_snapshots_apply(offsets in prop::collection::vec(0i64..50, 1..20)) {
        let room = RoomStore::new();
        let gateway = SyncGateway::new(
            Arc::new(room.transport("r", None)),
            Duration::from_secs(5),
            DispatchMode::Inline,
        );
        let subscription = gateway.subscribe(Resource::State);

        let mut newest: Option<i64> = None;
        let mut expected = Vec::new();
        for offset in &offsets {
            room.put_document(
                "r",
                Resource::State,
                json!({"coins": offset, "updatedAt": stamp(*offset).to_rfc3339()}),
            );
            gateway.pull(Resource::State);
            if newest.map_or(true, |current| *offset > current) {
                newest = Some(*offset);
                expected.push(stamp(*offset));
            }
        }

        let delivered: Vec<_> = subscription
            .drain()
            .into_iter()
            .map(|snapshot| snapshot.updated_at)
            .collect();
        prop_assert_eq!(delivered, expected);
    }

    #[test]
    fn prop_task_parsing_never_drops_input(text in "[a-zあ-ん:| \n-]{1,60}") {
        let tasks = parse_tasks(&text);
        if text.trim().is_empty() {
            prop_assert!(tasks.is_empty());
        } else {
            prop_assert!(!tasks.is_empty());
        }
        prop_assert_eq!(parse_tasks(&text), tasks);
    }
}
