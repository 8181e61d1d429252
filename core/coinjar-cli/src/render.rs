//! JSON rendering for command output. Everything printed to stdout goes
//! through here so scripts can rely on one shape per command.

use coinjar_core::{AddOutcome, ArchivePage, JarEngine, JarEvent, RecordOutcome, Totals};
use coinjar_protocol::format_timestamp;
use serde_json::{json, Value};

pub fn print(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(err) => tracing::warn!(error = %err, "Failed to render output"),
    }
}

pub fn status(engine: &JarEngine) -> Value {
    json!({
        "coins": engine.coins(),
        "capacity": engine.capacity(),
        "pendingTitle": engine.pending_title(),
        "tasks": engine.tasks(),
        "archives": engine.archives().len(),
        "totals": totals(engine.totals()),
        "syncing": engine.gateway().is_enabled(),
        "updatedAt": format_timestamp(&engine.jar().updated_at()),
    })
}

pub fn totals(totals: Totals) -> Value {
    json!({ "coins": totals.coins, "tasks": totals.tasks })
}

pub fn outcome(outcome: &AddOutcome) -> Value {
    json!({
        "added": outcome.added,
        "overflow": outcome.overflow,
        "sealed": outcome.sealed,
    })
}

pub fn record(outcome: &RecordOutcome) -> Value {
    json!({
        "title": outcome.title,
        "coins": outcome.coins,
        "steps": outcome.steps.iter().map(self::outcome).collect::<Vec<_>>(),
    })
}

pub fn page(page: &ArchivePage) -> Value {
    json!({
        "page": page.page,
        "totalPages": page.total_pages,
        "entries": page.entries,
    })
}

pub fn event(event: &JarEvent) -> Value {
    let detail = match event {
        JarEvent::CoinsChanged { count } => json!({ "count": count }),
        JarEvent::JarFilled { archive, overflow } => {
            json!({ "archive": archive, "overflow": overflow })
        }
        JarEvent::ArchivesUpdated { archives } => json!({ "count": archives.len() }),
        JarEvent::CapacityChanged { capacity } => json!({ "capacity": capacity }),
        JarEvent::TotalsChanged { totals } => self::totals(*totals),
        JarEvent::SettingsChanged { settings } => json!(settings),
    };
    json!({ "event": event.kind().as_str(), "detail": detail })
}
