//! Network seam for the sync gateway.
//!
//! `HttpTransport` talks to the room endpoint; `MemoryTransport` implements the
//! same server semantics in-process so several engines can share a room in
//! tests and demos.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use coinjar_protocol::{authorize_bearer, extract_updated_at, PutAck, Resource, BEARER_PREFIX};
use serde_json::Value;
use url::Url;

use crate::error::SyncError;

pub trait Transport: Send + Sync {
    /// `Ok(None)` when the room has no copy of the resource yet.
    fn fetch(&self, resource: Resource) -> Result<Option<Value>, SyncError>;

    fn store(&self, resource: Resource, body: &Value) -> Result<PutAck, SyncError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════════

pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: Url,
    room_code: String,
    auth_token: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("room_code", &self.room_code)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        room_code: &str,
        auth_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let parsed = Url::parse(base_url.trim()).map_err(|err| SyncError::InvalidUrl {
            url: base_url.to_string(),
            details: err.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl {
                url: base_url.to_string(),
                details: "URL cannot carry a path".to_string(),
            });
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            base_url: parsed,
            room_code: room_code.to_string(),
            auth_token: auth_token
                .map(str::to_string)
                .filter(|token| !token.is_empty()),
        })
    }

    /// `{base}/rooms/{room}/{resource}` with the room code percent-encoded.
    pub fn resource_url(&self, resource: Resource) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("rooms")
                .push(&self.room_code)
                .push(resource.as_str());
        }
        url
    }

    fn request(&self, method: &str, resource: Resource) -> ureq::Request {
        let request = self
            .agent
            .request(method, self.resource_url(resource).as_str())
            .set("Accept", "application/json");
        match &self.auth_token {
            Some(token) => request.set("Authorization", &format!("{}{}", BEARER_PREFIX, token)),
            None => request,
        }
    }

    fn read_json(resource: Resource, response: ureq::Response) -> Result<Value, SyncError> {
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|err| SyncError::Transport {
                resource,
                details: err.to_string(),
            })?;
        serde_json::from_str(&body).map_err(|err| SyncError::Malformed {
            resource,
            details: err.to_string(),
        })
    }
}

fn map_ureq_error(resource: Resource, err: ureq::Error) -> SyncError {
    match err {
        ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => {
            SyncError::Unauthorized { resource }
        }
        ureq::Error::Status(status, _) => SyncError::Status { resource, status },
        ureq::Error::Transport(transport) => SyncError::Transport {
            resource,
            details: transport.to_string(),
        },
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, resource: Resource) -> Result<Option<Value>, SyncError> {
        match self.request("GET", resource).call() {
            Ok(response) => Self::read_json(resource, response).map(Some),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(map_ureq_error(resource, err)),
        }
    }

    fn store(&self, resource: Resource, body: &Value) -> Result<PutAck, SyncError> {
        let sent_at = Utc::now();
        let encoded = serde_json::to_string(body).map_err(|err| SyncError::Malformed {
            resource,
            details: err.to_string(),
        })?;
        let response = self
            .request("PUT", resource)
            .set("Content-Type", "application/json")
            .send_string(&encoded)
            .map_err(|err| map_ureq_error(resource, err))?;
        let ack = Self::read_json(resource, response)?;
        // Servers that answer with an empty object still accepted the body.
        Ok(PutAck::accepted(extract_updated_at(&ack, extract_updated_at(body, sent_at))))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-process room
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct RoomInner {
    resources: HashMap<(String, Resource), Value>,
    offline: bool,
    fetches: usize,
    stores: usize,
}

/// Shared room storage with the endpoint's semantics: one document per
/// (room, resource), stored as received.
#[derive(Clone, Default)]
pub struct RoomStore {
    inner: Arc<Mutex<RoomInner>>,
    shared_token: Option<String>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::default(),
            shared_token: Some(token.into()),
        }
    }

    /// While offline every request fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn document(&self, room_code: &str, resource: Resource) -> Option<Value> {
        self.lock()
            .resources
            .get(&(room_code.to_string(), resource))
            .cloned()
    }

    /// Writes a document directly, bypassing auth and the offline switch.
    pub fn put_document(&self, room_code: &str, resource: Resource, body: Value) {
        self.lock()
            .resources
            .insert((room_code.to_string(), resource), body);
    }

    pub fn request_counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.fetches, inner.stores)
    }

    pub fn transport(&self, room_code: &str, auth_token: Option<&str>) -> MemoryTransport {
        MemoryTransport {
            room: self.clone(),
            room_code: room_code.to_string(),
            header: auth_token.map(|token| format!("{}{}", BEARER_PREFIX, token)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    room: RoomStore,
    room_code: String,
    header: Option<String>,
}

impl MemoryTransport {
    fn check(&self, resource: Resource, inner: &RoomInner) -> Result<(), SyncError> {
        if inner.offline {
            return Err(SyncError::Transport {
                resource,
                details: "room is offline".to_string(),
            });
        }
        if !authorize_bearer(self.header.as_deref(), self.room.shared_token.as_deref()) {
            return Err(SyncError::Unauthorized { resource });
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn fetch(&self, resource: Resource) -> Result<Option<Value>, SyncError> {
        let mut inner = self.room.lock();
        inner.fetches += 1;
        self.check(resource, &inner)?;
        Ok(inner
            .resources
            .get(&(self.room_code.clone(), resource))
            .cloned())
    }

    fn store(&self, resource: Resource, body: &Value) -> Result<PutAck, SyncError> {
        let mut inner = self.room.lock();
        inner.stores += 1;
        self.check(resource, &inner)?;
        if !body.is_object() {
            return Err(SyncError::Status {
                resource,
                status: 400,
            });
        }
        let updated_at = extract_updated_at(body, Utc::now());
        inner
            .resources
            .insert((self.room_code.clone(), resource), body.clone());
        Ok(PutAck::accepted(updated_at))
    }
}
