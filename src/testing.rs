/// In-memory collaborators for unit tests
use crate::credentials::{CredentialSet, CredentialStore};
use crate::delivery::{DeliveryScheduler, PanelChannel};
use crate::error::{HostError, StorageError, TransportError};
use crate::gateway::{HttpRequest, HttpResponse, HttpTransport, SessionNavigator};
use crate::messages::{Destination, OutboundMessage};
use crate::router::PanelHost;
use async_trait::async_trait;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::poll_fn;
use std::task::Poll;

#[derive(Default)]
pub struct RecordingChannel {
    sent: RefCell<Vec<OutboundMessage>>,
    acker: RefCell<Option<DeliveryScheduler>>,
}

impl RecordingChannel {
    /// Acknowledge every delivery as soon as it is broadcast
    pub fn ack_with(&self, scheduler: DeliveryScheduler) {
        *self.acker.borrow_mut() = Some(scheduler);
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.borrow().clone()
    }

    pub fn payloads_for(&self, id: &str) -> Vec<Value> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::PanelDeliver {
                    request_id,
                    payload,
                    ..
                } if request_id == id => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deliveries_for(&self, id: &str) -> usize {
        self.payloads_for(id).len()
    }
}

impl PanelChannel for RecordingChannel {
    fn broadcast(&self, message: &OutboundMessage) {
        self.sent.borrow_mut().push(message.clone());
        let OutboundMessage::PanelDeliver { request_id, .. } = message;
        if let Some(scheduler) = self.acker.borrow().as_ref() {
            scheduler.acknowledge(request_id);
        }
    }
}

/// Transport answering from a table keyed by URL and bearer token
#[derive(Default)]
pub struct ScriptedTransport {
    script: RefCell<HashMap<(String, Option<String>), Result<HttpResponse, TransportError>>>,
    sent: RefCell<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn respond(
        &self,
        url: &str,
        bearer: Option<&str>,
        result: Result<HttpResponse, TransportError>,
    ) {
        self.script
            .borrow_mut()
            .insert((url.to_string(), bearer.map(str::to_string)), result);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.sent.borrow().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.sent.borrow().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait(?Send)]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.sent.borrow_mut().push(request.clone());
        let key = (request.url.clone(), request.bearer().map(str::to_string));
        self.script
            .borrow()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::new(format!("unscripted request {key:?}"))))
    }
}

/// `ScriptedTransport` whose answers arrive one poll late, so joined
/// requests interleave the way concurrent fetches do
#[derive(Default)]
pub struct DeferredTransport {
    pub script: ScriptedTransport,
}

#[async_trait(?Send)]
impl HttpTransport for DeferredTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut pending = true;
        poll_fn(|cx| {
            if pending {
                pending = false;
                cx.waker().wake_by_ref();
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await;
        self.script.send(request).await
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: RefCell<CredentialSet>,
    failing_reads: Cell<bool>,
}

impl MemoryCredentialStore {
    pub fn with(credentials: CredentialSet) -> Self {
        MemoryCredentialStore {
            credentials: RefCell::new(credentials),
            failing_reads: Cell::new(false),
        }
    }

    pub fn fail_reads(&self) {
        self.failing_reads.set(true);
    }

    pub fn snapshot(&self) -> CredentialSet {
        self.credentials.borrow().clone()
    }
}

#[async_trait(?Send)]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<CredentialSet, StorageError> {
        if self.failing_reads.get() {
            return Err(StorageError("storage unavailable".to_string()));
        }
        Ok(self.snapshot())
    }

    async fn persist(&self, credentials: &CredentialSet) -> Result<(), StorageError> {
        *self.credentials.borrow_mut() = credentials.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.credentials.borrow_mut() = CredentialSet::default();
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    opened: RefCell<Vec<bool>>,
}

impl RecordingNavigator {
    pub fn opened(&self) -> Vec<bool> {
        self.opened.borrow().clone()
    }
}

impl SessionNavigator for RecordingNavigator {
    fn open_login(&self, session_expired: bool) {
        self.opened.borrow_mut().push(session_expired);
    }
}

#[derive(Default)]
pub struct FakeHost {
    tabs: RefCell<Vec<Destination>>,
    active: Cell<Option<Destination>>,
    failing_open: Cell<bool>,
    opened: RefCell<Vec<Destination>>,
}

impl FakeHost {
    pub fn add_tab(&self, destination: Destination) {
        self.tabs.borrow_mut().push(destination);
    }

    pub fn set_active(&self, destination: Destination) {
        self.active.set(Some(destination));
    }

    pub fn clear_active(&self) {
        self.active.set(None);
    }

    pub fn fail_open(&self) {
        self.failing_open.set(true);
    }

    pub fn opened(&self) -> Vec<Destination> {
        self.opened.borrow().clone()
    }
}

#[async_trait(?Send)]
impl PanelHost for FakeHost {
    async fn tab(&self, tab_id: i32) -> Option<Destination> {
        self.tabs.borrow().iter().find(|d| d.tab_id == tab_id).copied()
    }

    async fn active_tab(&self, window_id: Option<i32>) -> Option<Destination> {
        match window_id {
            None => self.active.get(),
            Some(window_id) => self.active.get().filter(|d| d.window_id == window_id),
        }
    }

    async fn open_panel(&self, destination: Destination) -> Result<(), HostError> {
        if self.failing_open.get() {
            return Err(HostError(
                "sidePanel.open may only be called in response to a user gesture".to_string(),
            ));
        }
        self.opened.borrow_mut().push(destination);
        Ok(())
    }
}
