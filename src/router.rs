/// Entry point for every runtime message the background worker receives
use crate::delivery::{DeliveryRequest, DeliveryScheduler};
use crate::error::{CoordinatorError, HostError};
use crate::gateway::{AuthGateway, HttpMethod, HttpRequest, HttpResponse};
use crate::messages::{Destination, DestinationHint, InboundMessage, Intent};
use crate::panel_state::{PanelState, PanelStateCache};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::rc::Rc;
use uuid::Uuid;

/// Tabs and the side panel, as seen by the background worker
#[async_trait(?Send)]
pub trait PanelHost {
    /// The tab with this id, if it still exists
    async fn tab(&self, tab_id: i32) -> Option<Destination>;

    /// The active tab of `window_id`, or of the focused window
    async fn active_tab(&self, window_id: Option<i32>) -> Option<Destination>;

    async fn open_panel(&self, destination: Destination) -> Result<(), HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPanelAck {
    pub accepted: bool,
    pub request_id: String,
}

/// Reply to one inbound message, serialized back to the sender
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DispatchReply {
    Opened(OpenPanelAck),
    Acknowledged { ok: bool, cleared: bool },
    State(Option<PanelState>),
    Api(HttpResponse),
}

pub struct DispatchRouter {
    host: Rc<dyn PanelHost>,
    deliveries: DeliveryScheduler,
    states: PanelStateCache,
    gateway: Rc<AuthGateway>,
}

impl DispatchRouter {
    pub fn new(
        host: Rc<dyn PanelHost>,
        deliveries: DeliveryScheduler,
        states: PanelStateCache,
        gateway: Rc<AuthGateway>,
    ) -> Self {
        DispatchRouter {
            host,
            deliveries,
            states,
            gateway,
        }
    }

    pub fn deliveries(&self) -> &DeliveryScheduler {
        &self.deliveries
    }

    /// Decode and route one message. `sender` fills in a missing destination
    /// hint, e.g. the tab a content script runs in.
    pub async fn dispatch(
        &self,
        message: Value,
        sender: DestinationHint,
    ) -> Result<DispatchReply, CoordinatorError> {
        let known = message
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(InboundMessage::is_known_type);
        let message = InboundMessage::from_value(message).map_err(|e| {
            if known {
                CoordinatorError::InvalidRequest(e.to_string())
            } else {
                CoordinatorError::UnknownMessage(e.to_string())
            }
        })?;

        match message {
            InboundMessage::OpenPanel {
                request_id,
                intent,
                payload,
                destination_hint,
            } => self
                .open_panel(destination_hint.or(sender), intent, payload, request_id)
                .await
                .map(DispatchReply::Opened),
            InboundMessage::PanelDeliverAck { request_id } => {
                let cleared = self.acknowledge(&request_id);
                Ok(DispatchReply::Acknowledged { ok: true, cleared })
            }
            InboundMessage::RequestPanelState { destination_hint } => {
                let state = self.query_state(destination_hint).await;
                Ok(DispatchReply::State(state))
            }
            InboundMessage::ApiRequest { method, path, body } => self
                .api_request(&method, &path, body.as_ref())
                .await
                .map(DispatchReply::Api),
        }
    }

    pub async fn open_panel(
        &self,
        hint: DestinationHint,
        intent: Intent,
        payload: Value,
        request_id: Option<String>,
    ) -> Result<OpenPanelAck, CoordinatorError> {
        let destination = self
            .resolve(hint)
            .await
            .ok_or(CoordinatorError::NoDestination)?;
        let request_id = request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.host.open_panel(destination).await {
            Ok(()) => log::info!(
                "Opened panel for tab {} ({:?}, {})",
                destination.tab_id,
                intent,
                request_id
            ),
            // The panel may already be open; delivery and rehydration still apply
            Err(e) => log::warn!("Could not open panel for tab {}: {}", destination.tab_id, e),
        }

        self.deliveries.schedule(DeliveryRequest::new(
            request_id.clone(),
            destination,
            intent,
            payload,
        ));

        Ok(OpenPanelAck {
            accepted: true,
            request_id,
        })
    }

    /// Returns whether a pending delivery was cleared
    pub fn acknowledge(&self, request_id: &str) -> bool {
        self.deliveries.acknowledge(request_id).is_some()
    }

    pub async fn query_state(&self, hint: Option<DestinationHint>) -> Option<PanelState> {
        let destination = self.resolve(hint.unwrap_or_default()).await?;
        self.states.get(&destination)
    }

    pub async fn api_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, CoordinatorError> {
        let method = HttpMethod::parse(method)
            .ok_or_else(|| CoordinatorError::InvalidRequest(format!("unsupported method {method}")))?;
        let url = self.gateway.endpoint(path).ok_or_else(|| {
            CoordinatorError::InvalidRequest(format!("path {path} is outside the API base URL"))
        })?;

        let mut request = HttpRequest::new(method, url.as_str());
        if let Some(body) = body {
            request = request.json_body(body);
        }
        Ok(self.gateway.send(&request).await?)
    }

    async fn resolve(&self, hint: DestinationHint) -> Option<Destination> {
        if let Some(tab_id) = hint.tab_id {
            if let Some(destination) = self.host.tab(tab_id).await {
                return Some(destination);
            }
            log::debug!("Tab {} is gone, falling back to the active tab", tab_id);
        }
        self.host.active_tab(hint.window_id).await
    }
}
