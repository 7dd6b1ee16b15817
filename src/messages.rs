/// Message vocabulary exchanged with content scripts and the side panel
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A browser tab whose side panel receives deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub tab_id: i32,
    pub window_id: i32,
}

impl Destination {
    pub fn new(tab_id: i32, window_id: i32) -> Destination {
        Destination { tab_id, window_id }
    }
}

/// Partial destination as named by a sender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i32>,
}

impl DestinationHint {
    pub fn tab(tab_id: i32) -> DestinationHint {
        DestinationHint {
            tab_id: Some(tab_id),
            window_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tab_id.is_none() && self.window_id.is_none()
    }

    /// `fallback` (usually the sending tab) only when nothing was named
    pub fn or(self, fallback: DestinationHint) -> DestinationHint {
        if self.is_empty() { fallback } else { self }
    }
}

impl From<Destination> for DestinationHint {
    fn from(destination: Destination) -> Self {
        DestinationHint {
            tab_id: Some(destination.tab_id),
            window_id: Some(destination.window_id),
        }
    }
}

/// Which panel mode a payload activates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Write,
    Comments,
    Crm,
    #[serde(untagged)]
    Other(String),
}

/// Messages the coordinator accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    OpenPanel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        intent: Intent,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        destination_hint: DestinationHint,
    },
    #[serde(rename_all = "camelCase")]
    PanelDeliverAck { request_id: String },
    #[serde(rename_all = "camelCase")]
    RequestPanelState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination_hint: Option<DestinationHint>,
    },
    #[serde(rename_all = "camelCase")]
    ApiRequest {
        #[serde(default = "default_method")]
        method: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

impl InboundMessage {
    pub const TYPES: [&'static str; 4] = [
        "OPEN_PANEL",
        "PANEL_DELIVER_ACK",
        "REQUEST_PANEL_STATE",
        "API_REQUEST",
    ];

    pub fn is_known_type(kind: &str) -> bool {
        Self::TYPES.contains(&kind)
    }

    pub fn from_value(value: Value) -> Result<InboundMessage, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Messages the coordinator broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    PanelDeliver {
        request_id: String,
        intent: Intent,
        payload: Value,
        destination_hint: DestinationHint,
    },
}
