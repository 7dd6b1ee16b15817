/// Last-known panel state per destination, used for rehydration
///
/// Entries live only as long as the background worker. The browser may
/// suspend the worker at any time, so an empty cache is a normal answer.
use crate::messages::{Destination, Intent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelState {
    pub destination: Destination,
    pub intent: Intent,
    pub payload: Value,
    pub observed_at: f64,
}

/// Shared last-writer-wins map. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct PanelStateCache {
    entries: Rc<RefCell<HashMap<Destination, PanelState>>>,
}

impl PanelStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, state: PanelState) {
        self.entries.borrow_mut().insert(state.destination, state);
    }

    pub fn get(&self, destination: &Destination) -> Option<PanelState> {
        self.entries.borrow().get(destination).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
