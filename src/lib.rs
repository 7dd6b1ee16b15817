/// Panel Relay - background coordinator for a side-panel browser extension
/// Built with Rust + WASM
///
/// All state here is in-memory and owned by the background service worker.
/// The browser may suspend and restart that worker at any time, which drops
/// pending deliveries and cached panel state; only credentials survive, in
/// chrome.storage.local.

pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod panel_state;
pub mod router;
pub mod timer;

#[cfg(target_arch = "wasm32")]
mod browser;

#[cfg(test)]
mod testing;

use wasm_bindgen::prelude::*;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

// Request ids for producers that want to track their own deliveries
#[wasm_bindgen(js_name = newRequestId)]
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
