/// chrome.* bindings for the background service worker
use crate::config::CoordinatorConfig;
use crate::credentials::{ACCESS_TOKEN_KEY, CredentialSet, CredentialStore, REFRESH_TOKEN_KEY};
use crate::delivery::{DeliveryScheduler, PanelChannel};
use crate::error::{HostError, StorageError, TransportError};
use crate::gateway::{AuthGateway, HttpRequest, HttpResponse, HttpTransport, SessionNavigator};
use crate::messages::{Destination, DestinationHint, OutboundMessage};
use crate::panel_state::PanelStateCache;
use crate::router::{DispatchRouter, PanelHost};
use crate::timer::{TaskHandle, TaskScheduler};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use web_sys::console;

// Import JS bridge functions
#[wasm_bindgen(module = "/background.js")]
extern "C" {
    #[wasm_bindgen(catch)]
    async fn broadcastMessage(message: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn getTab(tab_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn getActiveTab(window_id: Option<i32>) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn openSidePanel(tab_id: i32, window_id: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn getStorage(keys: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn setStorage(items: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn removeStorage(keys: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn httpFetch(
        method: &str,
        url: &str,
        headers: JsValue,
        body: Option<String>,
    ) -> Result<JsValue, JsValue>;

    fn openLoginPage(page: &str, session_expired: bool);

    fn startInterval(interval_ms: u32, callback: &Closure<dyn FnMut()>) -> i32;

    fn stopInterval(handle: i32);
}

/// Plain JS objects rather than `Map`s, so chrome.* APIs accept the value
fn to_js<T: Serialize>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

fn describe(error: &JsValue) -> String {
    error
        .as_string()
        .or_else(|| {
            error
                .dyn_ref::<js_sys::Error>()
                .map(|e| String::from(e.message()))
        })
        .unwrap_or_else(|| format!("{:?}", error))
}

struct RuntimeChannel;

impl PanelChannel for RuntimeChannel {
    fn broadcast(&self, message: &OutboundMessage) {
        let value = match to_js(message) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Could not encode delivery: {}", e);
                return;
            }
        };
        spawn_local(async move {
            // Rejects with "Receiving end does not exist" until the panel listens
            if let Err(e) = broadcastMessage(value).await {
                log::debug!("Delivery not received: {}", describe(&e));
            }
        });
    }
}

struct TabsHost;

impl TabsHost {
    fn destination(value: Result<JsValue, JsValue>) -> Option<Destination> {
        match value {
            Ok(value) => serde_wasm_bindgen::from_value::<Option<Destination>>(value)
                .ok()
                .flatten(),
            Err(e) => {
                log::warn!("Tab lookup failed: {}", describe(&e));
                None
            }
        }
    }
}

#[async_trait(?Send)]
impl PanelHost for TabsHost {
    async fn tab(&self, tab_id: i32) -> Option<Destination> {
        Self::destination(getTab(tab_id).await)
    }

    async fn active_tab(&self, window_id: Option<i32>) -> Option<Destination> {
        Self::destination(getActiveTab(window_id).await)
    }

    async fn open_panel(&self, destination: Destination) -> Result<(), HostError> {
        openSidePanel(destination.tab_id, destination.window_id)
            .await
            .map_err(|e| HostError(describe(&e)))
    }
}

struct LocalStorage;

#[async_trait(?Send)]
impl CredentialStore for LocalStorage {
    async fn load(&self) -> Result<CredentialSet, StorageError> {
        let keys = to_js(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .map_err(|e| StorageError(e.to_string()))?;
        let items = getStorage(keys)
            .await
            .map_err(|e| StorageError(describe(&e)))?;
        let stored: CredentialSet =
            serde_wasm_bindgen::from_value(items).map_err(|e| StorageError(e.to_string()))?;
        Ok(CredentialSet::new(stored.access_token, stored.refresh_token))
    }

    async fn persist(&self, credentials: &CredentialSet) -> Result<(), StorageError> {
        let items = to_js(credentials).map_err(|e| StorageError(e.to_string()))?;
        setStorage(items)
            .await
            .map_err(|e| StorageError(describe(&e)))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let keys = to_js(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .map_err(|e| StorageError(e.to_string()))?;
        removeStorage(keys)
            .await
            .map_err(|e| StorageError(describe(&e)))
    }
}

struct FetchTransport;

#[async_trait(?Send)]
impl HttpTransport for FetchTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let headers = to_js(&request.headers).map_err(|e| TransportError::new(e.to_string()))?;
        let response = httpFetch(
            request.method.as_str(),
            &request.url,
            headers,
            request.body.clone(),
        )
        .await
        .map_err(|e| TransportError::new(describe(&e)))?;
        serde_wasm_bindgen::from_value(response).map_err(|e| TransportError::new(e.to_string()))
    }
}

struct LoginNavigator {
    login_page: String,
}

impl SessionNavigator for LoginNavigator {
    fn open_login(&self, session_expired: bool) {
        openLoginPage(&self.login_page, session_expired);
    }
}

struct IntervalScheduler;

impl TaskScheduler for IntervalScheduler {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn every(&self, interval_ms: u32, task: Box<dyn FnMut()>) -> TaskHandle {
        let closure = Closure::wrap(task);
        let handle = startInterval(interval_ms, &closure);
        TaskHandle::new(move || {
            stopInterval(handle);
            // The interval callback itself may be cancelling; free it once it returns
            spawn_local(async move { drop(closure) });
        })
    }
}

/// The coordinator as seen from background.js
#[wasm_bindgen]
pub struct Background {
    router: Rc<DispatchRouter>,
}

#[wasm_bindgen]
impl Background {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<Background, JsValue> {
        let config: CoordinatorConfig = if config.is_undefined() || config.is_null() {
            CoordinatorConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)
                .map_err(|e| JsValue::from_str(&e.to_string()))?
        };
        config
            .validate()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        let base_url = config
            .base_url()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;

        let states = PanelStateCache::new();
        let deliveries = DeliveryScheduler::new(
            Rc::new(RuntimeChannel),
            Rc::new(IntervalScheduler),
            states.clone(),
            config.retry_policy(),
        );
        let gateway = AuthGateway::new(
            Rc::new(FetchTransport),
            Rc::new(LocalStorage),
            Rc::new(LoginNavigator {
                login_page: config.login_page.clone(),
            }),
            base_url,
            &config.refresh_path,
        )
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

        log::info!("Background coordinator ready ({})", config.api_base_url);
        Ok(Background {
            router: Rc::new(DispatchRouter::new(
                Rc::new(TabsHost),
                deliveries,
                states,
                Rc::new(gateway),
            )),
        })
    }

    /// Resolves to the reply, or to `undefined` for messages owned by another listener
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(
        &self,
        message: JsValue,
        sender_tab_id: Option<i32>,
        sender_window_id: Option<i32>,
    ) -> js_sys::Promise {
        let router = self.router.clone();
        future_to_promise(async move {
            let decoded: Value = match serde_wasm_bindgen::from_value(message.clone()) {
                Ok(value) => value,
                Err(_) => {
                    console::debug_2(&"Ignoring non-JSON message".into(), &message);
                    return Ok(JsValue::UNDEFINED);
                }
            };
            let sender = DestinationHint {
                tab_id: sender_tab_id,
                window_id: sender_window_id,
            };

            let reply = match router.dispatch(decoded, sender).await {
                Ok(reply) => to_js(&reply),
                Err(e) => match e.reply() {
                    Some(reply) => to_js(&reply),
                    None => return Ok(JsValue::UNDEFINED),
                },
            };
            reply.map_err(|e| JsValue::from_str(&e.to_string()))
        })
    }

    /// Authenticated backend call for extension pages that hold a Background
    pub fn fetch(&self, method: String, path: String, body: JsValue) -> js_sys::Promise {
        let router = self.router.clone();
        future_to_promise(async move {
            let body: Option<Value> = if body.is_undefined() || body.is_null() {
                None
            } else {
                Some(
                    serde_wasm_bindgen::from_value(body)
                        .map_err(|e| JsValue::from_str(&e.to_string()))?,
                )
            };
            let response = router
                .api_request(&method, &path, body.as_ref())
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
            to_js(&response).map_err(|e| JsValue::from_str(&e.to_string()))
        })
    }

    #[wasm_bindgen(js_name = pendingDeliveries)]
    pub fn pending_deliveries(&self) -> usize {
        self.router.deliveries().pending_count()
    }
}
