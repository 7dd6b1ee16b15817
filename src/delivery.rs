/// Bounded, at-least-once delivery of a payload to a side panel
///
/// The panel is created asynchronously and attaches its message listener
/// whenever it finishes loading, so the scheduler keeps re-broadcasting
/// until the panel acknowledges or the attempt budget runs out. Panels must
/// apply a payload idempotently: the same delivery can arrive more than once.
use crate::messages::{Destination, Intent, OutboundMessage};
use crate::panel_state::{PanelState, PanelStateCache};
use crate::timer::{TaskHandle, TaskScheduler};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Broadcast channel to extension pages. Nobody listening is not an error.
pub trait PanelChannel {
    fn broadcast(&self, message: &OutboundMessage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval_ms: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            interval_ms: crate::config::DEFAULT_RETRY_INTERVAL_MS,
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub request_id: String,
    pub destination: Destination,
    pub intent: Intent,
    pub payload: Value,
    pub attempts_made: u32,
    pub active: bool,
}

impl DeliveryRequest {
    pub fn new(
        request_id: impl Into<String>,
        destination: Destination,
        intent: Intent,
        payload: Value,
    ) -> DeliveryRequest {
        DeliveryRequest {
            request_id: request_id.into(),
            destination,
            intent,
            payload,
            attempts_made: 0,
            active: true,
        }
    }

    fn to_message(&self) -> OutboundMessage {
        OutboundMessage::PanelDeliver {
            request_id: self.request_id.clone(),
            intent: self.intent.clone(),
            payload: self.payload.clone(),
            destination_hint: self.destination.into(),
        }
    }
}

struct PendingDelivery {
    request: DeliveryRequest,
    timer: Option<TaskHandle>,
}

type PendingMap = RefCell<HashMap<String, PendingDelivery>>;

enum Tick {
    Retry(DeliveryRequest),
    Exhausted(PendingDelivery),
}

/// Owns every pending delivery and its retry timer
#[derive(Clone)]
pub struct DeliveryScheduler {
    pending: Rc<PendingMap>,
    channel: Rc<dyn PanelChannel>,
    tasks: Rc<dyn TaskScheduler>,
    states: PanelStateCache,
    policy: RetryPolicy,
}

impl DeliveryScheduler {
    pub fn new(
        channel: Rc<dyn PanelChannel>,
        tasks: Rc<dyn TaskScheduler>,
        states: PanelStateCache,
        policy: RetryPolicy,
    ) -> Self {
        DeliveryScheduler {
            pending: Rc::new(RefCell::new(HashMap::new())),
            channel,
            tasks,
            states,
            policy,
        }
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.borrow().contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn schedule(&self, mut request: DeliveryRequest) {
        let request_id = request.request_id.clone();
        request.attempts_made = 0;
        request.active = true;

        let replaced = self.pending.borrow_mut().remove(&request_id);
        if let Some(previous) = replaced {
            log::debug!("Replacing pending delivery {}", request_id);
            cancel(previous);
        }

        self.pending.borrow_mut().insert(
            request_id.clone(),
            PendingDelivery {
                request: request.clone(),
                timer: None,
            },
        );
        self.attempt(&request);

        // A panel that was already listening may have acknowledged synchronously
        if !self.is_pending(&request_id) {
            return;
        }

        let timer = self.tasks.every(
            self.policy.interval_ms,
            self.retry_task(Rc::downgrade(&self.pending), request_id.clone()),
        );
        if let Some(entry) = self.pending.borrow_mut().get_mut(&request_id) {
            entry.timer = Some(timer);
        }
    }

    /// Stop retrying `request_id`. Unknown or already-cleared ids are a no-op.
    pub fn acknowledge(&self, request_id: &str) -> Option<DeliveryRequest> {
        let removed = self.pending.borrow_mut().remove(request_id);
        match removed {
            Some(entry) => {
                log::debug!(
                    "Delivery {} acknowledged after {} retries",
                    request_id,
                    entry.request.attempts_made
                );
                Some(cancel(entry))
            }
            None => {
                log::debug!("Ignoring acknowledgement for unknown delivery {}", request_id);
                None
            }
        }
    }

    fn retry_task(&self, pending: Weak<PendingMap>, request_id: String) -> Box<dyn FnMut()> {
        let attempt = self.attempt_context();
        let max_attempts = self.policy.max_attempts;

        Box::new(move || {
            let Some(pending) = pending.upgrade() else {
                return;
            };

            let tick = {
                let mut map = pending.borrow_mut();
                let Some(entry) = map.get_mut(&request_id) else {
                    return;
                };
                entry.request.attempts_made += 1;
                if entry.request.attempts_made >= max_attempts {
                    match map.remove(&request_id) {
                        Some(entry) => Tick::Exhausted(entry),
                        None => return,
                    }
                } else {
                    Tick::Retry(entry.request.clone())
                }
            };

            match tick {
                Tick::Retry(request) => attempt.send(&request),
                Tick::Exhausted(entry) => {
                    log::warn!(
                        "Dropping delivery {} after {} attempts without acknowledgement",
                        request_id,
                        entry.request.attempts_made
                    );
                    cancel(entry);
                }
            }
        })
    }

    fn attempt(&self, request: &DeliveryRequest) {
        self.attempt_context().send(request);
    }

    // Holds the clock weakly: the retry task lives inside the clock itself
    fn attempt_context(&self) -> DeliveryAttempt {
        DeliveryAttempt {
            channel: self.channel.clone(),
            tasks: Rc::downgrade(&self.tasks),
            states: self.states.clone(),
        }
    }
}

/// Everything one delivery attempt needs, detached from the pending map
struct DeliveryAttempt {
    channel: Rc<dyn PanelChannel>,
    tasks: Weak<dyn TaskScheduler>,
    states: PanelStateCache,
}

impl DeliveryAttempt {
    fn send(&self, request: &DeliveryRequest) {
        let observed_at = self.tasks.upgrade().map_or(0.0, |tasks| tasks.now_ms());
        self.states.record(PanelState {
            destination: request.destination,
            intent: request.intent.clone(),
            payload: request.payload.clone(),
            observed_at,
        });

        log::debug!(
            "Delivering {} to tab {} (retry {})",
            request.request_id,
            request.destination.tab_id,
            request.attempts_made
        );
        self.channel.broadcast(&request.to_message());
    }
}

/// Cancel the timer first, then hand back the finished request
fn cancel(mut entry: PendingDelivery) -> DeliveryRequest {
    if let Some(timer) = entry.timer.take() {
        timer.cancel();
    }
    entry.request.active = false;
    entry.request
}
