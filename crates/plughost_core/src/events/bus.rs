//! Synchronous lifecycle event fan-out.
//!
//! # Responsibility
//! - Keep the ordered list of subscribed listeners.
//! - Deliver each event to every listener on the publishing thread.
//!
//! # Invariants
//! - Delivery follows subscription order.
//! - A listener that errors or panics is logged and skipped; it never stops
//!   delivery to later listeners and never changes the publisher's result.
//! - The listener lock is released before any listener runs, so listeners
//!   may subscribe or unsubscribe from inside a callback.

use crate::extension::registry::ExtensionInfo;
use crate::lifecycle::result::ErrorKind;
use crate::logging::{panic_payload_summary, sanitize_message};
use log::warn;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

const MAX_LISTENER_ERROR_CHARS: usize = 256;

pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Observer of lifecycle and execution events.
pub trait ExtensionListener: Send + Sync {
    fn on_event(&self, event: &ExtensionEvent) -> ListenerResult;
}

impl<F> ExtensionListener for F
where
    F: Fn(&ExtensionEvent) -> ListenerResult + Send + Sync,
{
    fn on_event(&self, event: &ExtensionEvent) -> ListenerResult {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to an extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionEventKind {
    Loaded,
    Unloaded,
    Enabled,
    Disabled,
    Executed { result: Value },
    Error { error: ErrorKind, message: String },
}

impl ExtensionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Unloaded => "unloaded",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Executed { .. } => "executed",
            Self::Error { .. } => "error",
        }
    }
}

/// One notification delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionEvent {
    /// Snapshot of the extension at publish time.
    pub extension: ExtensionInfo,
    #[serde(flatten)]
    pub kind: ExtensionEventKind,
}

impl ExtensionEvent {
    pub fn new(extension: ExtensionInfo, kind: ExtensionEventKind) -> Self {
        Self { extension, kind }
    }

    pub fn name(&self) -> &str {
        &self.extension.name
    }
}

/// Delivery outcome of one `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

type Subscription = (ListenerId, Arc<dyn ExtensionListener>);

/// Ordered listener list with per-listener failure isolation.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener to the delivery order.
    pub fn subscribe<L>(&self, listener: L) -> ListenerId
    where
        L: ExtensionListener + 'static,
    {
        self.subscribe_arc(Arc::new(listener))
    }

    /// Appends a shared listener to the delivery order.
    pub fn subscribe_arc(&self, listener: Arc<dyn ExtensionListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Removes one listener. Returns `false` when `id` is unknown.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(entry, _)| *entry != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every listener subscribed at call time.
    pub fn publish(&self, event: &ExtensionEvent) -> PublishReport {
        let snapshot: Vec<Subscription> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut report = PublishReport::default();
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(
                        "event=listener_notify module=events status=error listener_id={} event_kind={} name={} error={}",
                        id,
                        event.kind.as_str(),
                        event.name(),
                        sanitize_message(&err.to_string(), MAX_LISTENER_ERROR_CHARS)
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    warn!(
                        "event=listener_notify module=events status=panic listener_id={} event_kind={} name={} error={}",
                        id,
                        event.kind.as_str(),
                        event.name(),
                        panic_payload_summary(payload.as_ref())
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::{EventBus, ExtensionEvent, ExtensionEventKind, ListenerResult};
    use crate::extension::registry::ExtensionInfo;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn event(kind: ExtensionEventKind) -> ExtensionEvent {
        ExtensionEvent::new(
            ExtensionInfo {
                name: "echo".to_string(),
                version: "1.0.0".to_string(),
                description: String::new(),
                enabled: true,
                factory: "echo".to_string(),
                instance_id: Uuid::new_v4(),
                loaded_at_ms: 0,
            },
            kind,
        )
    }

    fn recorder(
        log: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> impl Fn(&ExtensionEvent) -> ListenerResult {
        move |event: &ExtensionEvent| {
            log.lock()
                .expect("log lock")
                .push(format!("{tag}:{}", event.kind.as_str()));
            Ok(())
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(recorder(log.clone(), "a"));
        bus.subscribe(recorder(log.clone(), "b"));

        let report = bus.publish(&event(ExtensionEventKind::Loaded));
        assert_eq!(report.delivered, 2);
        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["a:loaded".to_string(), "b:loaded".to_string()]
        );
    }

    #[test]
    fn failing_and_panicking_listeners_are_skipped() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(|_event: &ExtensionEvent| -> ListenerResult { Err("listener down".into()) });
        bus.subscribe(|_event: &ExtensionEvent| -> ListenerResult { panic!("listener exploded") });
        bus.subscribe(recorder(log.clone(), "ok"));

        let report = bus.publish(&event(ExtensionEventKind::Disabled));
        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock().expect("log lock"), vec!["ok:disabled".to_string()]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = bus.subscribe(recorder(log.clone(), "a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(bus.is_empty());

        bus.publish(&event(ExtensionEventKind::Loaded));
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[test]
    fn event_serializes_with_flat_kind() {
        let value = serde_json::to_value(event(ExtensionEventKind::Executed {
            result: json!({"ok": true}),
        }))
        .expect("serialize");
        assert_eq!(value["kind"], json!("executed"));
        assert_eq!(value["result"], json!({"ok": true}));
        assert_eq!(value["extension"]["name"], json!("echo"));
    }
}
