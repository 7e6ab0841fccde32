//! Listener registry and synchronous message dispatch.
//!
//! The [`Server`] is the bus between the host and the kernel's message
//! handlers. Inbound envelopes are routed by channel to every registered
//! [`Listener`], in registration order. Outbound envelopes go to the single
//! [`HostSink`] the host registered, if any.
//!
//! Everything runs on the caller's thread: dispatch returns once every
//! listener has run. A listener may dispatch again or register new listeners
//! while it runs; each dispatch iterates over a snapshot of the listener list
//! taken when it started.
//!
//! ## Failure policy
//!
//! - No listener on a channel: logged as a warning, message dropped.
//! - A listener returns an error or panics: logged, the remaining listeners
//!   still run. Failures never reach the caller of `notify_listener`.
//!
//! Panic isolation needs an unwinding panic strategy. `wasm32-unknown-unknown`
//! aborts on panic, so there a panicking Rust listener takes the module down.
//! Exceptions thrown by JavaScript listeners come back as `Err` and are
//! isolated on every target.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use kernel_wire::{BufferSequence, Channel, CopyPolicy, EnvelopeError, MessageEnvelope};
use log::{debug, error, warn};
use serde_json::Value;

use crate::error::ServerError;

/// A handler for inbound messages on one channel.
///
/// The envelope and any borrowed buffers in it are only valid for the
/// duration of the call. Use [`MessageEnvelope::into_owned`] on a clone to
/// keep data around.
pub type Listener = dyn Fn(&MessageEnvelope<'_>) -> anyhow::Result<()>;

/// Receiver for messages leaving the module. The first argument is the
/// topic, set for iopub publications.
pub type HostSink = dyn Fn(Option<&str>, &MessageEnvelope<'_>) -> anyhow::Result<()>;

/// Handle returned by [`Server::register_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// The raw id, for hosts that can only hold numbers.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    /// Listeners that completed successfully.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

impl DispatchSummary {
    /// True when no listener was registered for the message's channel.
    pub fn dropped(&self) -> bool {
        self.delivered == 0 && self.failed == 0
    }
}

struct Registration {
    id: ListenerId,
    listener: Rc<Listener>,
}

/// Channel-keyed listener registry with a synchronous dispatch entry point.
pub struct Server {
    listeners: RefCell<HashMap<Channel, Vec<Registration>>>,
    next_id: Cell<u64>,
    host: RefCell<Option<Rc<HostSink>>>,
    inbound: CopyPolicy,
}

impl Server {
    /// Create a server with no listeners. `inbound` decides whether buffers
    /// passed to [`Server::notify_host_message`] are aliased or copied.
    pub fn new(inbound: CopyPolicy) -> Self {
        Self {
            listeners: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
            host: RefCell::new(None),
            inbound,
        }
    }

    /// Append `listener` to the listeners for `channel`.
    pub fn register_listener<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&MessageEnvelope<'_>) -> anyhow::Result<()> + 'static,
    {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .entry(channel)
            .or_default()
            .push(Registration {
                id,
                listener: Rc::new(listener),
            });
        debug!("[server] registered listener {} on {}", id, channel);
        id
    }

    /// Remove a listener. Dispatches already in progress still call it.
    ///
    /// Returns false if the id is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        for registrations in listeners.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, channel: Channel) -> usize {
        self.listeners
            .borrow()
            .get(&channel)
            .map_or(0, |registrations| registrations.len())
    }

    /// Deliver `envelope` to every listener on its channel, in registration
    /// order.
    pub fn notify_listener(&self, envelope: &MessageEnvelope<'_>) -> DispatchSummary {
        // Snapshot so listeners can register, remove or dispatch re-entrantly.
        let snapshot: Vec<(ListenerId, Rc<Listener>)> = self
            .listeners
            .borrow()
            .get(&envelope.channel)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|r| (r.id, Rc::clone(&r.listener)))
                    .collect()
            })
            .unwrap_or_default();

        let mut summary = DispatchSummary::default();
        if snapshot.is_empty() {
            warn!(
                "[server] no listener on {} channel, dropping {} message",
                envelope.channel,
                display_msg_type(envelope)
            );
            return summary;
        }

        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
                Ok(Ok(())) => summary.delivered += 1,
                Ok(Err(e)) => {
                    error!(
                        "[server] listener {} on {} failed handling {}: {:#}",
                        id,
                        envelope.channel,
                        display_msg_type(envelope),
                        e
                    );
                    summary.failed += 1;
                }
                Err(payload) => {
                    error!(
                        "[server] listener {} on {} panicked handling {}: {}",
                        id,
                        envelope.channel,
                        display_msg_type(envelope),
                        panic_message(payload.as_ref())
                    );
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Validate a host message and dispatch it.
    ///
    /// `buffers` are `(element_type, bytes)` pairs from the host; they are
    /// aliased or copied according to the server's inbound policy. Validation
    /// errors are returned before any listener runs.
    pub fn notify_host_message<'a, I, S>(
        &self,
        message: &Value,
        buffers: I,
    ) -> Result<DispatchSummary, EnvelopeError>
    where
        I: IntoIterator<Item = (S, &'a [u8])>,
        S: AsRef<str>,
    {
        let buffers = BufferSequence::from_host_with(buffers, self.inbound)?;
        let envelope = MessageEnvelope::from_host(message, buffers)?;
        Ok(self.notify_listener(&envelope))
    }

    /// Register where outbound messages go. Only one sink may be registered.
    pub fn register_host_callback<F>(&self, sink: F) -> Result<(), ServerError>
    where
        F: Fn(Option<&str>, &MessageEnvelope<'_>) -> anyhow::Result<()> + 'static,
    {
        let mut host = self.host.borrow_mut();
        if host.is_some() {
            return Err(ServerError::HostCallbackAlreadyRegistered);
        }
        *host = Some(Rc::new(sink));
        Ok(())
    }

    pub fn has_host_callback(&self) -> bool {
        self.host.borrow().is_some()
    }

    /// Send a message to the host on its own channel.
    ///
    /// Returns false when no host callback is registered and the message was
    /// dropped.
    pub fn send(&self, envelope: &MessageEnvelope<'_>) -> Result<bool, ServerError> {
        self.deliver(None, envelope)
    }

    /// Publish a message on iopub under `topic`.
    pub fn publish(
        &self,
        topic: &str,
        envelope: &MessageEnvelope<'_>,
    ) -> Result<bool, ServerError> {
        if envelope.channel != Channel::IOPub {
            debug!(
                "[server] publishing {} message from {} channel on iopub",
                display_msg_type(envelope),
                envelope.channel
            );
        }
        self.deliver(Some(topic), envelope)
    }

    fn deliver(
        &self,
        topic: Option<&str>,
        envelope: &MessageEnvelope<'_>,
    ) -> Result<bool, ServerError> {
        // Clone out so the sink may call back into the server.
        let host = self.host.borrow().clone();
        let Some(host) = host else {
            debug!(
                "[server] no host callback, dropping outbound {} message",
                display_msg_type(envelope)
            );
            return Ok(false);
        };
        host(topic, envelope).map_err(ServerError::Host)?;
        Ok(true)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(CopyPolicy::default())
    }
}

fn display_msg_type<'e>(envelope: &'e MessageEnvelope<'_>) -> &'e str {
    match envelope.msg_type() {
        "" => "<untyped>",
        msg_type => msg_type,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
