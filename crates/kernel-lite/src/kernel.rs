//! Kernel lifecycle.
//!
//! A [`Kernel`] owns the [`Server`] and moves through
//! `Created -> Started -> Stopped`. The server exists from construction on,
//! so listeners can be wired before `start()`; no transition replaces it or
//! drops its listeners.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use kernel_wire::{Channel, Header, MessageEnvelope};
use log::info;
use serde::Serialize;
use serde_json::json;

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelState {
    Created,
    Started,
    Stopped,
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelState::Created => write!(f, "created"),
            KernelState::Started => write!(f, "started"),
            KernelState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Kernel {
    config: KernelConfig,
    kernel_id: String,
    session_id: String,
    state: Cell<KernelState>,
    server: Rc<Server>,
}

impl Kernel {
    /// Create a kernel in the `Created` state with an empty server.
    pub fn new(config: KernelConfig) -> Self {
        let server = Rc::new(Server::new(config.inbound_buffers));
        Self {
            config,
            kernel_id: uuid::Uuid::new_v4().to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            state: Cell::new(KernelState::Created),
            server,
        }
    }

    /// The kernel's server. The same server is returned for the kernel's
    /// whole lifetime.
    ///
    /// Listeners that need to dispatch or reply should capture a
    /// `Weak` reference (`Rc::downgrade`) to avoid a reference cycle.
    pub fn get_server(&self) -> Rc<Server> {
        Rc::clone(&self.server)
    }

    pub fn state(&self) -> KernelState {
        self.state.get()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `Created -> Started`. Publishes a `starting` status on iopub.
    pub fn start(&self) -> Result<(), KernelError> {
        self.transition("start", KernelState::Created, KernelState::Started)?;
        info!("[kernel] started kernel {}", self.kernel_id);
        self.publish_status("starting", None)?;
        Ok(())
    }

    /// `Started -> Stopped`. Registered listeners are kept.
    pub fn stop(&self) -> Result<(), KernelError> {
        self.transition("stop", KernelState::Started, KernelState::Stopped)?;
        info!("[kernel] stopped kernel {}", self.kernel_id);
        Ok(())
    }

    /// A header for a message generated by this kernel.
    pub fn new_header(&self, msg_type: &str) -> Header {
        let mut header = Header::new(msg_type, &self.config.user_name, &self.session_id);
        header.version.clone_from(&self.config.protocol_version);
        header
    }

    /// iopub topic for a kernel event, `kernel_core.<kernel_id>.<event>`.
    pub fn topic(&self, event: &str) -> String {
        format!("kernel_core.{}.{}", self.kernel_id, event)
    }

    /// Publish a `status` message with the given execution state.
    ///
    /// Returns false when no host callback is registered.
    pub fn publish_status(
        &self,
        execution_state: &str,
        parent: Option<&Header>,
    ) -> Result<bool, KernelError> {
        let mut message = MessageEnvelope::new(
            Channel::IOPub,
            self.new_header("status"),
            json!({ "execution_state": execution_state }),
        );
        if let Some(parent) = parent {
            message = message.with_parent(parent.clone());
        }
        Ok(self.server.publish(&self.topic("status"), &message)?)
    }

    fn transition(
        &self,
        operation: &'static str,
        from: KernelState,
        to: KernelState,
    ) -> Result<(), KernelError> {
        let state = self.state.get();
        if state != from {
            return Err(KernelError::InvalidState { operation, state });
        }
        self.state.set(to);
        Ok(())
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}
