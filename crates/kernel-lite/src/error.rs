//! Error types for the server and kernel lifecycle.

use crate::kernel::KernelState;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("cannot {operation} a kernel in the {state} state")]
    InvalidState {
        operation: &'static str,
        state: KernelState,
    },

    #[error(transparent)]
    Server(#[from] ServerError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("a host callback is already registered")]
    HostCallbackAlreadyRegistered,

    #[error("host callback failed: {0:#}")]
    Host(anyhow::Error),
}
