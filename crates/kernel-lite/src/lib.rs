//! A Jupyter kernel core that runs inside a sandboxed module.
//!
//! The host hands messages to the kernel through [`Server::notify_listener`]
//! (or [`Server::notify_host_message`] for raw JSON plus typed buffers), and
//! the kernel's listeners answer through the host callback registered with
//! [`Server::register_host_callback`]. Everything is single threaded and
//! synchronous: the host's call returns once every listener has run.
//!
//! ```
//! use kernel_lite::{Kernel, KernelConfig};
//! use kernel_wire::Channel;
//! use serde_json::json;
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! let server = kernel.get_server();
//! server.register_listener(Channel::Shell, |msg| {
//!     assert_eq!(msg.content["code"], "1 + 1");
//!     Ok(())
//! });
//! kernel.start().unwrap();
//!
//! let message = json!({"channel": "shell", "content": {"code": "1 + 1"}});
//! let summary = server.notify_host_message(&message, Vec::<(&str, &[u8])>::new()).unwrap();
//! assert_eq!(summary.delivered, 1);
//! ```
//!
//! With the `wasm` feature, the same surface is exported to JavaScript.

pub mod config;
pub mod echo;
pub mod error;
pub mod kernel;
pub mod logging;
pub mod server;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use config::KernelConfig;
pub use echo::register_echo_handlers;
pub use error::{KernelError, ServerError};
pub use kernel::{Kernel, KernelState};
pub use server::{DispatchSummary, HostSink, Listener, ListenerId, Server};

#[cfg(any(not(target_arch = "wasm32"), feature = "wasm"))]
pub use logging::init_logging;
