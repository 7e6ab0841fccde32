//! Echo handlers used by the `kernel-lite` binary.
//!
//! Every `*_request` on shell or control is answered with the matching
//! `*_reply`, carrying the request content back under `echo` along with the
//! request's buffers. `kernel_info_request` gets a real kernel info reply and
//! `shutdown_request` stops the kernel. Each request is bracketed by `busy`
//! and `idle` status publications; `idle` goes out even when the reply fails.
//! Replies carry the kernel's own user name and session.

use std::rc::{Rc, Weak};

use anyhow::{Context, Result};
use kernel_wire::{ok_reply, Channel, MessageEnvelope};
use log::debug;
use serde_json::{json, Value};

use crate::kernel::{Kernel, KernelState};

/// Register the echo listeners on shell and control.
pub fn register_echo_handlers(kernel: &Rc<Kernel>) {
    let server = kernel.get_server();
    for channel in [Channel::Shell, Channel::Control] {
        let kernel = Rc::downgrade(kernel);
        server.register_listener(channel, move |request| handle(&kernel, request));
    }
}

fn handle(kernel: &Weak<Kernel>, request: &MessageEnvelope<'_>) -> Result<()> {
    let Some(kernel) = kernel.upgrade() else {
        return Ok(());
    };
    let Some(base) = request.msg_type().strip_suffix("_request") else {
        debug!("[echo] ignoring {} message", request.msg_type());
        return Ok(());
    };

    kernel.publish_status("busy", Some(&request.header))?;
    let replied = reply(&kernel, base, request);
    kernel.publish_status("idle", Some(&request.header))?;
    replied?;

    if base == "shutdown" && kernel.state() == KernelState::Started {
        kernel.stop()?;
    }
    Ok(())
}

fn reply(kernel: &Kernel, base: &str, request: &MessageEnvelope<'_>) -> Result<()> {
    let content = match base {
        "kernel_info" => kernel_info(kernel),
        _ => {
            let mut content = ok_reply();
            content["echo"] = request.content.clone();
            content
        }
    };
    let reply = MessageEnvelope::new(
        request.channel,
        kernel.new_header(&format!("{base}_reply")),
        content,
    )
    .with_parent(request.header.clone())
    .with_buffers(request.buffers.clone().into_owned()?);
    kernel
        .get_server()
        .send(&reply)
        .context("Failed to send reply")?;
    Ok(())
}

fn kernel_info(kernel: &Kernel) -> Value {
    json!({
        "status": "ok",
        "protocol_version": kernel.config().protocol_version,
        "implementation": "kernel-lite",
        "implementation_version": env!("CARGO_PKG_VERSION"),
        "language_info": {
            "name": "echo",
            "version": env!("CARGO_PKG_VERSION"),
            "mimetype": "text/plain",
            "file_extension": ".txt",
        },
        "banner": "kernel-lite echo kernel",
        "help_links": [],
    })
}
