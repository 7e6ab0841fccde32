//! WASM exports for the kernel boundary.
//!
//! This module provides wasm-bindgen exports for [`Kernel`], [`Server`] and
//! [`BufferSequence`], so a JavaScript host can wire listeners, inject
//! messages and move typed arrays in and out of the module.
//!
//! Typed arrays coming from JavaScript are copied into module memory: Rust
//! cannot alias the JS heap. Typed arrays going out either alias module
//! memory (valid until the module's memory grows, so only for the current
//! call) or are copied, following `outbound_buffers` in the kernel config.

use std::fmt::Display;
use std::rc::Rc;

use js_sys::{Array, Function, Reflect, Uint8Array};
use kernel_wire::{BufferSequence, BufferView, CopyPolicy, ElementType, MessageEnvelope};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::config::KernelConfig;
use crate::kernel::Kernel;
use crate::server::{ListenerId, Server};

/// Convert Rust errors to JavaScript exceptions.
fn to_js_err(err: impl Display) -> JsValue {
    JsError::new(&err.to_string()).into()
}

fn get(target: &JsValue, key: &str) -> Result<JsValue, JsValue> {
    Reflect::get(target, &JsValue::from_str(key))
}

fn get_u32(target: &JsValue, key: &str) -> Result<u32, JsValue> {
    get(target, key)?
        .as_f64()
        .map(|n| n as u32)
        .ok_or_else(|| to_js_err(format!("typed array has no numeric `{key}`")))
}

/// Copy one JS typed array into an owned view.
fn buffer_from_js(value: &JsValue) -> Result<BufferView<'static>, JsValue> {
    let name = get(&get(value, "constructor")?, "name")?
        .as_string()
        .unwrap_or_default();
    let element_type: ElementType = name.parse().map_err(to_js_err)?;

    let buffer = get(value, "buffer")?;
    let byte_offset = get_u32(value, "byteOffset")?;
    let byte_length = get_u32(value, "byteLength")?;
    let bytes =
        Uint8Array::new_with_byte_offset_and_length(&buffer, byte_offset, byte_length).to_vec();
    BufferView::owned(element_type, bytes).map_err(to_js_err)
}

/// Copy an array of JS typed arrays. Fails without a partial result.
fn buffer_sequence_from_js(buffers: &JsValue) -> Result<BufferSequence<'static>, JsValue> {
    if buffers.is_undefined() || buffers.is_null() {
        return Ok(BufferSequence::new());
    }
    let buffers: &Array = buffers
        .dyn_ref()
        .ok_or_else(|| to_js_err("buffers must be an array"))?;
    buffers.iter().map(|value| buffer_from_js(&value)).collect()
}

fn typed_array(
    element_type: ElementType,
    buffer: &JsValue,
    byte_offset: u32,
    len: u32,
) -> JsValue {
    macro_rules! make {
        ($ty:ty) => {
            <$ty>::new_with_byte_offset_and_length(buffer, byte_offset, len).into()
        };
    }
    match element_type {
        ElementType::Int8 => make!(js_sys::Int8Array),
        ElementType::Uint8 => make!(js_sys::Uint8Array),
        ElementType::Uint8Clamped => make!(js_sys::Uint8ClampedArray),
        ElementType::Int16 => make!(js_sys::Int16Array),
        ElementType::Uint16 => make!(js_sys::Uint16Array),
        ElementType::Int32 => make!(js_sys::Int32Array),
        ElementType::Uint32 => make!(js_sys::Uint32Array),
        ElementType::Int64 => make!(js_sys::BigInt64Array),
        ElementType::Uint64 => make!(js_sys::BigUint64Array),
        ElementType::Float32 => make!(js_sys::Float32Array),
        ElementType::Float64 => make!(js_sys::Float64Array),
    }
}

/// Turn a buffer sequence into an array of JS typed arrays.
fn js_buffers_from_sequence(
    buffers: &BufferSequence<'_>,
    policy: CopyPolicy,
) -> Result<Array, JsValue> {
    let memory = get(&wasm_bindgen::memory(), "buffer")?;
    let out = Array::new();
    for view in buffers {
        let element_type = view.element_type();
        let bytes = view.bytes().map_err(to_js_err)?;
        let len = view.len() as u32;
        let ptr = bytes.as_ptr() as u32;

        // Typed array views must be aligned to their element size.
        let typed = if policy == CopyPolicy::Borrow && ptr as usize % element_type.size() == 0 {
            typed_array(element_type, &memory, ptr, len)
        } else {
            let copy = Uint8Array::from(bytes);
            typed_array(element_type, &copy.buffer(), 0, len)
        };
        out.push(&typed);
    }
    Ok(out)
}

/// Build a JS message object (`header`, `parent_header`, `metadata`,
/// `content`, `channel`, `buffers`).
fn js_message_from_envelope(
    envelope: &MessageEnvelope<'_>,
    policy: CopyPolicy,
) -> Result<JsValue, JsValue> {
    let json = serde_json::to_string(&envelope.to_json_value()).map_err(to_js_err)?;
    let message = js_sys::JSON::parse(&json)?;
    let buffers = js_buffers_from_sequence(&envelope.buffers, policy)?;
    Reflect::set(&message, &JsValue::from_str("buffers"), &buffers)?;
    Ok(message)
}

/// Read a JS message object into an envelope, copying its buffers.
fn envelope_from_js(message: &JsValue) -> Result<MessageEnvelope<'static>, JsValue> {
    let object: &js_sys::Object = message
        .dyn_ref()
        .ok_or_else(|| to_js_err("message must be an object"))?;
    let buffers = buffer_sequence_from_js(&get(message, "buffers")?)?;

    // Stringify a shallow copy without buffers to keep the JSON cheap.
    let shallow = js_sys::Object::assign(&js_sys::Object::new(), object);
    Reflect::delete_property(&shallow, &JsValue::from_str("buffers"))?;
    let json: String = js_sys::JSON::stringify(&shallow)?.into();
    let value: serde_json::Value = serde_json::from_str(&json).map_err(to_js_err)?;

    MessageEnvelope::from_host(&value, buffers).map_err(to_js_err)
}

/// Ordered typed arrays held in module memory.
#[wasm_bindgen(js_name = BufferSequence)]
#[derive(Default)]
pub struct WasmBufferSequence {
    inner: BufferSequence<'static>,
}

#[wasm_bindgen(js_class = BufferSequence)]
impl WasmBufferSequence {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.inner.len()
    }

    /// Replace the contents with copies of `buffers` (an array of typed
    /// arrays). On error the sequence is left unchanged.
    pub fn from_js(&mut self, buffers: JsValue) -> Result<(), JsValue> {
        self.inner = buffer_sequence_from_js(&buffers)?;
        Ok(())
    }

    /// Typed arrays aliasing module memory. Do not keep them past the
    /// current call.
    pub fn view(&self) -> Result<Array, JsValue> {
        js_buffers_from_sequence(&self.inner, CopyPolicy::Borrow)
    }

    /// Typed arrays copied out of module memory.
    pub fn copy(&self) -> Result<Array, JsValue> {
        js_buffers_from_sequence(&self.inner, CopyPolicy::Copy)
    }
}

/// The kernel's message server.
#[wasm_bindgen(js_name = Server)]
pub struct WasmServer {
    server: Rc<Server>,
    outbound: CopyPolicy,
}

#[wasm_bindgen(js_class = Server)]
impl WasmServer {
    /// Validate `message` and dispatch it to the listeners on its channel.
    ///
    /// Returns the number of listeners that handled it successfully.
    pub fn notify_listener(&self, message: JsValue) -> Result<usize, JsValue> {
        let envelope = envelope_from_js(&message)?;
        Ok(self.server.notify_listener(&envelope).delivered)
    }

    /// Call `callback(message)` for every message on `channel`.
    pub fn register_listener(&self, channel: &str, callback: Function) -> Result<f64, JsValue> {
        let channel = channel.parse().map_err(to_js_err)?;
        let outbound = self.outbound;
        let id = self.server.register_listener(channel, move |envelope| {
            let message = js_message_from_envelope(envelope, outbound)
                .map_err(|e| anyhow::anyhow!("{:?}", e))?;
            callback
                .call1(&JsValue::NULL, &message)
                .map_err(|e| anyhow::anyhow!("{:?}", e))?;
            Ok(())
        });
        Ok(id.into_raw() as f64)
    }

    pub fn remove_listener(&self, id: f64) -> bool {
        self.server.remove_listener(ListenerId::from_raw(id as u64))
    }

    /// Call `callback(channel, topic, message)` for every outbound message.
    pub fn register_js_callback(&self, callback: Function) -> Result<(), JsValue> {
        let outbound = self.outbound;
        self.server
            .register_host_callback(move |topic, envelope| {
                let message = js_message_from_envelope(envelope, outbound)
                    .map_err(|e| anyhow::anyhow!("{:?}", e))?;
                let topic = topic.map_or(JsValue::NULL, JsValue::from_str);
                callback
                    .call3(
                        &JsValue::NULL,
                        &JsValue::from_str(envelope.channel.as_str()),
                        &topic,
                        &message,
                    )
                    .map_err(|e| anyhow::anyhow!("{:?}", e))?;
                Ok(())
            })
            .map_err(to_js_err)
    }
}

/// Kernel lifecycle wrapper.
#[wasm_bindgen(js_name = Kernel)]
pub struct WasmKernel {
    kernel: Kernel,
}

#[wasm_bindgen(js_class = Kernel)]
impl WasmKernel {
    /// Create a kernel. `config` is an optional plain object matching
    /// `KernelConfig`.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<WasmKernel, JsValue> {
        let config = if config.is_undefined() || config.is_null() {
            KernelConfig::default()
        } else {
            let json: String = js_sys::JSON::stringify(&config)?.into();
            KernelConfig::from_json(&json).map_err(|e| to_js_err(format!("{e:#}")))?
        };
        #[cfg(target_arch = "wasm32")]
        crate::logging::init_logging(&config.log_level);
        Ok(Self {
            kernel: Kernel::new(config),
        })
    }

    pub fn get_server(&self) -> WasmServer {
        WasmServer {
            server: self.kernel.get_server(),
            outbound: self.kernel.config().outbound_buffers,
        }
    }

    pub fn start(&self) -> Result<(), JsValue> {
        self.kernel.start().map_err(to_js_err)
    }

    pub fn stop(&self) -> Result<(), JsValue> {
        self.kernel.stop().map_err(to_js_err)
    }

    pub fn state(&self) -> String {
        self.kernel.state().to_string()
    }

    pub fn kernel_id(&self) -> String {
        self.kernel.kernel_id().to_string()
    }
}
