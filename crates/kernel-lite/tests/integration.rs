//! Integration tests for the kernel boundary.
//!
//! These drive a Kernel the way a host does: raw JSON messages with typed
//! byte buffers in, wire JSON out.

use std::cell::RefCell;
use std::io::Write;
use std::process::{Command, Stdio};
use std::rc::Rc;

use kernel_lite::{register_echo_handlers, Kernel, KernelConfig};
use kernel_wire::{wire, Channel, CopyPolicy, ElementType, MessageEnvelope};
use serde_json::json;

fn le_bytes_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn test_listener_receives_exact_envelope() {
    let kernel = Kernel::default();
    let server = kernel.get_server();
    let received: Rc<RefCell<Vec<MessageEnvelope<'static>>>> = Rc::default();

    let sink = Rc::clone(&received);
    server.register_listener(Channel::Shell, move |env| {
        sink.borrow_mut().push(env.clone().into_owned()?);
        Ok(())
    });
    kernel.start().unwrap();

    let message = json!({
        "header": {
            "msg_id": "3f1c0e0a-1b2c-4d5e-8f90-a1b2c3d4e5f6",
            "session": "session-1",
            "username": "ada",
            "date": "2024-05-01T12:00:00.000Z",
            "msg_type": "test_message",
            "version": "5.3"
        },
        "parent_header": {},
        "metadata": {"fo": "bar"},
        "content": {"fobar": "fobar"},
        "channel": "shell"
    });
    let int8: Vec<u8> = [-1i8, 2, -3, 4, -5].iter().map(|v| *v as u8).collect();
    let uint8 = vec![10u8, 20, 30, 40, 50];
    let float32 = le_bytes_f32(&[1.5, 2.5, 3.5, 4.5]);

    let summary = server
        .notify_host_message(
            &message,
            [
                ("Int8Array", int8.as_slice()),
                ("Uint8Array", uint8.as_slice()),
                ("Float32Array", float32.as_slice()),
            ],
        )
        .unwrap();
    assert_eq!(summary.delivered, 1);

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    let env = &received[0];
    assert_eq!(env.msg_type(), "test_message");
    assert_eq!(env.header.msg_id, "3f1c0e0a-1b2c-4d5e-8f90-a1b2c3d4e5f6");
    assert_eq!(env.header.username, "ada");
    assert!(env.parent_header.is_empty());
    assert_eq!(json!(env.metadata), json!({"fo": "bar"}));
    assert_eq!(env.content, json!({"fobar": "fobar"}));

    assert_eq!(env.buffers.len(), 3);
    let types: Vec<_> = env.buffers.iter().map(|b| b.element_type()).collect();
    assert_eq!(
        types,
        vec![ElementType::Int8, ElementType::Uint8, ElementType::Float32]
    );
    assert_eq!(
        env.buffers.get(0).unwrap().to_vec::<i8>().unwrap(),
        vec![-1, 2, -3, 4, -5]
    );
    assert_eq!(
        env.buffers.get(1).unwrap().to_vec::<u8>().unwrap(),
        vec![10, 20, 30, 40, 50]
    );
    assert_eq!(
        env.buffers.get(2).unwrap().to_vec::<f32>().unwrap(),
        vec![1.5, 2.5, 3.5, 4.5]
    );
}

#[test]
fn test_inbound_copy_policy_owns_buffers() {
    let config = KernelConfig {
        inbound_buffers: CopyPolicy::Copy,
        ..KernelConfig::default()
    };
    let kernel = Kernel::new(config);
    let server = kernel.get_server();
    let borrowed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&borrowed);
    server.register_listener(Channel::Control, move |env| {
        sink.borrow_mut()
            .extend(env.buffers.iter().map(|b| b.is_borrowed()));
        Ok(())
    });

    let bytes = [0u8; 8];
    server
        .notify_host_message(&json!({"channel": "control"}), [("float64", &bytes[..])])
        .unwrap();
    assert_eq!(*borrowed.borrow(), vec![false]);
}

#[test]
fn test_listener_registered_before_start_survives() {
    let kernel = Kernel::default();
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    kernel
        .get_server()
        .register_listener(Channel::Stdin, move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        });

    kernel.start().unwrap();
    let message = json!({"channel": "stdin", "header": {"msg_type": "input_reply"}});
    kernel
        .get_server()
        .notify_host_message(&message, Vec::<(&str, &[u8])>::new())
        .unwrap();
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn test_dispatch_without_listener_returns_normally() {
    let kernel = Kernel::default();
    kernel.start().unwrap();
    let summary = kernel
        .get_server()
        .notify_host_message(
            &json!({"channel": "heartbeat", "header": null}),
            Vec::<(&str, &[u8])>::new(),
        )
        .unwrap();
    assert!(summary.dropped());
}

#[test]
fn test_wire_echo_round_trip() {
    let kernel = Rc::new(Kernel::default());
    let lines: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&lines);
    kernel
        .get_server()
        .register_host_callback(move |topic, env| {
            sink.borrow_mut().push(wire::to_json(env, topic)?);
            Ok(())
        })
        .unwrap();
    register_echo_handlers(&kernel);
    kernel.start().unwrap();
    lines.borrow_mut().clear();

    let request = json!({
        "header": {
            "msg_id": "m1",
            "session": "s1",
            "username": "ada",
            "msg_type": "execute_request"
        },
        "parent_header": {},
        "metadata": {},
        "content": {"code": "1 + 1"},
        "channel": "shell",
        "buffers": [{"dtype": "int16", "data": "AQACAA=="}]
    });
    let envelope = wire::from_json(&request.to_string()).unwrap();
    kernel.get_server().notify_listener(&envelope);

    let replies: Vec<_> = lines
        .borrow()
        .iter()
        .map(|line| wire::from_json(line).unwrap())
        .collect();
    assert_eq!(replies.len(), 3);
    let reply = &replies[1];
    assert_eq!(reply.msg_type(), "execute_reply");
    assert_eq!(reply.parent_header.msg_id, "m1");
    assert_eq!(reply.content["echo"]["code"], "1 + 1");
    assert_eq!(
        reply.buffers.get(0).unwrap().to_vec::<i16>().unwrap(),
        vec![1, 2]
    );
}

#[test]
fn test_binary_echoes_over_stdio() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_kernel-lite"))
        .args(["--log-level", "error"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    {
        let stdin = child.stdin.as_mut().unwrap();
        let info = json!({
            "channel": "shell",
            "header": {"msg_id": "a", "msg_type": "kernel_info_request"}
        });
        let shutdown = json!({
            "channel": "control",
            "header": {"msg_id": "b", "msg_type": "shutdown_request"}
        });
        writeln!(stdin, "{info}").unwrap();
        writeln!(stdin, "not json").unwrap();
        writeln!(stdin, "{shutdown}").unwrap();
    }

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let messages: Vec<_> = stdout
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .collect();
    let types: Vec<_> = messages
        .iter()
        .map(|m| m["header"]["msg_type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        types,
        vec![
            "status",
            "status",
            "kernel_info_reply",
            "status",
            "status",
            "shutdown_reply",
            "status"
        ]
    );
    assert_eq!(messages[0]["content"]["execution_state"], "starting");
    assert!(messages[0]["topic"].as_str().unwrap().ends_with(".status"));
    assert_eq!(messages[2]["parent_header"]["msg_id"], "a");
}
