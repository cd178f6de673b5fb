//! IPC integration tests - validates exec frame → bridge → plugin → push frames.

use async_trait::async_trait;
use native_bridge::host::Push;
use native_bridge::ipc::codec::{
    decode, encode, read_frame, write_frame, TransportError, MSG_ERROR, MSG_EXEC, MSG_PUSH,
};
use native_bridge::ipc::IpcServer;
use native_bridge::types::{CallbackId, ServiceEntry};
use native_bridge::{
    Bridge, CallbackContext, Config, ExecRequest, ExecVerdict, IpcConfig, ModuleCatalog,
    PluginError, ServicePlugin, ServiceRegistry, Status,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;

struct Counter;

#[async_trait]
impl ServicePlugin for Counter {
    async fn exec(
        &self,
        action: &str,
        args: Vec<Value>,
        ctx: CallbackContext,
    ) -> Result<ExecVerdict, PluginError> {
        match action {
            "count" => {
                let to = args.first().and_then(Value::as_u64).unwrap_or(2);
                for n in 1..to {
                    ctx.progress(n);
                }
                ctx.success(to);
                Ok(ExecVerdict::Handled)
            }
            "slow" => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                ctx.success("slow");
                Ok(ExecVerdict::Handled)
            }
            "fast" => {
                ctx.success("fast");
                Ok(ExecVerdict::Handled)
            }
            "hold" => {
                ctx.progress("held");
                tokio::time::sleep(Duration::from_secs(60)).await;
                ctx.success("released");
                Ok(ExecVerdict::Handled)
            }
            _ => Ok(ExecVerdict::Unhandled),
        }
    }
}

/// Helper: spin up an IpcServer on a random port, return its address.
async fn start_test_server() -> std::net::SocketAddr {
    start_test_server_with(IpcConfig::default()).await
}

async fn start_test_server_with(ipc_config: IpcConfig) -> std::net::SocketAddr {
    let mut config = Config::default();
    config.services.insert(
        "Counter".to_string(),
        ServiceEntry {
            module_id: "counter".to_string(),
            plugin_id: "counter".to_string(),
        },
    );
    let registry =
        ServiceRegistry::builder(&config, ModuleCatalog::new().with_router("counter", Counter))
            .build()
            .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let server = IpcServer::new(Bridge::new(registry), addr, ipc_config);
        let _ = server.serve_on(listener).await;
    });

    addr
}

async fn send_exec(stream: &mut TcpStream, service: &str, action: &str, args: Vec<Value>, id: &str) {
    let request = ExecRequest {
        service: service.to_string(),
        action: action.to_string(),
        args,
        callback_id: CallbackId::from_string(id.to_string()).unwrap(),
    };
    write_frame(stream, MSG_EXEC, &encode(&request).unwrap())
        .await
        .unwrap();
}

async fn next_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    tokio::time::timeout(Duration::from_secs(5), read_frame(stream, 1024 * 1024))
        .await
        .expect("no frame within 5s")
        .unwrap()
        .expect("connection closed")
}

async fn next_push(stream: &mut TcpStream) -> Push {
    let (msg_type, payload) = next_frame(stream).await;
    assert_eq!(msg_type, MSG_PUSH);
    decode(&payload).unwrap()
}

#[tokio::test]
async fn test_exec_streams_progress_then_terminal() {
    let addr = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_exec(&mut stream, "Counter", "count", vec![json!(3)], "Counter1").await;

    let mut seen = Vec::new();
    loop {
        let push = next_push(&mut stream).await;
        assert_eq!(push.callback_id.as_str(), "Counter1");
        let done = !push.result.keep_callback;
        seen.push((push.result.status, push.result.data));
        if done {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            (Status::OK, json!(1)),
            (Status::OK, json!(2)),
            (Status::OK, json!(3)),
        ]
    );
}

#[tokio::test]
async fn test_unknown_service_pushes_error_envelope() {
    let addr = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_exec(&mut stream, "Camera", "takePicture", vec![], "Camera1").await;
    let push = next_push(&mut stream).await;

    assert_eq!(push.callback_id.as_str(), "Camera1");
    assert!(push.result.status.has(Status::ERROR_UNKNOWN_SERVICE));
    assert!(!push.result.keep_callback);
    assert_eq!(push.result.data["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_unknown_action_pushes_error_envelope() {
    let addr = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_exec(&mut stream, "Counter", "reset", vec![], "Counter9").await;
    let push = next_push(&mut stream).await;
    assert!(push.result.status.has(Status::ERROR_UNKNOWN_ACTION));
    assert_eq!(push.result.data["code"], "ACTION_NOT_FOUND");
}

#[tokio::test]
async fn test_calls_on_one_connection_run_concurrently() {
    let addr = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_exec(&mut stream, "Counter", "slow", vec![], "slow-1").await;
    send_exec(&mut stream, "Counter", "fast", vec![], "fast-1").await;

    let first = next_push(&mut stream).await;
    let second = next_push(&mut stream).await;
    assert_eq!(first.callback_id.as_str(), "fast-1");
    assert_eq!(second.callback_id.as_str(), "slow-1");
}

#[tokio::test]
async fn test_bad_frames_get_transport_errors() {
    let addr = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    write_frame(&mut stream, 0x07, b"").await.unwrap();
    let (msg_type, payload) = next_frame(&mut stream).await;
    assert_eq!(msg_type, MSG_ERROR);
    let error: TransportError = decode(&payload).unwrap();
    assert_eq!(error.code, "INVALID_ARGUMENT");

    write_frame(&mut stream, MSG_EXEC, &[0xC1]).await.unwrap();
    let (msg_type, _) = next_frame(&mut stream).await;
    assert_eq!(msg_type, MSG_ERROR);

    // The connection survives both.
    send_exec(&mut stream, "Counter", "fast", vec![], "after").await;
    assert_eq!(next_push(&mut stream).await.result.data, json!("fast"));
}

#[tokio::test]
async fn test_disconnect_frees_slot_while_call_pending() {
    let addr = start_test_server_with(IpcConfig {
        max_connections: 1,
        drain_timeout: Duration::from_millis(100),
        ..IpcConfig::default()
    })
    .await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    send_exec(&mut first, "Counter", "hold", vec![], "hold-1").await;
    let push = next_push(&mut first).await;
    assert_eq!(push.result.data, json!("held"));
    assert!(push.result.keep_callback);
    drop(first);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    send_exec(&mut second, "Counter", "fast", vec![], "fast-2").await;
    let push = next_push(&mut second).await;
    assert_eq!(push.callback_id.as_str(), "fast-2");
    assert_eq!(push.result.data, json!("fast"));
}
