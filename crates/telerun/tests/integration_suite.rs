//! Integration tests: real sockets, real subprocesses.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tokio::net::TcpListener;

use telepack::RemoteFault;
use telepack::Value;

use telerun::client::Connection;
use telerun::client::Error as ClientError;
use telerun::client::RemoteValue;
use telerun::config::Config;
use telerun::dispatch::Dispatcher;
use telerun::dispatch::SHUTDOWN_MESSAGE;
use telerun::host::FaultResult;
use telerun::host::Host;
use telerun::host::HostObj;
use telerun::host::HostObject;
use telerun::host::HostValue;
use telerun::host::kind;
use telerun::manager::Error as ManagerError;
use telerun::manager::Manager;
use telerun::server::Server;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// ============================================================================
//  A SMALL SCENE-SHAPED HOST
// ============================================================================

/// Named slots holding values and child objects.
struct Registry {
    label: String,
    slots: Mutex<HashMap<String, HostValue>>,
}

impl Registry {
    fn new(label: &str) -> Arc<Self> {
        Arc::new(Self { label: label.into(), slots: Mutex::new(HashMap::new()) })
    }

    fn put(&self, key: &str, value: HostValue) {
        self.slots.lock().unwrap().insert(key.into(), value);
    }
}

impl HostObject for Registry {
    fn get_attr(&self, name: &str) -> FaultResult<HostValue> {
        self.slots.lock().unwrap().get(name).cloned().ok_or_else(|| {
            RemoteFault::new(kind::ATTRIBUTE_ERROR, format!("no attribute '{}'", name))
        })
    }

    fn set_attr(&self, name: &str, value: HostValue) -> FaultResult<()> {
        self.put(name, value);
        Ok(())
    }

    fn get_item(&self, key: &HostValue) -> FaultResult<HostValue> {
        let key = key
            .as_text()
            .ok_or_else(|| RemoteFault::new(kind::TYPE_ERROR, "unhashable key"))?;
        self.slots
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteFault::new(kind::KEY_ERROR, format!("'{}'", key)))
    }

    fn set_item(&self, key: HostValue, value: HostValue) -> FaultResult<()> {
        let key = key
            .as_text()
            .ok_or_else(|| RemoteFault::new(kind::TYPE_ERROR, "unhashable key"))?
            .to_string();
        self.slots.lock().unwrap().insert(key, value);
        Ok(())
    }

    fn len(&self) -> FaultResult<i64> {
        Ok(self.slots.lock().unwrap().len() as i64)
    }

    fn to_text(&self) -> FaultResult<String> {
        Ok(format!("<registry {}>", self.label))
    }
}

/// Doubles its single integer argument, or raises.
struct Doubler;

impl HostObject for Doubler {
    fn call(
        &self,
        args: Vec<HostValue>,
        _kwargs: Vec<(String, HostValue)>,
    ) -> FaultResult<HostValue> {
        match args.as_slice() {
            [HostValue::Int(n)] => Ok(HostValue::Int(n * 2)),
            _ => Err(RemoteFault::new("ValueError", "doubler wants one int")),
        }
    }

    fn to_text(&self) -> FaultResult<String> {
        Ok("<function doubler>".into())
    }
}

struct SceneHost {
    root: Arc<Registry>,
}

impl SceneHost {
    fn new() -> Arc<Self> {
        let root = Registry::new("globals");
        root.put("release", HostValue::text("2026.1"));
        let scene = Registry::new("scene");
        scene.put("frame", HostValue::Int(1001));
        root.put("scene", HostValue::Object(scene));
        root.put("double", HostValue::Object(Arc::new(Doubler)));
        Arc::new(Self { root })
    }
}

impl Host for SceneHost {
    fn globals(&self) -> HostObj {
        self.root.clone()
    }
}

async fn spawn_scene_server(config: &Config) -> (telerun::server::ServerHandle, u16) {
    let server = Server::bind(Dispatcher::new(SceneHost::new()), config)
        .await
        .expect("Failed to bind server");
    let port = server.port();
    (server.spawn(), port)
}

// --- Test 1: Full client/server exchange over TCP ---

#[tokio::test]
async fn test_tcp_roundtrip_suite() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::new().host("127.0.0.1").fixed_port(0);
    let (handle, port) = spawn_scene_server(&config).await;

    let connection = Connection::connect_to(&config, port).await?;
    assert!(connection.probe().await);

    // Global primitive and global object.
    let release = connection.global("release").await?;
    assert_eq!(release.as_text(), Some("2026.1"));
    let scene = connection.global("scene").await?.into_object()?;
    assert_eq!(scene.get_attr("frame").await?.as_int(), Some(1001));

    // Mutation visible on the next read.
    scene.set_attr("frame", Value::Int(1002)).await?;
    assert_eq!(scene.get_attr("frame").await?.as_int(), Some(1002));

    // Remote invocation.
    let double = connection.global("double").await?.into_object()?;
    assert_eq!(double.call(vec![Value::Int(21)], vec![]).await?.as_int(), Some(42));

    // Undefined top-level name vs. missing key are different failures.
    match connection.global("not_a_thing").await {
        Err(ClientError::NameUndefined(name)) => assert_eq!(name, "not_a_thing"),
        other => panic!("Expected NameUndefined, got {:?}", other.map(|_| ())),
    }
    match scene.get_item(Value::Text("not_a_key".into())).await {
        Err(ClientError::Remote(fault)) => assert_eq!(fault.kind, kind::KEY_ERROR),
        other => panic!("Expected KeyError fault, got {:?}", other.map(|_| ())),
    }

    // Remote fault kind and message survive the wire.
    match double.call(vec![], vec![]).await {
        Err(ClientError::Remote(fault)) => {
            assert_eq!(fault.kind, "ValueError");
            assert_eq!(fault.message, "doubler wants one int");
        }
        other => panic!("Expected Remote fault, got {:?}", other.map(|_| ())),
    }

    // The farewell is the server's last message; the loop then exits.
    let farewell = connection.shutdown_server().await?;
    assert_eq!(farewell, SHUTDOWN_MESSAGE);
    handle.join().await?;
    Ok(())
}

// --- Test 2: Chunked transfers over TCP ---

#[tokio::test]
async fn test_tcp_chunked_payloads() -> anyhow::Result<()> {
    init_tracing();
    // A tiny threshold so both directions chunk aggressively.
    let config = Config::new()
        .host("127.0.0.1")
        .fixed_port(0)
        .max_message_bytes(128);
    let (handle, port) = spawn_scene_server(&config).await;

    let connection = Connection::connect_to(&config, port).await?;
    let scene = connection.global("scene").await?.into_object()?;

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    scene
        .set_item(Value::Text("cache".into()), Value::Bytes(payload.clone()))
        .await?;
    match scene.get_item(Value::Text("cache".into())).await? {
        RemoteValue::Bytes(bytes) => assert_eq!(bytes, payload),
        other => panic!("Expected bytes back, got {:?}", other),
    }

    connection.shutdown_server().await?;
    handle.join().await?;
    Ok(())
}

// --- Test 3: Port scanning picks the first free/responsive port ---

/// Binds `len` consecutive ports, retrying bases until a fully free run
/// is found.
async fn claim_range(len: u16) -> (u16, Vec<TcpListener>) {
    let mut base = 45137u16;
    while base < 60000 {
        let mut held = Vec::new();
        for offset in 0..len {
            match TcpListener::bind(("0.0.0.0", base + offset)).await {
                Ok(listener) => held.push(listener),
                Err(_) => break,
            }
        }
        if held.len() == len as usize {
            return (base, held);
        }
        base += 53;
    }
    panic!("No contiguous free port range found");
}

#[tokio::test]
async fn test_port_scan_selects_first_free_port() -> anyhow::Result<()> {
    init_tracing();
    let (base, held) = claim_range(5).await;
    // Keep base..base+3 occupied; free the tail so the scan can land on it.
    let occupied: Vec<TcpListener> = held.into_iter().take(4).collect();

    let config = Config::new().host("127.0.0.1").port_range(base, base + 9);
    let server = Server::bind(Dispatcher::new(SceneHost::new()), &config).await?;
    assert_eq!(server.port(), base + 4);
    let handle = server.spawn();

    // Occupied ports answer nothing useful; discovery must walk past
    // them to the real server.
    for listener in occupied {
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
    }

    let connection = Connection::connect(&config).await?;
    assert!(connection.probe().await);
    connection.shutdown_server().await?;
    handle.join().await?;
    Ok(())
}

// --- Test 4: The managed-server callback ---

#[tokio::test]
async fn test_bind_managed_reports_bound_port() -> anyhow::Result<()> {
    init_tracing();
    let manager_listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let manager_port = manager_listener.local_addr()?.port();

    let config = Config::new().host("127.0.0.1").fixed_port(0);
    let bind = tokio::spawn(async move {
        Server::bind_managed(Dispatcher::new(SceneHost::new()), &config, manager_port).await
    });

    let (mut stream, _) = manager_listener.accept().await?;
    let mut bytes = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut bytes).await?;
    let message = telepack::decode_value(&bytes)?;

    let server = bind.await?.expect("Managed bind failed");
    assert_eq!(
        message,
        Value::List(vec![Value::Bool(true), Value::Int(server.port() as i64)])
    );
    Ok(())
}

// ============================================================================
//  MANAGER / PROCESS SUPERVISION
//
//  The "host" here is a shell one-liner: the manager only cares about
//  exit codes and the one-shot callback, both of which sh can fake.
// ============================================================================

fn manager_config(command: &str) -> Config {
    Config::new()
        .host_exec("sh")
        .host_args(["-c", command])
        .callback_timeout(Duration::from_millis(300))
        .license_retries(2, Duration::from_millis(50))
}

#[cfg(unix)]
#[tokio::test]
async fn test_manager_license_exhaustion() {
    init_tracing();
    let started = Instant::now();
    match Manager::start(manager_config("exit 100")).await {
        Err(ManagerError::LicenseExhausted { attempts }) => assert_eq!(attempts, 3),
        other => panic!("Expected LicenseExhausted, got {:?}", other.err()),
    }
    // Two retries, each preceded by the configured delay.
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[cfg(unix)]
#[tokio::test]
async fn test_manager_fatal_exit_code() {
    init_tracing();
    match Manager::start(manager_config("exit 7")).await {
        Err(ManagerError::StartupFailed { code: Some(7), .. }) => {}
        other => panic!("Expected StartupFailed(7), got {:?}", other.err()),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_manager_stalled_process_is_fatal() {
    init_tracing();
    match Manager::start(manager_config("sleep 30")).await {
        Err(ManagerError::StartupFailed { code: None, message, .. }) => {
            assert!(message.contains("never called back"));
        }
        other => panic!("Expected StartupFailed, got {:?}", other.err()),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_manager_attaches_captured_output() {
    init_tracing();
    let error = Manager::start(manager_config("echo spawned; echo licensing >&2; exit 7"))
        .await
        .err()
        .expect("Expected startup failure");
    let output = error.output().expect("Expected captured output");
    assert!(output.stdout.contains("spawned"));
    assert!(output.stderr.contains("licensing"));
}

/// Writes the server-callback bytes where a shell fake-host can `cat`
/// them at the manager.
fn write_callback_file(name: &str, port: u16) -> std::path::PathBuf {
    let bytes = telepack::encode_value(&Value::List(vec![
        Value::Bool(true),
        Value::Int(port as i64),
    ]))
    .unwrap();
    let path = std::env::temp_dir().join(format!("tele-cb-{}-{}", std::process::id(), name));
    std::fs::write(&path, bytes).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn test_manager_full_session() -> anyhow::Result<()> {
    init_tracing();
    // A real server stands in for the host's embedded one; the fake host
    // process only performs the callback.
    let server_config = Config::new().host("127.0.0.1").fixed_port(0);
    let (handle, port) = spawn_scene_server(&server_config).await;
    let callback = write_callback_file("full", port);

    let script = format!("cat {} > /dev/tcp/127.0.0.1/$0", callback.display());
    let config = Config::new()
        .host("127.0.0.1")
        .host_exec("bash")
        .host_args(["-c", script.as_str()])
        .callback_timeout(Duration::from_secs(5));

    let mut manager = Manager::start(config).await?;
    assert_eq!(manager.state(), telerun::manager::State::Bound);
    assert_eq!(manager.server_port(), port);

    let release = manager.connection().global("release").await?;
    assert_eq!(release.as_text(), Some("2026.1"));

    manager.shutdown().await?;
    assert_eq!(manager.state(), telerun::manager::State::Closed);
    handle.join().await?;
    std::fs::remove_file(callback).ok();
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_manager_retries_past_license_failures_then_succeeds() -> anyhow::Result<()> {
    init_tracing();
    let server_config = Config::new().host("127.0.0.1").fixed_port(0);
    let (handle, port) = spawn_scene_server(&server_config).await;
    let callback = write_callback_file("retry", port);
    let counter = std::env::temp_dir().join(format!("tele-ctr-{}", std::process::id()));
    std::fs::remove_file(&counter).ok();

    // Exits with the license sentinel twice, then performs the callback.
    let script = format!(
        "n=$(cat {ctr} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {ctr}; \
         if [ \"$n\" -le 2 ]; then exit 100; fi; \
         cat {cb} > /dev/tcp/127.0.0.1/$0",
        ctr = counter.display(),
        cb = callback.display(),
    );
    let config = Config::new()
        .host("127.0.0.1")
        .host_exec("bash")
        .host_args(["-c", script.as_str()])
        .callback_timeout(Duration::from_millis(400))
        .license_retries(5, Duration::from_millis(100));

    let started = Instant::now();
    let mut manager = Manager::start(config).await?;

    // Two failed attempts each cost a callback timeout plus the retry
    // delay before the third succeeds.
    assert!(started.elapsed() >= Duration::from_millis(2 * 400 + 2 * 100));
    assert_eq!(
        std::fs::read_to_string(&counter)?.trim(),
        "3",
        "expected success on the third spawn"
    );

    manager.shutdown().await?;
    handle.join().await?;
    std::fs::remove_file(callback).ok();
    std::fs::remove_file(counter).ok();
    Ok(())
}
