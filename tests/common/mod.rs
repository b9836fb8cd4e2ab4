//! Shared utilities for integration tests.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use std::future::Future;
use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use meshwire::mesh::Dispatcher;
use meshwire::transport::{self, PeerId, Port};
use meshwire::{BoxError, MeshConfig, MeshRequest, MeshResponse, Server, Wire};

type Task = Box<dyn FnOnce(Wire) -> BoxFuture<'static, ()> + Send>;

/// An execution unit running on its own thread and runtime.
pub struct UnitHandle {
    pub id: PeerId,
    tasks: Option<mpsc::UnboundedSender<Task>>,
    thread: Option<JoinHandle<()>>,
}

impl UnitHandle {
    /// Run `f` inside the unit, against its wire.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Wire) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: Task = Box::new(move |wire| {
            Box::pin(async move {
                let _ = tx.send(f(wire).await);
            })
        });
        let sent = self.tasks.as_ref().map(|tasks| tasks.send(task).is_ok());
        assert_eq!(sent, Some(true), "unit is not running");
        rx.await.expect("unit dropped the task")
    }

    /// Terminate abruptly: the runtime is dropped without any close handshake.
    pub fn kill(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tasks.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a unit whose server is built inside its own runtime.
/// Returns the coordinator side of its port.
pub fn spawn_unit<F>(config: MeshConfig, make_server: F) -> (Port, UnitHandle)
where
    F: FnOnce(Dispatcher) -> Server + Send + 'static,
{
    let (coordinator_side, unit_side) = transport::unit();
    (coordinator_side, start_unit(unit_side, config, make_server))
}

/// Run a unit on the unit side of an existing port.
pub fn start_unit<F>(unit_side: Port, config: MeshConfig, make_server: F) -> UnitHandle
where
    F: FnOnce(Dispatcher) -> Server + Send + 'static,
{
    let id = unit_side.local();
    let (tasks, mut rx) = mpsc::unbounded_channel::<Task>();

    let thread = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let wire = Wire::build(unit_side, config, make_server);
            while let Some(task) = rx.recv().await {
                tokio::spawn(task(wire.clone()));
            }
        });
    });

    UnitHandle {
        id,
        tasks: Some(tasks),
        thread: Some(thread),
    }
}

/// A unit answering every request with its own id as the body.
pub fn spawn_echo_unit(config: MeshConfig) -> (Port, UnitHandle) {
    let (coordinator_side, unit_side) = transport::unit();
    let id = unit_side.local().to_string();
    let handle = start_unit(unit_side, config, move |_| {
        Server::handler(move |_req: MeshRequest| {
            let id = id.clone();
            async move { Ok::<_, BoxError>(MeshResponse::ok(id)) }
        })
    });
    (coordinator_side, handle)
}

/// Body of a successful response as text.
pub async fn text(response: MeshResponse) -> String {
    let bytes = response.body.collect().await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}
