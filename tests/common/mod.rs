//! Scripted SCPI responder for integration tests.
//!
//! Listens on an ephemeral localhost port, records every received line and
//! answers according to a responder closure.

#![allow(dead_code)]

use scpi_generator::Endpoint;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

pub const KEYSIGHT_IDN: &str = "Agilent Technologies, E8267D, US44320123, C.06.10";
pub const ROHDE_SCHWARZ_IDN: &str = "Rohde&Schwarz,SMB100A,1406.6000k03/102345,3.1.19.15-3.20.390.24";

/// What the fake instrument does with one received line.
pub enum Reply {
    /// Send this text followed by `\n`
    Line(String),
    /// Send this text after a delay
    Late(String, Duration),
    /// Say nothing
    Silent,
    /// Drop the connection
    Close,
}

pub struct FakeInstrument {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeInstrument {
    pub async fn spawn<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake instrument");
        let addr = listener.local_addr().expect("No local address");

        let responder = Arc::new(responder);
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = received.clone();
            let accepted = accepted.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let responder = responder.clone();
                    let received = received.clone();
                    let closed = closed.clone();

                    tokio::spawn(async move {
                        let (read_half, mut write_half) = socket.into_split();
                        let mut lines = BufReader::new(read_half).lines();

                        while let Ok(Some(line)) = lines.next_line().await {
                            received.lock().unwrap().push(line.clone());
                            match responder(&line) {
                                Reply::Line(text) => {
                                    let reply = format!("{text}\n");
                                    if write_half.write_all(reply.as_bytes()).await.is_err() {
                                        break;
                                    }
                                }
                                Reply::Late(text, delay) => {
                                    tokio::time::sleep(delay).await;
                                    let reply = format!("{text}\n");
                                    if write_half.write_all(reply.as_bytes()).await.is_err() {
                                        break;
                                    }
                                }
                                Reply::Silent => {}
                                Reply::Close => break,
                            }
                        }
                        closed.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            received,
            accepted,
            closed,
            task,
        }
    }

    /// A well-behaved generator with the given identity.
    pub async fn generator(idn: &'static str) -> Self {
        Self::spawn(generator_responder(idn)).await
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", u32::from(self.addr.port())).expect("Valid endpoint")
    }

    /// Lines received so far, terminators stripped.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until `count` connections have been closed by the client.
    pub async fn wait_closed(&self, count: usize) -> bool {
        wait_for(|| self.closed() >= count).await
    }

    /// Wait until `count` connections have been accepted.
    pub async fn wait_accepted(&self, count: usize) -> bool {
        wait_for(|| self.accepted() >= count).await
    }
}

impl Drop for FakeInstrument {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Answers `*IDN?`, acknowledges every `*OPC?` with `1` and reports empty
/// error lists. Anything else is ignored.
pub fn generator_responder(idn: &'static str) -> impl Fn(&str) -> Reply + Send + Sync + 'static {
    move |line: &str| {
        if line == "*IDN?" {
            Reply::Line(idn.to_string())
        } else if line.ends_with("*OPC?") {
            Reply::Line("1".to_string())
        } else if line == "SYST:ERR?" || line == "SYST:SERR?" {
            Reply::Line("0,\"No error\"".to_string())
        } else {
            Reply::Silent
        }
    }
}

/// A locally free port with nothing listening on it.
pub async fn refused_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    let port = listener.local_addr().expect("No local address").port();
    drop(listener);
    Endpoint::new("127.0.0.1", u32::from(port)).expect("Valid endpoint")
}

/// A loopback listener that never accepts, with its backlog already full.
///
/// Further handshakes to it stall until the client gives up, which makes a
/// connect timeout reproducible without leaving the host.
pub struct SaturatedListener {
    endpoint: Endpoint,
    _listener: TcpListener,
    _queued: Vec<TcpStream>,
}

impl SaturatedListener {
    pub async fn bind() -> Self {
        let socket = TcpSocket::new_v4().expect("Failed to create socket");
        socket
            .bind("127.0.0.1:0".parse().expect("Valid address"))
            .expect("Failed to bind");
        let listener = socket.listen(0).expect("Failed to listen");
        let addr = listener.local_addr().expect("No local address");

        // Queue connections until one stalls.
        let mut queued = Vec::new();
        for _ in 0..16 {
            match tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => queued.push(stream),
                Ok(Err(e)) => panic!("Filling the backlog failed: {e}"),
                Err(_) => break,
            }
        }

        Self {
            endpoint: Endpoint::new("127.0.0.1", u32::from(addr.port())).expect("Valid endpoint"),
            _listener: listener,
            _queued: queued,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }
}
