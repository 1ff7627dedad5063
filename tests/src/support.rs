//! Fake XTables server for end-to-end tests.
//!
//! Listens on three loopback ports (request, push and subscribe) and speaks
//! the same multipart stream framing as the TCP adapter. Replies on the
//! request port follow a script; once the script is empty every request is
//! echoed. Updates passed to `publish` go out to every subscribe connection.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use xt_transport::domain::{encode_message, FrameDecoder, RequestId};
use xt_transport::TcpEndpoints;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What the server does with the next request it reads.
#[derive(Debug, Clone)]
pub enum ServerAction {
    Echo,
    /// Reply with `payload` after `delay`.
    Reply { payload: Bytes, delay: Duration },
    /// Reply under an id that was never sent.
    WrongId,
    /// Read the request and never answer.
    Silent,
    /// Read the request and drop the connection.
    Close,
}

impl ServerAction {
    pub fn reply(payload: &'static [u8], delay: Duration) -> Self {
        ServerAction::Reply {
            payload: Bytes::from_static(payload),
            delay,
        }
    }
}

#[derive(Default)]
struct ServerState {
    script: Mutex<VecDeque<ServerAction>>,
    requests: Mutex<Vec<(RequestId, Bytes)>>,
    pushed: Mutex<Vec<Bytes>>,
    subscribers: Mutex<Vec<TcpStream>>,
    request_connections: AtomicUsize,
    push_connections: AtomicUsize,
    subscribe_connections: AtomicUsize,
    shutdown: AtomicBool,
}

impl ServerState {
    fn next_action(&self) -> ServerAction {
        self.script.lock().pop_front().unwrap_or(ServerAction::Echo)
    }
}

/// Loopback server standing in for XTables.
pub struct FakeXTablesServer {
    request_addr: SocketAddr,
    push_addr: SocketAddr,
    subscribe_addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FakeXTablesServer {
    pub fn start() -> io::Result<Self> {
        let request_listener = TcpListener::bind("127.0.0.1:0")?;
        let push_listener = TcpListener::bind("127.0.0.1:0")?;
        let subscribe_listener = TcpListener::bind("127.0.0.1:0")?;
        let request_addr = request_listener.local_addr()?;
        let push_addr = push_listener.local_addr()?;
        let subscribe_addr = subscribe_listener.local_addr()?;
        let state = Arc::new(ServerState::default());

        spawn_acceptor(request_listener, Arc::clone(&state), Role::Request)?;
        spawn_acceptor(push_listener, Arc::clone(&state), Role::Push)?;
        spawn_acceptor(subscribe_listener, Arc::clone(&state), Role::Subscribe)?;

        Ok(Self {
            request_addr,
            push_addr,
            subscribe_addr,
            state,
        })
    }

    pub fn endpoints(&self) -> TcpEndpoints {
        TcpEndpoints {
            connect_timeout_ms: 500,
            ..TcpEndpoints::new(
                "127.0.0.1",
                self.request_addr.port(),
                self.push_addr.port(),
                self.subscribe_addr.port(),
            )
        }
    }

    /// Send a `[key, payload]` update to every open subscribe connection.
    /// Returns how many connections it reached.
    pub fn publish(&self, key: &str, payload: &[u8]) -> usize {
        let mut out = BytesMut::new();
        encode_message(&[key.as_bytes(), payload], &mut out);
        let mut subscribers = self.state.subscribers.lock();
        subscribers.retain_mut(|stream| stream.write_all(&out).is_ok());
        subscribers.len()
    }

    /// Close every subscribe connection from the server side.
    pub fn drop_subscribers(&self) {
        for stream in self.state.subscribers.lock().drain(..) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    pub fn script<I>(&self, actions: I)
    where
        I: IntoIterator<Item = ServerAction>,
    {
        self.state.script.lock().extend(actions);
    }

    /// Requests read so far, in arrival order.
    pub fn requests(&self) -> Vec<(RequestId, Bytes)> {
        self.state.requests.lock().clone()
    }

    pub fn pushed(&self) -> Vec<Bytes> {
        self.state.pushed.lock().clone()
    }

    pub fn request_connections(&self) -> usize {
        self.state.request_connections.load(Ordering::SeqCst)
    }

    pub fn push_connections(&self) -> usize {
        self.state.push_connections.load(Ordering::SeqCst)
    }

    pub fn subscribe_connections(&self) -> usize {
        self.state.subscribe_connections.load(Ordering::SeqCst)
    }

    /// Poll until `condition` holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        condition(self)
    }
}

impl Drop for FakeXTablesServer {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy)]
enum Role {
    Request,
    Push,
    Subscribe,
}

fn spawn_acceptor(listener: TcpListener, state: Arc<ServerState>, role: Role) -> io::Result<()> {
    listener.set_nonblocking(true)?;
    thread::Builder::new()
        .name("fake-xtables-accept".to_string())
        .spawn(move || {
            while !state.shutdown.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&state);
                        let counter = match role {
                            Role::Request => &state.request_connections,
                            Role::Push => &state.push_connections,
                            Role::Subscribe => &state.subscribe_connections,
                        };
                        if let Role::Subscribe = role {
                            match stream.try_clone() {
                                Ok(writer) => state.subscribers.lock().push(writer),
                                Err(_) => continue,
                            }
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                        thread::spawn(move || {
                            let _ = serve(stream, &state, role);
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                    Err(_) => return,
                }
            }
        })?;
    Ok(())
}

fn serve(mut stream: TcpStream, state: &ServerState, role: Role) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(50)))?;
    let decoder = FrameDecoder::default();
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 4096];

    while !state.shutdown.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => return Err(e),
        }

        while let Ok(Some(parts)) = decoder.decode_message(&mut buf) {
            match role {
                Role::Push => state.pushed.lock().extend(parts),
                Role::Subscribe => {}
                Role::Request => {
                    if !answer(&mut stream, state, parts)? {
                        return Ok(());
                    }
                }
            }
        }
    }
    Ok(())
}

/// Returns `false` once the connection should be closed.
fn answer(stream: &mut TcpStream, state: &ServerState, parts: Vec<Bytes>) -> io::Result<bool> {
    let [id_frame, payload]: [Bytes; 2] = parts
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "expected two frames"))?;
    let id = RequestId::from_frame(&id_frame)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    state.requests.lock().push((id, payload.clone()));

    let (reply_id, reply) = match state.next_action() {
        ServerAction::Echo => (id, payload),
        ServerAction::Reply { payload, delay } => {
            thread::sleep(delay);
            (id, payload)
        }
        ServerAction::WrongId => (RequestId::new(id.value() + 1_000), payload),
        ServerAction::Silent => return Ok(true),
        ServerAction::Close => return Ok(false),
    };

    let mut out = BytesMut::new();
    let reply_id = reply_id.to_be_bytes();
    encode_message(&[&reply_id[..], &reply[..]], &mut out);
    stream.write_all(&out)?;
    Ok(true)
}
