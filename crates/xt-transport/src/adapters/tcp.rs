//! # TCP Channel Adapter
//!
//! [`ChannelManager`] over plain `std::net::TcpStream`s. Messages use the
//! multipart stream framing from [`crate::domain::frame`]; one stream is
//! opened per role.
//!
//! Non-blocking sends try a single write with the socket switched to
//! non-blocking mode. If nothing was written the send reports `WouldBlock`
//! and the stream is untouched; if part of the message went out, the rest is
//! finished in blocking mode so the stream never carries half a frame.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::domain::{encode_message, ChannelRole, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
use crate::error::{ConfigError, TransportError};
use crate::ports::outbound::{Channel, ChannelManager, SendMode};

const READ_CHUNK: usize = 8 * 1024;

/// Where the table server listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpEndpoints {
    pub host: String,
    pub request_port: u16,
    pub push_port: u16,
    pub subscribe_port: u16,
    pub connect_timeout_ms: u64,
    /// Largest single frame sent to or accepted from the server
    pub max_frame_len: usize,
}

impl Default for TcpEndpoints {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            request_port: 1736,
            push_port: 1735,
            subscribe_port: 1737,
            connect_timeout_ms: 1000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl TcpEndpoints {
    pub fn new(
        host: impl Into<String>,
        request_port: u16,
        push_port: u16,
        subscribe_port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            request_port,
            push_port,
            subscribe_port,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_len must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn port_for(&self, role: ChannelRole) -> u16 {
        match role {
            ChannelRole::Request => self.request_port,
            ChannelRole::Push => self.push_port,
            ChannelRole::Subscribe => self.subscribe_port,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Opens one TCP stream per channel role.
#[derive(Debug, Clone)]
pub struct TcpChannelManager {
    endpoints: TcpEndpoints,
}

impl TcpChannelManager {
    pub fn new(endpoints: TcpEndpoints) -> Result<Self, ConfigError> {
        endpoints.validate()?;
        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &TcpEndpoints {
        &self.endpoints
    }

    fn connect(&self, role: ChannelRole) -> io::Result<TcpStream> {
        let port = self.endpoints.port_for(role);
        let addrs: Vec<SocketAddr> = (self.endpoints.host.as_str(), port)
            .to_socket_addrs()?
            .collect();

        let mut last_error = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} resolved to no addresses", self.endpoints.host),
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.endpoints.connect_timeout()) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

impl ChannelManager for TcpChannelManager {
    fn acquire_channel(&self, role: ChannelRole) -> Result<Box<dyn Channel>, TransportError> {
        let stream = self
            .connect(role)
            .map_err(|e| TransportError::ChannelUnavailable {
                role,
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        info!(
            role = %role,
            host = %self.endpoints.host,
            port = self.endpoints.port_for(role),
            "Channel connected"
        );
        Ok(Box::new(TcpChannel::new(
            stream,
            FrameDecoder::new(self.endpoints.max_frame_len),
        )))
    }

    fn release_channel(&self, role: ChannelRole, channel: Box<dyn Channel>) {
        debug!(role = %role, "Channel released");
        drop(channel);
    }
}

/// One framed TCP stream.
pub struct TcpChannel {
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    ready: Option<Vec<Bytes>>,
}

impl TcpChannel {
    pub fn new(stream: TcpStream, decoder: FrameDecoder) -> Self {
        Self {
            stream,
            decoder,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            ready: None,
        }
    }

    /// Move a whole buffered message into `ready`, if one is complete.
    fn take_buffered(&mut self) -> Result<bool, TransportError> {
        if self.ready.is_none() {
            self.ready = self.decoder.decode_message(&mut self.read_buf)?;
        }
        Ok(self.ready.is_some())
    }

    /// One read into `read_buf`. `Ok(false)` means the read timed out.
    fn fill(&mut self) -> Result<bool, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )
            .into()),
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn send_dont_wait(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(true)?;
        let first = self.stream.write(&self.write_buf);
        self.stream.set_nonblocking(false)?;

        let written = match first {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        if written < self.write_buf.len() {
            self.stream.write_all(&self.write_buf[written..])?;
        }
        Ok(())
    }
}

impl Channel for TcpChannel {
    fn send_message(&mut self, parts: &[&[u8]], mode: SendMode) -> Result<(), TransportError> {
        let limit = self.decoder.max_frame_len().min(u32::MAX as usize);
        if let Some(part) = parts.iter().find(|part| part.len() > limit) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit of {limit}", part.len()),
            )
            .into());
        }

        self.write_buf.clear();
        encode_message(parts, &mut self.write_buf);

        match mode {
            SendMode::Blocking => self.stream.write_all(&self.write_buf)?,
            SendMode::DontWait => self.send_dont_wait()?,
        }
        Ok(())
    }

    fn poll_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.take_buffered()? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            self.stream.set_read_timeout(Some(remaining))?;
            if !self.fill()? {
                return Ok(false);
            }
        }
    }

    fn recv_message(&mut self) -> Result<Vec<Bytes>, TransportError> {
        self.stream.set_read_timeout(None)?;
        loop {
            if self.take_buffered()? {
                if let Some(parts) = self.ready.take() {
                    return Ok(parts);
                }
            }
            self.fill()?;
        }
    }
}
