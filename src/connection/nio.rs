//! Connections driven by a selector loop.
//!
//! The selector thread owns registration and interest changes; reads run on
//! the worker pool and writes happen on the caller's thread, with any
//! remainder flushed by the selector once the socket turns writable.

use super::session::{ReadOutcome, Session};
use super::{Connection, Listener, Sender};
use crate::error::Error;
use crate::message::Message;
use crate::socket::SocketOptions;
use mio::net::TcpStream;
use mio::{Token, Waker};
use parking_lot::Mutex;
use socket2::SockRef;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;
use tracing::{debug, trace};

const READ_CHUNK_SIZE: usize = 8 * 1024;

// ============================================================================
// Selector Handoff
// ============================================================================

// Requests handed to the selector thread. Registration and interest changes
// must happen there.
#[derive(Debug)]
pub(crate) enum LoopRequest {
    // A new client channel to track and arm for reading.
    Register(Arc<NioConnection>),
    // A dispatched read finished; restore read interest.
    Rearm(Token),
    // Unwritten bytes are queued; arm for writing.
    Writable(Token),
    // The connection closed; forget it.
    Closed(Token),
    // The factory stopped; stop accepting and drain what is left.
    Shutdown,
}

/// Cross-thread handle to a selector loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopHandle {
    sender: mpsc::Sender<LoopRequest>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    pub fn new(sender: mpsc::Sender<LoopRequest>, waker: Arc<Waker>) -> Self {
        Self { sender, waker }
    }

    pub fn request(&self, request: LoopRequest) {
        // A gone loop means the factory stopped; nothing left to notify
        if self.sender.send(request).is_ok() {
            self.wake();
        }
    }

    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            debug!(?err, "Failed to wake selector");
        }
    }
}

// ============================================================================
// NioConnection
// ============================================================================

/// A connection over a non-blocking socket registered with a selector.
#[derive(Debug)]
pub struct NioConnection {
    session: Session,
    token: Token,
    stream: Mutex<TcpStream>,
    // Lock order: outbound, then stream, then inbound.
    inbound: Mutex<Vec<u8>>,
    outbound: Mutex<Vec<u8>>,
    scratch: Option<Mutex<Vec<u8>>>,
    last_read: Mutex<Instant>,
    close_after_flush: AtomicBool,
    handle: LoopHandle,
}

impl NioConnection {
    pub(crate) fn new(
        stream: TcpStream,
        token: Token,
        session: Session,
        handle: LoopHandle,
        using_direct_buffers: bool,
    ) -> Self {
        Self {
            session,
            token,
            stream: Mutex::new(stream),
            inbound: Mutex::new(Vec::new()),
            outbound: Mutex::new(Vec::new()),
            scratch: using_direct_buffers.then(|| Mutex::new(vec![0u8; READ_CHUNK_SIZE])),
            last_read: Mutex::new(Instant::now()),
            close_after_flush: AtomicBool::new(false),
            handle,
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn with_stream<R>(&self, f: impl FnOnce(&mut TcpStream) -> R) -> R {
        f(&mut *self.stream.lock())
    }

    pub(crate) fn last_read(&self) -> Instant {
        *self.last_read.lock()
    }

    pub(crate) fn touch(&self) {
        *self.last_read.lock() = Instant::now();
    }

    /// Terminal idle transition: closes unless the session keeps waiting.
    pub(crate) fn timeout(&self) -> bool {
        if self.session.on_idle_timeout() {
            self.close();
            true
        } else {
            false
        }
    }

    /// Reads everything available, then delivers each complete frame.
    ///
    /// Runs on a worker while read interest is withdrawn, so reads for one
    /// connection never overlap.
    pub(crate) fn read_packet(&self) -> Result<(), Error> {
        let eof = self.fill_inbound()?;

        loop {
            let frame = {
                let mut inbound = self.inbound.lock();
                match self.session.codec().decode(&inbound)? {
                    Some((payload, consumed)) => {
                        inbound.drain(..consumed);
                        Some(payload)
                    }
                    None => None,
                }
            };
            let Some(payload) = frame else {
                break;
            };
            if self.session.deliver(payload) == ReadOutcome::Close {
                self.close();
                return Ok(());
            }
        }

        if eof {
            if self.inbound.lock().is_empty() || !self.session.is_open() {
                debug!(id = %self.session.id(), "Connection closed by peer");
                self.close();
            } else {
                return Err(Error::UnexpectedEndOfStream {
                    id: self.session.id().to_string(),
                });
            }
        }
        Ok(())
    }

    // Returns true when the peer closed its side. One pass reads at most a
    // frame's worth plus a chunk; whatever is left waits for the next pass.
    fn fill_inbound(&self) -> Result<bool, Error> {
        let limit = self
            .session
            .max_message_size()
            .saturating_add(READ_CHUNK_SIZE);
        let mut local_chunk: Vec<u8>;
        let mut scratch_guard = self.scratch.as_ref().map(|s| s.lock());
        let chunk: &mut [u8] = match scratch_guard.as_deref_mut() {
            Some(scratch) => scratch.as_mut_slice(),
            None => {
                local_chunk = vec![0u8; READ_CHUNK_SIZE];
                local_chunk.as_mut_slice()
            }
        };

        let mut stream = self.stream.lock();
        let mut inbound = self.inbound.lock();
        let mut read = 0;
        while read < limit {
            let want = chunk.len().min(limit - read);
            match stream.read(&mut chunk[..want]) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    trace!(id = %self.session.id(), len = n, "Read data from socket");
                    inbound.extend_from_slice(&chunk[..n]);
                    read += n;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        trace!(id = %self.session.id(), limit, "Read limit reached");
        Ok(false)
    }

    /// Writes queued bytes; returns true once nothing is left.
    ///
    /// Called by the selector thread on a writable event.
    pub(crate) fn flush(&self) -> Result<bool, Error> {
        let mut outbound = self.outbound.lock();
        let written = write_available(&mut self.stream.lock(), &outbound)?;
        outbound.drain(..written);
        let done = outbound.is_empty();
        drop(outbound);
        if done && self.close_after_flush.load(Ordering::Acquire) {
            self.close();
        }
        Ok(done)
    }
}

// Writes until done or the socket would block; returns the bytes written.
fn write_available(stream: &mut TcpStream, buf: &[u8]) -> io::Result<usize> {
    let mut pos = 0;
    while pos < buf.len() {
        match stream.write(&buf[pos..]) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => pos += n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(pos)
}

impl Connection for NioConnection {
    fn connection_id(&self) -> &str {
        self.session.id()
    }

    fn is_open(&self) -> bool {
        self.session.is_open()
    }

    fn is_server(&self) -> bool {
        self.session.is_server()
    }

    fn is_single_use(&self) -> bool {
        self.session.is_single_use()
    }

    fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    fn peer_addr(&self) -> SocketAddr {
        self.session.peer_addr()
    }

    fn send(&self, message: &Message) -> Result<(), Error> {
        if !self.session.is_open() {
            return Err(Error::ConnectionClosed {
                id: self.session.id().to_string(),
            });
        }
        let mut frame = Vec::new();
        self.session.codec().encode(&message.payload, &mut frame)?;

        let mut outbound = self.outbound.lock();
        if outbound.is_empty() {
            let written = write_available(&mut self.stream.lock(), &frame)?;
            frame.drain(..written);
        }
        if frame.is_empty() && outbound.is_empty() {
            drop(outbound);
            debug!(id = %self.session.id(), len = message.payload.len(), "Message sent");
            if self.session.closes_after_reply() {
                self.close();
            }
            return Ok(());
        }

        // The socket is full; the selector finishes the write
        outbound.extend_from_slice(&frame);
        drop(outbound);
        if self.session.closes_after_reply() {
            self.close_after_flush.store(true, Ordering::Release);
        }
        trace!(id = %self.session.id(), "Queued remainder for selector");
        self.handle.request(LoopRequest::Writable(self.token));
        Ok(())
    }

    fn close(&self) {
        if self.session.close() {
            let _ = self.stream.lock().shutdown(Shutdown::Both);
            self.handle.request(LoopRequest::Closed(self.token));
        }
    }

    fn register_listener(&self, listener: Arc<dyn Listener>) -> Result<(), Error> {
        self.session.register_listener(listener)
    }

    fn register_sender(&self, sender: Arc<dyn Sender>) -> Result<(), Error> {
        self.session.register_sender(sender)
    }

    fn listener(&self) -> Option<Arc<dyn Listener>> {
        self.session.listener()
    }

    fn sender(&self) -> Option<Arc<dyn Sender>> {
        self.session.sender()
    }

    fn socket_options(&self) -> Result<SocketOptions, Error> {
        let stream = self.stream.lock();
        SocketOptions::read(SockRef::from(&*stream))
    }
}
