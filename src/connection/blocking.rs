use super::session::{ReadOutcome, Session};
use super::{Connection, Listener, Sender};
use crate::error::Error;
use crate::message::Message;
use crate::socket::SocketOptions;
use socket2::SockRef;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use tracing::{debug, error, instrument, trace};

const READ_CHUNK_SIZE: usize = 8 * 1024;

// Why a frame could not be read.
#[derive(Debug)]
enum ReadFailure {
    SoftEndOfStream,
    Timeout,
    Closed,
    Fatal(Error),
}

/// A connection over a blocking socket, read by a dedicated thread.
#[derive(Debug)]
pub struct BlockingConnection {
    session: Session,
    stream: TcpStream,
}

impl BlockingConnection {
    pub(crate) fn new(stream: TcpStream, session: Session) -> Self {
        Self { session, stream }
    }

    /// Reads frames until the connection ends, delivering each one.
    ///
    /// Returns immediately if there is no listener and the connection is
    /// pooled, since nothing would consume the data.
    #[instrument(skip(self), fields(id = %self.session.id()))]
    pub(crate) fn run(&self) {
        if !self.session.has_listener() && !self.session.is_single_use() {
            debug!("No listener and not single use, not reading");
            return;
        }
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        debug!("Reading");
        loop {
            match self.read_frame(&mut buf, &mut chunk) {
                Ok(payload) => {
                    if self.session.deliver(payload) == ReadOutcome::Close {
                        self.close();
                        break;
                    }
                }
                Err(ReadFailure::SoftEndOfStream) => {
                    debug!("Connection closed by peer");
                    self.close();
                    break;
                }
                Err(ReadFailure::Closed) => {
                    debug!("Connection closed");
                    break;
                }
                Err(ReadFailure::Timeout) => {
                    if self.session.on_idle_timeout() {
                        self.close();
                        break;
                    }
                }
                Err(ReadFailure::Fatal(err)) => {
                    error!(?err, peer_addr = %self.session.peer_addr(), "Read exception");
                    self.close();
                    break;
                }
            }
        }
    }

    fn read_frame(&self, buf: &mut Vec<u8>, chunk: &mut [u8]) -> Result<Vec<u8>, ReadFailure> {
        loop {
            match self.session.codec().decode(buf) {
                Ok(Some((payload, consumed))) => {
                    buf.drain(..consumed);
                    return Ok(payload);
                }
                Ok(None) => {}
                Err(err) => return Err(ReadFailure::Fatal(err)),
            }

            match (&self.stream).read(chunk) {
                Ok(0) if !self.session.is_open() => return Err(ReadFailure::Closed),
                Ok(0) if buf.is_empty() => return Err(ReadFailure::SoftEndOfStream),
                Ok(0) => {
                    return Err(ReadFailure::Fatal(Error::UnexpectedEndOfStream {
                        id: self.session.id().to_string(),
                    }))
                }
                Ok(n) => {
                    trace!(len = n, "Read data from socket");
                    buf.extend_from_slice(&chunk[..n]);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) if !self.session.is_open() => return Err(ReadFailure::Closed),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(ReadFailure::Timeout)
                }
                Err(err) => return Err(ReadFailure::Fatal(err.into())),
            }
        }
    }
}

impl Connection for BlockingConnection {
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
        (&self.stream).write_all(&frame)?;
        (&self.stream).flush()?;
        debug!(id = %self.session.id(), len = message.payload.len(), "Message sent");
        if self.session.closes_after_reply() {
            self.close();
        }
        Ok(())
    }

    fn close(&self) {
        if self.session.close() {
            // Wakes the reader thread; the descriptor goes away on drop
            let _ = self.stream.shutdown(Shutdown::Both);
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
        SocketOptions::read(SockRef::from(&self.stream))
    }
}
