use std::net::SocketAddr;

/// A payload travelling over a connection.
///
/// Inbound messages carry headers identifying the connection they arrived
/// on, so a listener can route a reply back through the right
/// [`Connection`](crate::Connection). Outbound messages only need a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
}

/// Connection metadata attached to inbound messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub connection_id: Option<String>,
    pub peer_addr: Option<SocketAddr>,
    pub local_port: Option<u16>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            headers: MessageHeaders::default(),
        }
    }

    pub(crate) fn inbound(
        payload: Vec<u8>,
        connection_id: &str,
        peer_addr: SocketAddr,
        local_port: u16,
    ) -> Self {
        Self {
            payload,
            headers: MessageHeaders {
                connection_id: Some(connection_id.to_string()),
                peer_addr: Some(peer_addr),
                local_port: Some(local_port),
            },
        }
    }

    /// The id of the connection this message arrived on, if any.
    pub fn connection_id(&self) -> Option<&str> {
        self.headers.connection_id.as_deref()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::new(text.as_bytes())
    }
}
