//! Outbound request messages and the encoder facade.

use bytes::Bytes;

use crate::error::CodecError;
use crate::login7::Login7;
use crate::packet::{DEFAULT_PACKET_SIZE, PacketType, frame_with_packet_size};
use crate::prelogin::PreLogin;
use crate::rpc::{RpcRequest, TypeEncoder};
use crate::sql_batch::SqlBatch;

/// A request the session layer wants to send.
#[derive(Debug, Clone)]
pub enum OutboundMessage<V> {
    /// Pre-login offer.
    PreLogin(PreLogin),
    /// LOGIN7 request.
    Login(Box<Login7>),
    /// SQL batch.
    SqlBatch(SqlBatch),
    /// Remote procedure call.
    Rpc(RpcRequest<V>),
}

impl<V> OutboundMessage<V> {
    /// Packet type the message is framed with.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::PreLogin(_) => PacketType::PreLogin,
            Self::Login(_) => PacketType::Tds7Login,
            Self::SqlBatch(_) => PacketType::SqlBatch,
            Self::Rpc(_) => PacketType::Rpc,
        }
    }
}

impl<V> From<PreLogin> for OutboundMessage<V> {
    fn from(prelogin: PreLogin) -> Self {
        Self::PreLogin(prelogin)
    }
}

impl<V> From<Login7> for OutboundMessage<V> {
    fn from(login: Login7) -> Self {
        Self::Login(Box::new(login))
    }
}

impl<V> From<SqlBatch> for OutboundMessage<V> {
    fn from(batch: SqlBatch) -> Self {
        Self::SqlBatch(batch)
    }
}

impl<V> From<RpcRequest<V>> for OutboundMessage<V> {
    fn from(request: RpcRequest<V>) -> Self {
        Self::Rpc(request)
    }
}

/// Turns [`OutboundMessage`]s into framed bytes ready for the transport.
///
/// Holds no per-connection state beyond the packet size, so one encoder can
/// be shared between connections that negotiated the same size.
#[derive(Debug, Clone)]
pub struct RequestEncoder<E> {
    type_encoder: E,
    packet_size: usize,
}

impl<E> RequestEncoder<E> {
    /// Create an encoder framing at the default packet size.
    pub fn new(type_encoder: E) -> Self {
        Self {
            type_encoder,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }

    /// Frame at the packet size the server acknowledged.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Packet size used for framing.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Encode and frame a message.
    pub fn encode<V>(&self, message: &OutboundMessage<V>) -> Result<Bytes, CodecError>
    where
        E: TypeEncoder<V>,
    {
        let payload = match message {
            OutboundMessage::PreLogin(prelogin) => prelogin.encode(),
            OutboundMessage::Login(login) => login.encode()?,
            OutboundMessage::SqlBatch(batch) => batch.encode(),
            OutboundMessage::Rpc(request) => request.encode(&self.type_encoder)?,
        };

        let packet_type = message.packet_type();
        tracing::trace!(?packet_type, payload_len = payload.len(), "encoding request");

        Ok(frame_with_packet_size(packet_type, &payload, self.packet_size))
    }
}
