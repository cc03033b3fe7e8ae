//! Response dispatch keyed on protocol state.
//!
//! The session layer owns the protocol state and hands every reassembled
//! inbound message to [`ResponseDispatcher::dispatch`] together with the
//! state it is currently in. The dispatcher decides how the payload is
//! interpreted and never changes the state itself.
//!
//! ## Transitions
//!
//! ```text
//! (LoggingIn, TabularResult) -> LoginAck { raw_payload }
//! (Ready,     TabularResult) -> token stream -> SqlResult | ServerError
//! anything else              -> UnexpectedMessage
//! ```

use bytes::Bytes;

use crate::error::CodecError;
use crate::packet::{PacketHeader, PacketType};
use crate::token::{
    ColMetaData, Done, EnvChange, RawRow, ResultSet, ReturnValue, ServerInfo, TokenSet,
    TokenStreamDecoder, TokenStreamReader,
};

/// Connection phase as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    /// Pre-login sent, no login yet.
    Prelogin,
    /// LOGIN7 sent, awaiting the acknowledgement.
    LoggingIn,
    /// Logged in; requests are executing or may be sent.
    Ready,
}

/// Result of a successfully executed request.
///
/// Any part may be absent: a DDL statement produces no columns and no rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlResult {
    /// Column metadata of the first result set.
    pub columns: Option<ColMetaData>,
    /// Rows of the first result set.
    pub rows: Vec<RawRow>,
    /// Final DONE-family token.
    pub completion: Option<Done>,
    /// Result sets after the first one.
    pub more_results: Vec<ResultSet>,
    /// RETURNSTATUS of a procedure call.
    pub return_status: Option<i32>,
    /// OUTPUT parameter values.
    pub return_values: Vec<ReturnValue>,
    /// Informational messages.
    pub infos: Vec<ServerInfo>,
    /// Environment changes, such as a new transaction descriptor.
    pub env_changes: Vec<EnvChange>,
}

impl SqlResult {
    /// Build from a decoded token set that carried no error.
    fn from_tokens(tokens: TokenSet) -> Self {
        let completion = tokens.completion().cloned();
        let mut result_sets = tokens.result_sets.into_iter();
        let (columns, rows) = match result_sets.next() {
            Some(first) => (Some(first.columns), first.rows),
            None => (None, Vec::new()),
        };

        Self {
            columns,
            rows,
            completion,
            more_results: result_sets.collect(),
            return_status: tokens.return_status,
            return_values: tokens.return_values,
            infos: tokens.infos,
            env_changes: tokens.env_changes,
        }
    }

    /// Rows affected according to the completion token.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        self.completion.as_ref().and_then(Done::rows_affected)
    }
}

/// Typed outcome of a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedOutcome {
    /// Login acknowledgement, payload kept verbatim for the session layer.
    LoginAck {
        /// Reply payload as received.
        raw_payload: Bytes,
    },
    /// Request result.
    SqlResult(SqlResult),
}

/// Routes inbound messages by protocol state.
#[derive(Debug, Clone, Default)]
pub struct ResponseDispatcher<D = TokenStreamReader> {
    decoder: D,
}

impl ResponseDispatcher<TokenStreamReader> {
    /// Create a dispatcher using the built-in token reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: TokenStreamDecoder> ResponseDispatcher<D> {
    /// Create a dispatcher with a custom token stream decoder.
    pub fn with_decoder(decoder: D) -> Self {
        Self { decoder }
    }

    /// Interpret one inbound message.
    ///
    /// `header` is the header of the message (for multi-packet messages, of
    /// any of its packets) and `payload` the reassembled payload.
    pub fn dispatch(
        &self,
        state: ProtocolState,
        header: &PacketHeader,
        payload: Bytes,
    ) -> Result<DecodedOutcome, CodecError> {
        dispatch(state, header, payload, &self.decoder)
    }
}

/// Interpret one inbound message with the given token stream decoder.
pub fn dispatch<D>(
    state: ProtocolState,
    header: &PacketHeader,
    payload: Bytes,
    decoder: &D,
) -> Result<DecodedOutcome, CodecError>
where
    D: TokenStreamDecoder + ?Sized,
{
    let packet_type = header.packet_type;

    match (state, packet_type) {
        (ProtocolState::LoggingIn, PacketType::TabularResult) => {
            tracing::debug!(?state, length = payload.len(), "routing reply as login ack");
            Ok(DecodedOutcome::LoginAck {
                raw_payload: payload,
            })
        }
        (ProtocolState::Ready, PacketType::TabularResult) => {
            tracing::debug!(?state, length = payload.len(), "routing reply to token decoder");
            let mut tokens = decoder.decode(payload)?;
            if !tokens.errors.is_empty() {
                let error = tokens.errors.swap_remove(0);
                tracing::debug!(
                    number = error.number,
                    class = error.class,
                    "server returned error token"
                );
                return Err(CodecError::ServerError(error));
            }
            Ok(DecodedOutcome::SqlResult(SqlResult::from_tokens(tokens)))
        }
        (
            ProtocolState::Prelogin | ProtocolState::LoggingIn | ProtocolState::Ready,
            PacketType::SqlBatch
            | PacketType::PreTds7Login
            | PacketType::Rpc
            | PacketType::TabularResult
            | PacketType::Attention
            | PacketType::BulkLoad
            | PacketType::FedAuthToken
            | PacketType::TransactionManager
            | PacketType::Tds7Login
            | PacketType::Sspi
            | PacketType::PreLogin,
        ) => {
            tracing::warn!(?state, ?packet_type, "rejecting message with no defined transition");
            Err(CodecError::UnexpectedMessage { state, packet_type })
        }
    }
}
