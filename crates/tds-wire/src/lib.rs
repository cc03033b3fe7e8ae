//! # tds-wire
//!
//! Client-side encoders and response dispatch for the MS-TDS (Tabular Data
//! Stream) protocol used by Microsoft SQL Server.
//!
//! The crate turns outbound requests (pre-login, LOGIN7, SQL batch, RPC) into
//! framed packets and routes inbound replies according to the connection's
//! protocol state. It performs no I/O and holds no connection state.
//!
//! ## Design Philosophy
//!
//! Every operation is a pure, synchronous computation over in-memory
//! buffers. Sockets, TLS, timeouts and the single-request-in-flight
//! discipline belong to the session layer. Two seams are traits so the
//! session layer can plug in its own implementations:
//!
//! - [`TypeEncoder`] serializes parameter values for RPC requests.
//! - [`TokenStreamDecoder`] parses reply token streams. [`TokenStreamReader`]
//!   is the built-in implementation.
//!
//! Diagnostics are emitted as `tracing` events. No event carries passwords.
//!
//! ## Example
//!
//! ```rust
//! use tds_wire::{PacketType, SqlBatch};
//!
//! let packet = SqlBatch::new("SELECT 1").encode_packet();
//! assert_eq!(packet[0], PacketType::SqlBatch as u8);
//! assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 8 + 22 + 16);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod all_headers;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod login7;
pub mod message;
pub mod obfuscate;
pub mod packet;
pub mod prelogin;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use all_headers::{ALL_HEADERS_LEN, AllHeaders};
pub use dispatch::{DecodedOutcome, ProtocolState, ResponseDispatcher, SqlResult, dispatch};
pub use error::{CodecError, ProtocolError};
pub use login7::{Login7, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags};
pub use message::{OutboundMessage, RequestEncoder};
pub use obfuscate::{deobfuscate, obfuscate};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType, frame, frame_with_packet_size,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginResponse, PreLoginVersion};
pub use rpc::{
    Direction, ParamFlags, ProcId, ProcedureId, RpcOptionFlags, RpcParam, RpcRequest,
    TypeDescriptor, TypeEncoder,
};
pub use sql_batch::{SqlBatch, encode_sql_batch, encode_sql_batch_with_transaction};
pub use token::{
    ColMetaData, ColumnData, Collation, Done, DoneKind, DoneStatus, EnvChange, EnvChangeType,
    EnvChangeValue, LoginAck, RawRow, ResultSet, ReturnValue, ServerError, ServerInfo, TokenSet,
    TokenStreamDecoder, TokenStreamReader, TokenType, TypeInfo,
};
pub use types::{ColumnFlags, TypeId, ValueLength};
pub use version::TdsVersion;
