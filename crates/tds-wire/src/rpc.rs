//! RPC (Remote Procedure Call) request encoding.
//!
//! RPC requests (packet type 0x03) invoke a stored procedure with typed
//! parameters. The main use is `sp_executesql` for parameterized queries.
//!
//! ## Wire Format
//!
//! ```text
//! +-------------------+
//! | ALL_HEADERS       | 22 bytes
//! +-------------------+
//! | ProcName/ProcID   | 0xFFFF + u16 id, or u16 length + UTF-16LE name
//! +-------------------+
//! | Option Flags      | u16
//! +-------------------+
//! | Parameters        | repeated, in caller order
//! +-------------------+
//! ```
//!
//! A parameter is its B_VARCHAR name, a status byte, then the type info and
//! the length-prefixed value. The last two come from a [`TypeEncoder`]; this
//! module never interprets value bytes.

use core::fmt;

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::all_headers::{ALL_HEADERS_LEN, AllHeaders};
use crate::codec::{utf16_len, write_utf16_string};
use crate::error::CodecError;
use crate::packet::{DEFAULT_PACKET_SIZE, PacketType, frame_with_packet_size};

/// Name-length marker announcing a numeric procedure id.
const PROC_ID_MARKER: u16 = 0xFFFF;

/// Longest parameter name a one-byte length prefix can carry.
const MAX_PARAM_NAME_UNITS: usize = u8::MAX as usize;

/// Well-known stored procedure IDs.
///
/// The server recognizes these system procedures by number without a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_cursor
    Cursor = 0x0001,
    /// sp_cursoropen
    CursorOpen = 0x0002,
    /// sp_cursorprepare
    CursorPrepare = 0x0003,
    /// sp_cursorexecute
    CursorExecute = 0x0004,
    /// sp_cursorprepexec
    CursorPrepExec = 0x0005,
    /// sp_cursorunprepare
    CursorUnprepare = 0x0006,
    /// sp_cursorfetch
    CursorFetch = 0x0007,
    /// sp_cursoroption
    CursorOption = 0x0008,
    /// sp_cursorclose
    CursorClose = 0x0009,
    /// sp_executesql
    ExecuteSql = 0x000A,
    /// sp_prepare
    Prepare = 0x000B,
    /// sp_execute
    Execute = 0x000C,
    /// sp_prepexec
    PrepExec = 0x000D,
    /// sp_prepexecrpc
    PrepExecRpc = 0x000E,
    /// sp_unprepare
    Unprepare = 0x000F,
}

/// Procedure selector of an RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureId {
    /// Numeric id of a system procedure.
    Id(u16),
    /// Procedure name.
    Name(String),
}

impl From<ProcId> for ProcedureId {
    fn from(id: ProcId) -> Self {
        Self::Id(id as u16)
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "proc#{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

bitflags! {
    /// RPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RpcOptionFlags: u16 {
        /// Recompile the procedure.
        const WITH_RECOMPILE = 0x0001;
        /// Omit metadata from the response.
        const NO_METADATA = 0x0002;
        /// Reuse metadata from the previous call.
        const REUSE_METADATA = 0x0004;
    }
}

bitflags! {
    /// RPC parameter status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamFlags: u8 {
        /// Passed by reference (OUTPUT parameter).
        const BY_REF = 0x01;
        /// Use the parameter's default value.
        const DEFAULT = 0x02;
    }
}

/// Parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Input parameter.
    #[default]
    In,
    /// Output parameter; the server returns its value in a RETURNVALUE token.
    Out,
}

/// Type info as produced by a [`TypeEncoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// TDS type byte.
    pub type_id: u8,
    /// Type-specific metadata following the type byte: max length,
    /// collation, precision and scale as the type requires.
    pub info: Bytes,
}

impl TypeDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(type_id: u8, info: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            info: info.into(),
        }
    }
}

/// Serializes parameter values into TDS type info and value bytes.
///
/// The RPC encoder calls [`encode_data_type`](Self::encode_data_type) and
/// then [`encode_data`](Self::encode_data) with the descriptor it returned.
/// Either failing surfaces as [`CodecError::UnsupportedParameterType`].
pub trait TypeEncoder<V: ?Sized> {
    /// Error reported for values the encoder cannot represent.
    type Error: fmt::Display;

    /// Type byte and type info for `value`.
    fn encode_data_type(&self, value: &V) -> Result<TypeDescriptor, Self::Error>;

    /// Length-prefixed value bytes for `value` under `descriptor`.
    fn encode_data(&self, descriptor: &TypeDescriptor, value: &V) -> Result<Bytes, Self::Error>;
}

/// An RPC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParam<V> {
    /// Parameter name, with its `@`, or empty for positional parameters.
    pub name: String,
    /// Parameter value.
    pub value: V,
    /// Parameter direction.
    pub direction: Direction,
    /// Ask the server to use the declared default.
    pub use_default: bool,
}

impl<V> RpcParam<V> {
    /// Create an input parameter.
    pub fn new(name: impl Into<String>, value: V) -> Self {
        Self {
            name: name.into(),
            value,
            direction: Direction::In,
            use_default: false,
        }
    }

    /// Create an output parameter. `value` fixes its type and initial value.
    pub fn output(name: impl Into<String>, value: V) -> Self {
        Self {
            direction: Direction::Out,
            ..Self::new(name, value)
        }
    }

    /// Ask the server to use the parameter's default value.
    #[must_use]
    pub fn with_default(mut self) -> Self {
        self.use_default = true;
        self
    }

    /// Status flags byte.
    #[must_use]
    pub fn flags(&self) -> ParamFlags {
        let mut flags = ParamFlags::empty();
        flags.set(ParamFlags::BY_REF, self.direction == Direction::Out);
        flags.set(ParamFlags::DEFAULT, self.use_default);
        flags
    }

    /// Append this parameter's wire form.
    pub fn encode<E>(&self, encoder: &E, dst: &mut BytesMut) -> Result<(), CodecError>
    where
        E: TypeEncoder<V> + ?Sized,
    {
        let name_units = utf16_len(&self.name);
        if name_units > MAX_PARAM_NAME_UNITS {
            return Err(CodecError::InvalidParameterName(self.name.clone()));
        }

        let unsupported = |reason: E::Error| CodecError::UnsupportedParameterType {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        let descriptor = encoder.encode_data_type(&self.value).map_err(unsupported)?;
        let data = encoder
            .encode_data(&descriptor, &self.value)
            .map_err(unsupported)?;

        dst.put_u8(name_units as u8);
        write_utf16_string(dst, &self.name);
        dst.put_u8(self.flags().bits());
        dst.put_u8(descriptor.type_id);
        dst.put_slice(&descriptor.info);
        dst.put_slice(&data);
        Ok(())
    }
}

/// RPC request builder.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest<V> {
    procedure: ProcedureId,
    options: RpcOptionFlags,
    transaction_descriptor: u64,
    params: Vec<RpcParam<V>>,
}

impl<V> RpcRequest<V> {
    /// Create a request for any procedure selector.
    pub fn new(procedure: impl Into<ProcedureId>) -> Self {
        Self {
            procedure: procedure.into(),
            options: RpcOptionFlags::empty(),
            transaction_descriptor: 0,
            params: Vec::new(),
        }
    }

    /// Create a request for a well-known procedure.
    pub fn by_id(proc_id: ProcId) -> Self {
        Self::new(proc_id)
    }

    /// Create a request for a named procedure.
    pub fn named(proc_name: impl Into<String>) -> Self {
        Self::new(ProcedureId::Name(proc_name.into()))
    }

    /// Set option flags.
    #[must_use]
    pub fn with_options(mut self, options: RpcOptionFlags) -> Self {
        self.options = options;
        self
    }

    /// Run the call inside the given transaction.
    #[must_use]
    pub fn with_transaction(mut self, transaction_descriptor: u64) -> Self {
        self.transaction_descriptor = transaction_descriptor;
        self
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam<V>) -> Self {
        self.params.push(param);
        self
    }

    /// Append parameters, keeping their order.
    #[must_use]
    pub fn params(mut self, params: impl IntoIterator<Item = RpcParam<V>>) -> Self {
        self.params.extend(params);
        self
    }

    /// The procedure selector.
    #[must_use]
    pub fn procedure(&self) -> &ProcedureId {
        &self.procedure
    }

    /// Parameters in wire order.
    #[must_use]
    pub fn parameters(&self) -> &[RpcParam<V>] {
        &self.params
    }

    /// Encode the payload (without packet header).
    ///
    /// Nothing is returned on failure; parameters are serialized into a
    /// private buffer that is dropped on the first error.
    pub fn encode<E>(&self, encoder: &E) -> Result<Bytes, CodecError>
    where
        E: TypeEncoder<V> + ?Sized,
    {
        let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + 64);
        AllHeaders::with_transaction(self.transaction_descriptor).encode(&mut buf);

        match &self.procedure {
            ProcedureId::Id(id) => {
                buf.put_u16_le(PROC_ID_MARKER);
                buf.put_u16_le(*id);
            }
            ProcedureId::Name(name) => {
                let units = u16::try_from(utf16_len(name))
                    .map_err(|_| CodecError::InvalidProcedureName(name.clone()))?;
                buf.put_u16_le(units);
                write_utf16_string(&mut buf, name);
            }
        }
        buf.put_u16_le(self.options.bits());

        for param in &self.params {
            param.encode(encoder, &mut buf)?;
        }

        tracing::trace!(
            procedure = %self.procedure,
            params = self.params.len(),
            length = buf.len(),
            "encoded RPC request"
        );

        Ok(buf.freeze())
    }

    /// Encode and frame as RPC packets at the default packet size.
    pub fn encode_packet<E>(&self, encoder: &E) -> Result<Bytes, CodecError>
    where
        E: TypeEncoder<V> + ?Sized,
    {
        Ok(frame_with_packet_size(
            PacketType::Rpc,
            &self.encode(encoder)?,
            DEFAULT_PACKET_SIZE,
        ))
    }
}
