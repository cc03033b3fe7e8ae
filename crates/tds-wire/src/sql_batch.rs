//! SQL batch request encoding.
//!
//! A SQL batch payload (packet type 0x01) is the ALL_HEADERS block
//! followed by the SQL text as UTF-16LE, with no terminator.

use bytes::{Bytes, BytesMut};

use crate::all_headers::{ALL_HEADERS_LEN, AllHeaders};
use crate::codec::write_utf16_string;
use crate::packet::{DEFAULT_PACKET_SIZE, PacketType, frame_with_packet_size};

/// Encode a SQL batch payload in auto-commit mode.
///
/// # Example
///
/// ```
/// use tds_wire::sql_batch::encode_sql_batch;
///
/// let payload = encode_sql_batch("SELECT 1");
/// // ALL_HEADERS + 8 UTF-16 code units
/// assert_eq!(payload.len(), 22 + 16);
/// ```
#[must_use]
pub fn encode_sql_batch(sql: &str) -> Bytes {
    encode_sql_batch_with_transaction(sql, 0)
}

/// Encode a SQL batch payload inside an explicit transaction.
///
/// `transaction_descriptor` is the value the server returned in the
/// BeginTransaction ENVCHANGE, or 0 for auto-commit.
#[must_use]
pub fn encode_sql_batch_with_transaction(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + sql.len() * 2);
    AllHeaders::with_transaction(transaction_descriptor).encode(&mut buf);
    write_utf16_string(&mut buf, sql);
    buf.freeze()
}

/// SQL batch request.
#[derive(Debug, Clone)]
pub struct SqlBatch {
    sql: String,
    transaction_descriptor: u64,
}

impl SqlBatch {
    /// Create a new SQL batch in auto-commit mode.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            transaction_descriptor: 0,
        }
    }

    /// Run the batch inside the given transaction.
    #[must_use]
    pub fn with_transaction(mut self, transaction_descriptor: u64) -> Self {
        self.transaction_descriptor = transaction_descriptor;
        self
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Encode the payload (without packet header).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        encode_sql_batch_with_transaction(&self.sql, self.transaction_descriptor)
    }

    /// Encode and frame as one or more SQL batch packets.
    #[must_use]
    pub fn encode_packet(&self) -> Bytes {
        frame_with_packet_size(PacketType::SqlBatch, &self.encode(), DEFAULT_PACKET_SIZE)
    }
}
