//! ALL_HEADERS prefix for SQL batch and RPC requests.
//!
//! From TDS 7.2 onwards every SQL batch and RPC payload starts with an
//! ALL_HEADERS block. This codec always emits exactly one header, the
//! transaction descriptor:
//!
//! ```text
//! TotalLength      u32 LE = 22
//! HeaderLength     u32 LE = 18
//! HeaderType       u16 LE = 0x0002
//! TransactionId    u64 LE
//! OutstandingReqs  u32 LE = 1
//! ```

use bytes::BufMut;

/// Total size of the ALL_HEADERS block.
pub const ALL_HEADERS_LEN: usize = 22;

/// Size of the transaction descriptor sub-header.
const TRANSACTION_HEADER_LEN: u32 = 18;

/// Header type of the transaction descriptor.
const TRANSACTION_DESCRIPTOR_HEADER: u16 = 0x0002;

/// Transaction descriptor header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllHeaders {
    /// Transaction descriptor from the server's BeginTransaction ENVCHANGE,
    /// or 0 in auto-commit mode.
    pub transaction_descriptor: u64,
    /// Requests outstanding on the connection. 1 without MARS.
    pub outstanding_requests: u32,
}

impl AllHeaders {
    /// Headers for auto-commit mode.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            transaction_descriptor: 0,
            outstanding_requests: 1,
        }
    }

    /// Headers for a request inside an explicit transaction.
    #[must_use]
    pub const fn with_transaction(transaction_descriptor: u64) -> Self {
        Self {
            transaction_descriptor,
            outstanding_requests: 1,
        }
    }

    /// Write the 22-byte block.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(ALL_HEADERS_LEN as u32);
        dst.put_u32_le(TRANSACTION_HEADER_LEN);
        dst.put_u16_le(TRANSACTION_DESCRIPTOR_HEADER);
        dst.put_u64_le(self.transaction_descriptor);
        dst.put_u32_le(self.outstanding_requests);
    }

    /// Encode into a fixed array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ALL_HEADERS_LEN] {
        let mut out = [0u8; ALL_HEADERS_LEN];
        self.encode(&mut &mut out[..]);
        out
    }
}

impl Default for AllHeaders {
    fn default() -> Self {
        Self::new()
    }
}
