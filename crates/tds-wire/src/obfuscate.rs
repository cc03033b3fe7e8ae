//! LOGIN7 password obfuscation.
//!
//! MS-TDS requires the client to scramble password bytes before sending
//! them: for every byte, swap the high and low nibbles, then XOR with
//! `0xA5`. This is a wire-format requirement, not a security control. The
//! password is only protected in transit when the connection uses TLS.
//!
//! The transform is reversible but not an involution:
//! `obfuscate(obfuscate(x))` yields `x ^ 0xFF` per byte, since the swapped
//! mask `0x5A` and the mask `0xA5` are complements. [`deobfuscate`] applies
//! the steps in reverse order.

const MASK: u8 = 0xA5;

/// Scramble one byte: swap nibbles, then XOR with `0xA5`.
#[inline]
#[must_use]
pub const fn obfuscate_byte(b: u8) -> u8 {
    b.rotate_left(4) ^ MASK
}

/// Undo [`obfuscate_byte`]: XOR with `0xA5`, then swap nibbles.
#[inline]
#[must_use]
pub const fn deobfuscate_byte(b: u8) -> u8 {
    (b ^ MASK).rotate_left(4)
}

/// Scramble UTF-16LE password bytes.
#[must_use]
pub fn obfuscate(utf16le: &[u8]) -> Vec<u8> {
    utf16le.iter().map(|&b| obfuscate_byte(b)).collect()
}

/// Recover UTF-16LE password bytes scrambled by [`obfuscate`].
#[must_use]
pub fn deobfuscate(scrambled: &[u8]) -> Vec<u8> {
    scrambled.iter().map(|&b| deobfuscate_byte(b)).collect()
}
