//! Hex dump rendering for payload tracing

use std::fmt;

/// Bytes shown per dump row
const BYTES_PER_LINE: usize = 16;

/// Lazily formatted hex dump of a byte slice
///
/// Rows look like `00000010: 41 54 0D 0A ... |AT..|`. Formatting only happens
/// when the value is actually displayed, so passing one to a disabled
/// `tracing::debug!` costs nothing.
#[derive(Debug, Clone, Copy)]
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, chunk) in self.0.chunks(BYTES_PER_LINE).enumerate() {
            if row > 0 {
                writeln!(f)?;
            }
            write!(f, "{:08X}: ", row * BYTES_PER_LINE)?;
            for i in 0..BYTES_PER_LINE {
                match chunk.get(i) {
                    Some(b) if i + 1 < BYTES_PER_LINE => write!(f, "{:02X} ", b)?,
                    Some(b) => write!(f, "{:02X}", b)?,
                    None if i + 1 < BYTES_PER_LINE => f.write_str("   ")?,
                    None => f.write_str("  ")?,
                }
            }
            f.write_str(" |")?;
            for &b in chunk {
                let c = if (32..=126).contains(&b) { b as char } else { '.' };
                write!(f, "{}", c)?;
            }
            f.write_str("|")?;
        }
        Ok(())
    }
}
