//! Conformant-varying string encoding
//!
//! Wire format:
//! ```text
//! max_count: u32    # elements including the NUL terminator
//! offset: u32       # always 0
//! actual_count: u32 # elements including the NUL terminator
//! chars[actual_count]
//! padding to 4-byte alignment
//! ```

use crate::error::{NdrError, Result, MAX_DECODE_ALLOCATION};
use crate::stream::NdrStream;

/// Encoded size excluding the leading alignment pad.
pub(crate) fn wire_len(s: &str) -> usize {
    let len_with_nul = s.len() + 1;
    12 + len_with_nul + NdrStream::align_padding(len_with_nul, 4)
}

/// Write a string at the cursor. The caller has already aligned to 4.
pub(crate) fn encode(stream: &mut NdrStream, s: &str) {
    let bytes = s.as_bytes();
    let len_with_nul = bytes.len() + 1;

    stream.write_u32(len_with_nul as u32);
    stream.write_u32(0);
    stream.write_u32(len_with_nul as u32);
    stream.write_bytes(bytes);
    stream.write_u8(0);
    stream.align_write(4);
}

/// Read a string at the cursor. The caller has already aligned to 4.
pub(crate) fn decode(stream: &mut NdrStream) -> Result<String> {
    let max_count = stream.read_u32()?;
    let offset = stream.read_u32()?;
    let actual_count = stream.read_u32()?;

    if offset != 0 {
        return Err(NdrError::InvalidString(format!("non-zero offset {offset}")));
    }
    if actual_count > max_count {
        return Err(NdrError::ConformanceMismatch {
            max_count,
            actual_count,
        });
    }
    if actual_count as usize > MAX_DECODE_ALLOCATION {
        return Err(NdrError::AllocationLimitExceeded {
            requested: actual_count as usize,
            limit: MAX_DECODE_ALLOCATION,
        });
    }
    if actual_count == 0 {
        return Err(NdrError::InvalidString("zero-length count".to_string()));
    }

    let mut data = stream.read_bytes(actual_count as usize)?;
    match data.pop() {
        Some(0) => {}
        _ => {
            return Err(NdrError::InvalidString(
                "missing NUL terminator".to_string(),
            ))
        }
    }
    stream.align_read(4)?;

    String::from_utf8(data).map_err(|e| NdrError::InvalidString(e.to_string()))
}
