//! The binary debug sub-protocol.
//!
//! Frames arrive hex-encoded inside `DEBUG:` commands. The first byte is
//! a function code; the processor rewrites the request buffer in place
//! and returns the new length (0 when the frame cannot be processed).
//! Every branch checks that the response fits in the request-sized
//! buffer.
//!
//! Function codes:
//!
//! | Code | Operation | Payload |
//! |------|-----------|---------|
//! | 0x41 | variable count | none |
//! | 0x42 | set trace/force | idx, flag, len, value |
//! | 0x43 | get range | start, end |
//! | 0x44 | get list | n, indices |
//! | 0x45 | endianness probe + program MD5 | magic pair |

/// Request variable count.
pub const FC_INFO: u8 = 0x41;
/// Set trace/force state for one variable.
pub const FC_SET: u8 = 0x42;
/// Get a contiguous index range of variable values.
pub const FC_GET: u8 = 0x43;
/// Get an explicit list of variable values.
pub const FC_GET_LIST: u8 = 0x44;
/// Endianness handshake + program MD5.
pub const FC_GET_MD5: u8 = 0x45;

/// Success status byte.
pub const DBG_SUCCESS: u8 = 0x7E;
/// Out-of-bounds status byte.
pub const DBG_OUT_OF_BOUNDS: u8 = 0x81;
/// Out-of-memory status byte.
pub const DBG_OUT_OF_MEMORY: u8 = 0x82;

/// Maximum index count accepted by [`FC_GET_LIST`].
const GET_LIST_MAX: usize = 256;
/// Offset where value bytes start in get responses.
const GET_HEADER_LEN: usize = 10;

/// The debug-visible surface of a loaded program.
///
/// Optional program symbols surface as `None`/`false`; the processor
/// turns those into an empty (unprocessable) response. Implemented by the
/// program handle and by test doubles.
pub trait DebugTarget {
    fn variable_count(&self) -> Option<u16>;
    fn variable_size(&self, idx: u16) -> Option<usize>;
    /// Copy the value bytes of `idx` into `out`; returns bytes written.
    fn copy_value(&self, idx: u16, out: &mut [u8]) -> Option<usize>;
    /// Returns `false` when tracing is unsupported by the program.
    fn set_trace(&self, idx: u16, force: bool, value: &[u8]) -> bool;
    fn set_endianness(&self, reversed: bool);
    fn md5(&self) -> &str;
}

/// Process one debug frame in place.
///
/// `buf[..len]` holds the request; on return `buf[..new_len]` holds the
/// response. A return of 0 means the frame could not be processed
/// (unknown function code or missing program support); the caller
/// reports `ERROR_PROCESSING`.
pub fn process_frame(
    buf: &mut [u8],
    len: usize,
    target: &dyn DebugTarget,
    tick: u32,
) -> usize {
    if len == 0 || len > buf.len() {
        return 0;
    }

    match buf[0] {
        FC_INFO => process_info(buf, target),
        FC_SET => process_set(buf, len, target),
        FC_GET => process_get(buf, len, target, tick),
        FC_GET_LIST => process_get_list(buf, len, target, tick),
        FC_GET_MD5 => process_get_md5(buf, len, target),
        _ => 0,
    }
}

fn status(buf: &mut [u8], fc: u8, code: u8) -> usize {
    buf[0] = fc;
    buf[1] = code;
    2
}

fn process_info(buf: &mut [u8], target: &dyn DebugTarget) -> usize {
    let Some(count) = target.variable_count() else {
        return 0;
    };
    buf[0] = FC_INFO;
    put_be16(&mut buf[1..3], count);
    3
}

fn process_set(buf: &mut [u8], len: usize, target: &dyn DebugTarget) -> usize {
    let Some(count) = target.variable_count() else {
        return 0;
    };
    if len < 6 {
        return status(buf, FC_SET, DBG_OUT_OF_BOUNDS);
    }

    let varidx = be16(&buf[1..3]);
    let flag = buf[3];
    let value_len = be16(&buf[4..6]) as usize;

    if varidx >= count || value_len > buf.len() - 7 || 6 + value_len > len {
        return status(buf, FC_SET, DBG_OUT_OF_BOUNDS);
    }

    let ok = target.set_trace(varidx, flag != 0, &buf[6..6 + value_len]);
    if !ok {
        return 0;
    }
    status(buf, FC_SET, DBG_SUCCESS)
}

fn process_get(buf: &mut [u8], len: usize, target: &dyn DebugTarget, tick: u32) -> usize {
    let Some(count) = target.variable_count() else {
        return 0;
    };
    if len < 5 {
        return status(buf, FC_GET, DBG_OUT_OF_BOUNDS);
    }

    let start = be16(&buf[1..3]);
    let end = be16(&buf[3..5]);
    if start > end || end >= count {
        return status(buf, FC_GET, DBG_OUT_OF_BOUNDS);
    }

    copy_values(buf, target, tick, FC_GET, (start..=end).collect())
}

fn process_get_list(
    buf: &mut [u8],
    len: usize,
    target: &dyn DebugTarget,
    tick: u32,
) -> usize {
    let Some(count) = target.variable_count() else {
        return 0;
    };
    if len < 3 {
        return status(buf, FC_GET_LIST, DBG_OUT_OF_BOUNDS);
    }

    let n = be16(&buf[1..3]) as usize;
    if n > GET_LIST_MAX {
        return status(buf, FC_GET_LIST, DBG_OUT_OF_MEMORY);
    }
    if len < 3 + 2 * n {
        return status(buf, FC_GET_LIST, DBG_OUT_OF_BOUNDS);
    }

    // The response overwrites the request, so the index list must be
    // copied out before any value bytes are written.
    let mut indices = Vec::with_capacity(n);
    for i in 0..n {
        let idx = be16(&buf[3 + 2 * i..5 + 2 * i]);
        if idx >= count {
            return status(buf, FC_GET_LIST, DBG_OUT_OF_BOUNDS);
        }
        indices.push(idx);
    }

    copy_values(buf, target, tick, FC_GET_LIST, indices)
}

/// Shared tail of the two get operations: ten-byte header followed by the
/// concatenated value bytes, stopping early when the next variable would
/// not fit.
fn copy_values(
    buf: &mut [u8],
    target: &dyn DebugTarget,
    tick: u32,
    fc: u8,
    indices: Vec<u16>,
) -> usize {
    let mut pos = GET_HEADER_LEN;
    let mut last_idx = *indices.first().unwrap_or(&0);

    for idx in indices {
        let Some(size) = target.variable_size(idx) else {
            return 0;
        };
        if pos + size > buf.len() {
            break;
        }
        let (_, tail) = buf.split_at_mut(pos);
        match target.copy_value(idx, &mut tail[..size]) {
            Some(written) => pos += written,
            None => return 0,
        }
        last_idx = idx;
    }

    buf[0] = fc;
    buf[1] = DBG_SUCCESS;
    put_be16(&mut buf[2..4], last_idx);
    put_be32(&mut buf[4..8], tick);
    put_be16(&mut buf[8..10], (pos - GET_HEADER_LEN) as u16);
    pos
}

fn process_get_md5(buf: &mut [u8], len: usize, target: &dyn DebugTarget) -> usize {
    if len < 3 {
        return status(buf, FC_GET_MD5, DBG_OUT_OF_BOUNDS);
    }

    match (buf[1], buf[2]) {
        (0xDE, 0xAD) => target.set_endianness(false),
        (0xAD, 0xDE) => target.set_endianness(true),
        _ => return status(buf, FC_GET_MD5, DBG_OUT_OF_BOUNDS),
    }

    let md5 = target.md5().as_bytes();
    if 2 + md5.len() + 1 > buf.len() {
        return status(buf, FC_GET_MD5, DBG_OUT_OF_MEMORY);
    }

    buf[0] = FC_GET_MD5;
    buf[1] = DBG_SUCCESS;
    buf[2..2 + md5.len()].copy_from_slice(md5);
    buf[2 + md5.len()] = 0x00;
    2 + md5.len() + 1
}

// ─── Byte helpers ───────────────────────────────────────────────────

#[inline]
fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

#[inline]
fn put_be16(b: &mut [u8], v: u16) {
    b.copy_from_slice(&v.to_be_bytes());
}

#[inline]
fn put_be32(b: &mut [u8], v: u32) {
    b.copy_from_slice(&v.to_be_bytes());
}

// ─── Hex codec ──────────────────────────────────────────────────────

/// Parse space-separated hex bytes (`"45 DE ad"` → `[0x45, 0xDE, 0xAD]`).
///
/// Returns `None` on any non-hex token. An empty string parses to an
/// empty frame, which the caller rejects as a parse error.
pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in s.split_ascii_whitespace() {
        if token.len() > 2 {
            return None;
        }
        bytes.push(u8::from_str_radix(token, 16).ok()?);
    }
    Some(bytes)
}

/// Format bytes as lowercase space-separated hex.
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}
