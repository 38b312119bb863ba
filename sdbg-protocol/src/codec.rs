//! Fragmented-string codec.
//!
//! Text fields larger than one message travel as a run of fragments: PLAIN
//! messages carry full chunks and the END variant carries the final (possibly
//! empty) chunk. Strings whose characters all fit in one byte use the 8-bit
//! path; anything else is sent as UTF-16 code units in the session byte order.
//! Raw bytes accumulate untranscoded until the END marker arrives.

use crate::error::ProtocolError;
use crate::wire::ByteOrder;

/// One four-code fragment family: base, base+1 (8-bit END), base+2 (16-bit),
/// base+3 (16-bit END).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringFamily {
    base: u8,
}

impl StringFamily {
    pub const fn new(base: u8) -> Self {
        Self { base }
    }

    pub const fn base(self) -> u8 {
        self.base
    }

    pub fn contains(self, msg_type: u8) -> bool {
        msg_type >= self.base && msg_type < self.base + 4
    }

    pub fn is_end(self, msg_type: u8) -> bool {
        msg_type == self.base + 1 || msg_type == self.base + 3
    }

    pub fn is_wide(self, msg_type: u8) -> bool {
        msg_type >= self.base + 2 && msg_type < self.base + 4
    }

    fn plain(self, wide: bool) -> u8 {
        if wide {
            self.base + 2
        } else {
            self.base
        }
    }

    fn end(self, wide: bool) -> u8 {
        if wide {
            self.base + 3
        } else {
            self.base + 1
        }
    }
}

/// Splits `text` into complete wire messages of at most `max_message` bytes
/// (type byte + payload), ending with the family's END variant.
pub fn fragment(
    family: StringFamily,
    text: &str,
    order: ByteOrder,
    max_message: u8,
) -> Vec<Vec<u8>> {
    let wide = !text.chars().all(|c| (c as u32) <= 0xFF);

    let encoded: Vec<u8> = if wide {
        text.encode_utf16()
            .flat_map(|unit| order.u16_bytes(unit))
            .collect()
    } else {
        text.chars().map(|c| c as u8).collect()
    };

    // 16-bit chunks must not split a code unit.
    let capacity = usize::from(max_message.saturating_sub(1)).max(1);
    let capacity = if wide {
        (capacity / 2).max(1) * 2
    } else {
        capacity
    };

    let mut messages = Vec::new();
    let mut rest: &[u8] = &encoded;
    while rest.len() > capacity {
        messages.push(build_fragment(family.plain(wide), &rest[..capacity]));
        rest = &rest[capacity..];
    }
    messages.push(build_fragment(family.end(wide), rest));
    messages
}

fn build_fragment(msg_type: u8, chunk: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(2 + chunk.len());
    message.push((1 + chunk.len()) as u8);
    message.push(msg_type);
    message.extend_from_slice(chunk);
    message
}

/// Accumulates the fragments of one text field and transcodes at the END
/// marker. Partially received fields are never exposed.
pub struct StringAssembler {
    family: StringFamily,
    wide: Option<bool>,
    buf: Vec<u8>,
}

impl StringAssembler {
    pub fn new(family: StringFamily) -> Self {
        Self {
            family,
            wide: None,
            buf: Vec::new(),
        }
    }

    /// True once at least one fragment has been fed and no END was seen yet.
    pub fn is_open(&self) -> bool {
        self.wide.is_some()
    }

    /// Feeds one message. Returns the decoded string when the END variant of
    /// the matching width arrives; a message outside the family, or a width
    /// switch inside the field, is a protocol violation.
    pub fn push(
        &mut self,
        msg_type: u8,
        payload: &[u8],
        order: ByteOrder,
    ) -> Result<Option<String>, ProtocolError> {
        if !self.family.contains(msg_type) {
            return Err(ProtocolError::FragmentOutOfOrder {
                base: self.family.base(),
                got: msg_type,
            });
        }

        let wide = self.family.is_wide(msg_type);
        match self.wide {
            Some(open_width) if open_width != wide => {
                return Err(ProtocolError::FragmentOutOfOrder {
                    base: self.family.base(),
                    got: msg_type,
                });
            }
            Some(_) => {}
            None => self.wide = Some(wide),
        }

        self.buf.extend_from_slice(payload);

        if !self.family.is_end(msg_type) {
            return Ok(None);
        }

        let raw = std::mem::take(&mut self.buf);
        self.wide = None;
        let decoded = if wide {
            decode_wide(&raw, order)?
        } else {
            decode_narrow(&raw)
        };
        Ok(Some(decoded))
    }
}

/// Permissive single-byte decode: every byte maps to U+0000..U+00FF.
fn decode_narrow(raw: &[u8]) -> String {
    raw.iter().map(|&b| b as char).collect()
}

/// UTF-16 decode in the session byte order; undecodable units are substituted
/// rather than failing.
fn decode_wide(raw: &[u8], order: ByteOrder) -> Result<String, ProtocolError> {
    if raw.len() % 2 != 0 {
        return Err(ProtocolError::OddWidePayload(raw.len()));
    }
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| order.u16_from([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}
