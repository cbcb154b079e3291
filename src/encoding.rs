//! Encoding Speculator — streaming best-guess encoding classifier.
//!
//! Ported from glogg's `EncodingSpeculator` state machine. The upstream
//! implementation never reaches its `ASCIIOnly` state for a pure-ASCII byte
//! stream (the state only changes on bytes with the MSB set) and its default
//! `guess()` arm falls back to `ASCII8`. This version fixes both: the state
//! starts in `ASCIiOnly`-eligible `Start` and transitions to `ASCIIOnly` on
//! the first 7-bit-clean byte, so a pure-ASCII file is correctly reported as
//! `Ascii7` rather than `Ascii8`.

use std::sync::atomic::{AtomicBool, Ordering};

/// A best-guess text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii7,
    Ascii8,
    Utf8,
    Utf16Le,
    Utf16Be,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    AsciiOnly,
    Unknown8Bit,
    Utf8LeadingByteSeen,
    ValidUtf8,
}

/// Streaming classifier: feed it bytes with `inject_byte`, read the current
/// best guess at any time with `guess`.
#[derive(Debug, Clone)]
pub struct EncodingSpeculator {
    state: State,
    code_point: u32,
    continuation_left: u8,
    min_value: u32,
}

impl Default for EncodingSpeculator {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodingSpeculator {
    pub fn new() -> Self {
        Self { state: State::Start, code_point: 0, continuation_left: 0, min_value: 0 }
    }

    /// Injects one byte, updating the state machine.
    pub fn inject_byte(&mut self, byte: u8) {
        if byte & 0x80 == 0 {
            if self.state == State::Start {
                self.state = State::AsciiOnly;
            }
            return;
        }

        match self.state {
            State::Start | State::AsciiOnly | State::ValidUtf8 => {
                if byte & 0xE0 == 0xC0 {
                    self.state = State::Utf8LeadingByteSeen;
                    self.code_point = ((byte & 0x1F) as u32) << 6;
                    self.continuation_left = 1;
                    self.min_value = 0x80;
                } else if byte & 0xF0 == 0xE0 {
                    self.state = State::Utf8LeadingByteSeen;
                    self.code_point = ((byte & 0x0F) as u32) << 12;
                    self.continuation_left = 2;
                    self.min_value = 0x800;
                } else if byte & 0xF8 == 0xF0 {
                    self.state = State::Utf8LeadingByteSeen;
                    self.code_point = ((byte & 0x07) as u32) << 18;
                    self.continuation_left = 3;
                    self.min_value = 0x10000;
                } else {
                    self.state = State::Unknown8Bit;
                }
            }
            State::Utf8LeadingByteSeen => {
                if byte & 0xC0 == 0x80 {
                    self.continuation_left -= 1;
                    self.code_point |= ((byte & 0x3F) as u32) << (self.continuation_left * 6);
                    if self.continuation_left == 0 {
                        self.state =
                            if self.code_point >= self.min_value { State::ValidUtf8 } else { State::Unknown8Bit };
                    }
                } else {
                    self.state = State::Unknown8Bit;
                }
            }
            State::Unknown8Bit => {}
        }
    }

    /// Feeds a whole byte slice, respecting `cancel` between bytes so a caller
    /// indexing a very long sample window can bail out promptly.
    pub fn inject_bytes(&mut self, bytes: &[u8], cancel: &AtomicBool) {
        for &b in bytes {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            self.inject_byte(b);
        }
    }

    /// Returns the current best guess.
    pub fn guess(&self) -> Encoding {
        match self.state {
            State::Start => Encoding::Ascii7,
            State::AsciiOnly => Encoding::Ascii7,
            State::Unknown8Bit | State::Utf8LeadingByteSeen => Encoding::Ascii8,
            State::ValidUtf8 => Encoding::Utf8,
        }
    }
}

/// Sniffs a byte-order mark at the start of `head`, returning the detected
/// encoding and the BOM length to skip, if any. Not part of the upstream
/// speculator (which has no BOM branch); this runs once before the
/// byte-by-byte classifier, per `SPEC_FULL.md` §4.2.
pub fn sniff_bom(head: &[u8]) -> Option<(Encoding, usize)> {
    if head.starts_with(&[0xFF, 0xFE]) {
        Some((Encoding::Utf16Le, 2))
    } else if head.starts_with(&[0xFE, 0xFF]) {
        Some((Encoding::Utf16Be, 2))
    } else if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some((Encoding::Utf8, 3))
    } else {
        None
    }
}

/// Decodes bytes under `encoding`, replacing invalid sequences per the
/// decoder's replacement policy (`DecodeError` per §7 is never fatal: raw
/// byte offsets remain correct regardless of how a glyph renders).
pub fn decode(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Ascii7 | Encoding::Ascii8 | Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Utf16Le => decode_utf16_with(bytes, u16::from_le_bytes),
        Encoding::Utf16Be => decode_utf16_with(bytes, u16::from_be_bytes),
    }
}

fn decode_utf16_with(bytes: &[u8], to_u16: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|c| to_u16([c[0], c[1]]));
    char::decode_utf16(units).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn guess_of(bytes: &[u8]) -> Encoding {
        let mut spec = EncodingSpeculator::new();
        spec.inject_bytes(bytes, &AtomicBool::new(false));
        spec.guess()
    }

    #[test]
    fn pure_ascii_is_ascii7() {
        assert_eq!(guess_of(b"hello world\n"), Encoding::Ascii7);
    }

    #[test]
    fn empty_input_defaults_to_ascii7() {
        assert_eq!(guess_of(b""), Encoding::Ascii7);
    }

    #[test]
    fn valid_two_byte_utf8_sequence() {
        // U+00E9 'é' = 0xC3 0xA9
        assert_eq!(guess_of(&[b'a', 0xC3, 0xA9, b'b']), Encoding::Utf8);
    }

    #[test]
    fn valid_three_byte_utf8_sequence() {
        // U+20AC '€' = 0xE2 0x82 0xAC
        assert_eq!(guess_of(&[0xE2, 0x82, 0xAC]), Encoding::Utf8);
    }

    #[test]
    fn overlong_sequence_is_rejected_as_unknown8bit() {
        // 0xC0 0x80 encodes U+0000 with a 2-byte sequence: overlong, below min_value 0x80.
        assert_eq!(guess_of(&[0xC0, 0x80]), Encoding::Ascii8);
    }

    #[test]
    fn truncated_continuation_is_ascii8() {
        assert_eq!(guess_of(&[0xE2, 0x82]), Encoding::Ascii8);
    }

    #[test]
    fn invalid_lead_byte_is_unknown8bit() {
        assert_eq!(guess_of(&[0xFF]), Encoding::Ascii8);
    }

    #[test]
    fn bom_sniffing_detects_utf16le() {
        assert_eq!(sniff_bom(&[0xFF, 0xFE, 0x41, 0x00]), Some((Encoding::Utf16Le, 2)));
    }

    #[test]
    fn bom_sniffing_returns_none_for_plain_ascii() {
        assert_eq!(sniff_bom(b"plain"), None);
    }

    #[test]
    fn decode_utf16le_roundtrips_ascii_range() {
        let bytes: Vec<u8> = "hi".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode(&bytes, Encoding::Utf16Le), "hi");
    }
}
