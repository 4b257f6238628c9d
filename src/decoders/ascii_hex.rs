//! ASCIIHexDecode implementation.
//!
//! Whitespace is ignored, `>` ends the data, and an odd trailing digit is
//! padded with an implicit '0'.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};

/// ASCIIHexDecode filter implementation.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        decode_hex(input)
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

/// Decode hexadecimal text into bytes.
///
/// Used for `/Contents` signature values, whose hex body may be wrapped in
/// `<` `>` delimiters.
pub fn decode_hex(input: &[u8]) -> Result<Vec<u8>> {
    let body = match input.first() {
        Some(b'<') => &input[1..],
        _ => input,
    };
    let end = body.iter().position(|&c| c == b'>').unwrap_or(body.len());

    let mut output = Vec::with_capacity(end / 2);
    let mut digits = body[..end].iter().filter(|c| !c.is_ascii_whitespace());

    while let Some(&high) = digits.next() {
        let low = digits.next().copied().unwrap_or(b'0');
        let (Some(h), Some(l)) = (hex_value(high), hex_value(low)) else {
            return Err(Error::ParseError {
                offset: 0,
                reason: format!(
                    "invalid hex digit in '{}{}'",
                    high as char, low as char
                ),
            });
        };
        output.push((h << 4) | l);
    }

    Ok(output)
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        _ => None,
    }
}
