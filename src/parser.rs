//! PDF object parser.
//!
//! Recursive descent over lexer tokens, producing [`Object`] values.
//! Nesting depth is bounded so adversarial documents cannot blow the stack.

use crate::decoders::decode_hex;
use crate::lexer::{token, Token};
use crate::object::{Dict, Object, ObjectRef};
use nom::IResult;

/// Default nesting bound for arrays and dictionaries.
pub const DEFAULT_MAX_NESTING: usize = 100;

/// Decode escape sequences in PDF literal strings (ISO 32000-1, 7.3.4.2).
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(0x08),
            b'f' => result.push(0x0C),
            b'0'..=b'7' => {
                let mut code = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    code = code * 8 + u32::from(raw[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                result.push((code & 0xFF) as u8);
            },
            // Line continuation
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'\n' => {},
            other => result.push(other),
        }
    }

    result
}

fn failure(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// Parse one PDF object with the default nesting bound.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_object_with_limit(input, DEFAULT_MAX_NESTING)
}

/// Parse one PDF object, allowing at most `max_nesting` levels of arrays
/// and dictionaries.
pub fn parse_object_with_limit(input: &[u8], max_nesting: usize) -> IResult<&[u8], Object> {
    parse_at_depth(input, 0, max_nesting)
}

fn parse_at_depth(input: &[u8], depth: usize, max_nesting: usize) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;

    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Integer(i) => {
            // `obj gen R` look-ahead
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if let (Ok(id), Ok(gen)) = (u32::try_from(i), u16::try_from(gen)) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id, gen))));
                    }
                }
            }
            Ok((rest, Object::Integer(i)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => match decode_hex(raw) {
            Ok(bytes) => Ok((rest, Object::String(bytes))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::HexDigit,
            ))),
        },
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::ArrayStart => {
            if depth >= max_nesting {
                log::warn!("Array nesting exceeds limit of {}", max_nesting);
                return Err(failure(input));
            }
            parse_array(rest, depth + 1, max_nesting)
        },
        Token::DictStart => {
            if depth >= max_nesting {
                log::warn!("Dictionary nesting exceeds limit of {}", max_nesting);
                return Err(failure(input));
            }
            let (after_dict, dict) = parse_dictionary(rest, depth + 1, max_nesting)?;

            match token(after_dict) {
                Ok((stream_input, Token::StreamStart)) => {
                    let (after_stream, data) = parse_stream_data(stream_input, &dict)?;
                    Ok((
                        after_stream,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::copy_from_slice(data),
                        },
                    ))
                },
                _ => Ok((after_dict, Object::Dictionary(dict))),
            }
        },
        _ => Err(failure(input)),
    }
}

fn parse_array(mut input: &[u8], depth: usize, max_nesting: usize) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_at_depth(input, depth, max_nesting)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8], depth: usize, max_nesting: usize) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_at_depth(rest, depth, max_nesting)?;
                dict.insert(key, value);
                input = rest;
            },
            _ => return Err(failure(input)),
        }
    }
}

/// Stream body after the `stream` keyword.
///
/// A direct `/Length` is trusted when it lands on `endstream`; otherwise the
/// body runs up to the next `endstream` keyword.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], &'a [u8]> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        if let Ok(length) = usize::try_from(length) {
            if length <= input.len() {
                let tail = &input[length..];
                if let Ok((rest, Token::StreamEnd)) = token(tail) {
                    return Ok((rest, &input[..length]));
                }
                log::debug!("/Length {} does not end at endstream, scanning", length);
            }
        }
    }

    match find_endstream(input) {
        Some(pos) => {
            let mut end = pos;
            // The EOL before endstream is not part of the data
            if end > 0 && input[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            Ok((&input[pos + b"endstream".len()..], &input[..end]))
        },
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))),
    }
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input.windows(keyword.len()).position(|window| window == keyword)
}

/// Parse an indirect object definition `N G obj <object> endobj`.
///
/// A missing `endobj` is tolerated.
pub fn parse_indirect_object(input: &[u8], max_nesting: usize) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = match token(input)? {
        (rest, Token::Integer(id)) => (rest, id),
        _ => return Err(failure(input)),
    };
    let (rest, gen) = match token(rest)? {
        (rest, Token::Integer(gen)) => (rest, gen),
        _ => return Err(failure(input)),
    };
    let (rest, _) = match token(rest)? {
        (rest, Token::ObjStart) => (rest, ()),
        _ => return Err(failure(input)),
    };
    let (id, gen) = match (u32::try_from(id), u16::try_from(gen)) {
        (Ok(id), Ok(gen)) => (id, gen),
        _ => return Err(failure(input)),
    };

    let (rest, object) = parse_object_with_limit(rest, max_nesting)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => rest,
    };
    Ok((rest, (ObjectRef::new(id, gen), object)))
}
