//! Stream decoders for the filters used by signature-related PDF objects.
//!
//! DSS certificate, CRL and OCSP streams are almost always `FlateDecode`;
//! `ASCIIHexDecode` shows up in hand-made files and doubles as the decoder
//! for `/Contents` hex strings.

use crate::error::{Error, Result};

mod ascii_hex;
mod flate;

pub use ascii_hex::{decode_hex, AsciiHexDecoder};
pub use flate::FlateDecoder;

/// Upper bound on the size of any decoded stream (decompression bomb guard).
const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of this decoder (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

/// Decode stream data by applying each named filter in order.
pub fn decode_stream(data: &[u8], filters: &[String]) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder: Box<dyn StreamDecoder> = match filter_name.as_str() {
            "FlateDecode" | "Fl" => Box::new(FlateDecoder),
            "ASCIIHexDecode" | "AHx" => Box::new(AsciiHexDecoder),
            _ => return Err(Error::Unsupported(format!("stream filter /{}", filter_name))),
        };

        current = decoder.decode(&current)?;
        log::trace!("{} produced {} bytes", decoder.name(), current.len());

        if current.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::ParseError {
                offset: 0,
                reason: format!(
                    "decoded stream of {} bytes exceeds limit of {} bytes",
                    current.len(),
                    MAX_DECOMPRESSED_SIZE
                ),
            });
        }
    }

    Ok(current)
}
