use super::value::Value;
use std::error::Error;
use std::io;

/// Defines the interface for decoding a serialized result bundle into a [`Value`] tree.
///
/// Implementors handle one wire format each. Compression is handled by the caller, so
/// decoders always see the raw serialized bytes.
pub trait BundleDecoder {
    /// The error type for decoding operations.
    type Error: Error + From<io::Error>;

    /// Decodes a complete serialized document.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a well-formed document of this format.
    fn decode(bytes: &[u8]) -> Result<Value, Self::Error>;

    /// Decodes a document whose top level is a mapping, keeping only the entries named in
    /// `fields`. Documents that are not mappings are returned whole.
    ///
    /// Formats that can skip unrequested entries override this to avoid materializing them.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a well-formed document of this format.
    fn decode_fields(bytes: &[u8], fields: &[&str]) -> Result<Value, Self::Error> {
        Ok(Self::decode(bytes)?.retain_fields(fields))
    }
}
