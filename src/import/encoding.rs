//! Text-encoding detection for uploaded ledger exports.

use encoding_rs::{Encoding, SHIFT_JIS, UTF_8};

use crate::Error;

/// Encodings tried in priority order when decoding a ledger export.
///
/// The WHATWG `shift_jis` decoder accepts the CP932 superset, so the
/// Shift-JIS and CP932 cases share one entry.
const ENCODING_CANDIDATES: [&Encoding; 2] = [UTF_8, SHIFT_JIS];

/// Decode the raw bytes of a ledger export into text.
///
/// Attempts UTF-8 first (a byte order mark is tolerated and stripped), then
/// Shift-JIS/CP932, accepting the first encoding that decodes without
/// replacement characters.
///
/// # Errors
/// Returns [Error::UnsupportedEncoding] if no candidate decodes cleanly.
pub fn decode_ledger_bytes(bytes: &[u8]) -> Result<String, Error> {
    for encoding in ENCODING_CANDIDATES {
        let (text, encoding_used, had_errors) = encoding.decode(bytes);

        if !had_errors {
            tracing::debug!("decoded ledger export as {}", encoding_used.name());
            return Ok(text.into_owned());
        }
    }

    Err(Error::UnsupportedEncoding)
}
