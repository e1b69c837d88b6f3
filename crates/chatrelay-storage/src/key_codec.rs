//! Reversible, filesystem-safe file names for identity keys.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

const EXTENSION: &str = ".json";

/// Encode an identity key as a URL-safe base64 file stem.
pub fn encode_key(identity_key: &str) -> String {
    URL_SAFE_NO_PAD.encode(identity_key.as_bytes())
}

/// File name holding the current history of `identity_key`.
pub fn file_name(identity_key: &str) -> String {
    format!("{}{}", encode_key(identity_key), EXTENSION)
}

/// Recover the identity key from a history file name.
///
/// Returns `None` for backups, temp files and anything not produced by
/// [`file_name`].
pub fn decode_file_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(EXTENSION)?;
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}
