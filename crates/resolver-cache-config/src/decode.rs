//! Strict YAML/JSON decoding with transparent gzip support.

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read a file's bytes, transparently inflating it if it is gzip-encoded.
pub fn read_maybe_gzip(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.len() >= 2 && raw[0..2] == GZIP_MAGIC {
        let mut decoder = GzDecoder::new(&raw[..]);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .with_context(|| format!("failed to gunzip {}", path.display()))?;
        Ok(out)
    } else {
        Ok(raw)
    }
}

/// Strict decode: unknown fields are rejected by the target type's own
/// `#[serde(deny_unknown_fields)]`. Format is chosen by the file's
/// extension (`.yaml`/`.yml` vs `.json`); anything else is treated as YAML,
/// which is also valid JSON's superset-compatible sibling for our formats.
pub fn decode_strict<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_slice(bytes)
            .with_context(|| format!("failed to parse JSON {}", path.display()))
    } else {
        serde_yaml::from_slice(bytes)
            .with_context(|| format!("failed to parse YAML {}", path.display()))
    }
}

/// Read and decode `path`, handling gzip transparently.
pub fn load_strict<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = read_maybe_gzip(path)?;
    decode_strict(path, &bytes)
}

/// Read a file's contents as UTF-8 text, handling gzip transparently. Used
/// for command bodies, which are opaque shell scripts rather than
/// structured documents.
pub fn read_text_maybe_gzip(path: &Path) -> Result<String> {
    let bytes = read_maybe_gzip(path)?;
    String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path.display()))
}
