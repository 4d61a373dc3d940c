//! Script file loading and encoding detection
//!
//! UTF-8 (with or without BOM) is the common case. UTF-16 files with a BOM are
//! decoded but flagged as not UTF-8, and anything else that is not valid UTF-8
//! is read as Latin-1 text, also flagged as not UTF-8. Byte-code modes and
//! header emission refuse non-UTF-8 scripts.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::error::HostError;
use crate::host::ScriptSource;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Encoding detected for a script file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl Encoding {
    pub fn is_utf8(self) -> bool {
        matches!(self, Encoding::Utf8 | Encoding::Utf8Bom)
    }
}

/// Loader errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid {encoding:?}", .path.display())]
    InvalidEncoding { path: PathBuf, encoding: Encoding },
}

impl From<LoadError> for HostError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Io { path, source } => {
                HostError::io(format!("cannot read {}", path.display()), source)
            }
            other @ LoadError::InvalidEncoding { .. } => HostError::Encoding(other.to_string()),
        }
    }
}

/// Read and decode a script file.
pub fn load_script(path: &Path) -> Result<ScriptSource, LoadError> {
    let raw = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (text, encoding) = decode(&raw).ok_or_else(|| LoadError::InvalidEncoding {
        path: path.to_path_buf(),
        encoding: detect(&raw),
    })?;
    debug!(
        "loaded {} ({} bytes, {:?})",
        path.display(),
        raw.len(),
        encoding
    );
    Ok(ScriptSource {
        path: path.to_path_buf(),
        text,
        raw,
        is_utf8: encoding.is_utf8(),
    })
}

/// Guess the encoding from the BOM and the content.
pub fn detect(raw: &[u8]) -> Encoding {
    if raw.starts_with(UTF8_BOM) {
        Encoding::Utf8Bom
    } else if raw.starts_with(UTF16_LE_BOM) {
        Encoding::Utf16Le
    } else if raw.starts_with(UTF16_BE_BOM) {
        Encoding::Utf16Be
    } else if std::str::from_utf8(raw).is_ok() {
        Encoding::Utf8
    } else {
        Encoding::Latin1
    }
}

/// Decode `raw` to text. `None` if the detected encoding does not hold.
pub fn decode(raw: &[u8]) -> Option<(String, Encoding)> {
    let encoding = detect(raw);
    let text = match encoding {
        Encoding::Utf8 => std::str::from_utf8(raw).ok()?.to_string(),
        Encoding::Utf8Bom => std::str::from_utf8(&raw[UTF8_BOM.len()..]).ok()?.to_string(),
        Encoding::Utf16Le => decode_utf16(&raw[UTF16_LE_BOM.len()..], u16::from_le_bytes)?,
        Encoding::Utf16Be => decode_utf16(&raw[UTF16_BE_BOM.len()..], u16::from_be_bytes)?,
        Encoding::Latin1 => raw.iter().map(|&b| b as char).collect(),
    };
    Some((text, encoding))
}

fn decode_utf16(
    body: &[u8],
    unit: fn([u8; 2]) -> u16,
) -> Option<String> {
    if body.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}
