//! Loaded script and the process-wide source-context counter

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::SourceContext;
use crate::error::{HostError, HostResult};

static NEXT_SOURCE_CONTEXT: AtomicU64 = AtomicU64::new(0);

/// Hand out the next source context. Strictly increasing for the process lifetime.
pub fn next_source_context() -> SourceContext {
    SourceContext(NEXT_SOURCE_CONTEXT.fetch_add(1, Ordering::SeqCst))
}

/// A script as handed over by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    /// Path as given on the command line.
    pub path: PathBuf,
    /// Decoded text the engine compiles.
    pub text: String,
    /// File contents exactly as read, BOM included.
    pub raw: Vec<u8>,
    /// Whether the file was detected as UTF-8.
    pub is_utf8: bool,
}

impl ScriptSource {
    /// An in-memory UTF-8 script.
    pub fn from_text(
        path: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            path: path.into(),
            raw: text.as_bytes().to_vec(),
            text,
            is_utf8: true,
        }
    }

    /// Name used when reporting script errors.
    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    /// Absolute form of the script path, used as the source URL.
    ///
    /// The file does not have to exist; relative paths are resolved against
    /// the working directory and `.`/`..` components are folded.
    pub fn full_path(&self) -> HostResult<PathBuf> {
        let absolute = std::path::absolute(&self.path).map_err(|err| {
            HostError::io(
                format!("cannot determine full path of {}", self.path.display()),
                err,
            )
        })?;
        Ok(normalize(&absolute))
    }

    /// Library name for generated headers: the lowercased file stem.
    pub fn library_name(&self) -> HostResult<String> {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                HostError::Encoding(format!(
                    "cannot derive a library name from {}",
                    self.path.display()
                ))
            })
    }

    /// Fail unless the script was detected as UTF-8.
    pub fn require_utf8(
        &self,
        feature: &str,
    ) -> HostResult<()> {
        if self.is_utf8 {
            Ok(())
        } else {
            Err(HostError::Encoding(format!(
                "{} can only be used on UTF8 file",
                feature
            )))
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
