//! Byte-code production and header rendering
//!
//! Serialization is two-phase: ask the engine how many bytes it needs, then
//! hand it a buffer of exactly that size. The resulting buffer can be run
//! directly, written out raw, or rendered as embeddable C++ source:
//!
//! ```text
//! <4-line banner>
//! #if 0
//! <original source bytes>
//! #endif
//! namespace Js
//! {
//!     const char Library_Bytecode_<name>[] = {
//! /* 00000000 */ 0x52, 0x46, ... (16 per line)
//! /* 00000010 */ ...
//! };
//!
//! }
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use super::check;
use super::script::ScriptSource;
use crate::engine::{EngineCapability, Operation};
use crate::error::{HostError, HostResult};

const BANNER: &str = concat!(
    "//-------------------------------------------------------------------------------------------------------\r\n",
    "// Copyright (C) scripthost contributors. All rights reserved.\r\n",
    "// Licensed under the MIT license. See LICENSE.txt file in the project root for full license information.\r\n",
    "//-------------------------------------------------------------------------------------------------------\r\n",
);

/// Bytes per generated line.
const BYTES_PER_LINE: usize = 16;

/// Serialized byte code. Owned by whoever asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeBuffer {
    bytes: Box<[u8]>,
}

impl BytecodeBuffer {
    /// Wrap byte code produced elsewhere, e.g. read back from a file.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Read a raw byte-code file.
    pub fn read_from(path: &Path) -> HostResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|err| HostError::io(format!("cannot read byte code {}", path.display()), err))?;
        Ok(Self::from_vec(bytes))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for BytecodeBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Produces byte code from source text through the engine.
#[derive(Clone, Copy)]
pub struct BytecodeCache<'e> {
    engine: &'e dyn EngineCapability,
}

impl<'e> BytecodeCache<'e> {
    pub fn new(engine: &'e dyn EngineCapability) -> Self {
        Self { engine }
    }

    /// Compile `source` into a freshly allocated buffer.
    ///
    /// A zero size from the size query, or a fill that does not match it, is
    /// an invariant violation.
    pub fn serialize(
        &self,
        source: &str,
    ) -> HostResult<BytecodeBuffer> {
        let required = check(
            self.engine,
            Operation::SerializeScript,
            self.engine.serialize_script(source, None),
        )?;
        if required == 0 {
            debug!("JsSerializeScript reported a zero-length buffer");
            return Err(HostError::invariant("serialized buffer size should not be zero"));
        }

        let mut bytes = vec![0u8; required].into_boxed_slice();
        let filled = check(
            self.engine,
            Operation::SerializeScript,
            self.engine.serialize_script(source, Some(&mut bytes[..])),
        )?;
        if filled != required {
            debug!(
                "JsSerializeScript filled {} bytes after reporting {}",
                filled, required
            );
            return Err(HostError::invariant(format!(
                "serialized buffer size changed between size query ({}) and fill ({})",
                required, filled
            )));
        }

        debug!("serialized {} bytes of byte code", required);
        Ok(BytecodeBuffer { bytes })
    }

    /// Serialize `script` and write it as a generated header to `output`.
    ///
    /// The file is only created once serialization has succeeded.
    pub fn emit_header(
        &self,
        script: &ScriptSource,
        output: &Path,
        symbol: &str,
    ) -> HostResult<()> {
        validate_symbol_name(symbol)?;
        let buffer = self.serialize(&script.text)?;
        write_file(output, |out| {
            write_embeddable_source(out, buffer.as_bytes(), &script.raw, symbol)
        })?;
        debug!(
            "wrote header for {} ({} bytes of byte code) to {}",
            symbol,
            buffer.len(),
            output.display()
        );
        Ok(())
    }

    /// Serialize `source` and write the raw buffer to `output`.
    pub fn emit_bytecode(
        &self,
        source: &str,
        output: &Path,
    ) -> HostResult<()> {
        let buffer = self.serialize(source)?;
        write_file(output, |out| out.write_all(buffer.as_bytes()))?;
        debug!("wrote {} bytes of byte code to {}", buffer.len(), output.display());
        Ok(())
    }
}

fn write_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> HostResult<()> {
    let file = File::create(path)
        .map_err(|err| HostError::io(format!("cannot create {}", path.display()), err))?;
    let mut out = BufWriter::new(file);
    body(&mut out)
        .and_then(|()| out.flush())
        .map_err(|err| HostError::io(format!("cannot write {}", path.display()), err))
}

/// The generated array name must be a valid identifier.
pub fn validate_symbol_name(symbol: &str) -> HostResult<()> {
    let mut chars = symbol.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first == '_' || unicode_ident::is_xid_start(first))
                && chars.all(unicode_ident::is_xid_continue)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(HostError::Encoding(format!(
            "'{}' is not a valid library name",
            symbol
        )))
    }
}

/// Render byte code as embeddable source text.
pub fn render_embeddable_source(
    buffer: &BytecodeBuffer,
    raw_source: &[u8],
    symbol: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(BANNER.len() + raw_source.len() + buffer.len() * 6 + 128);
    // Writing into a Vec cannot fail.
    let _ = write_embeddable_source(&mut out, buffer.as_bytes(), raw_source, symbol);
    out
}

/// Stream the embeddable source rendering of `bytecode` into `out`.
pub fn write_embeddable_source<W: Write>(
    out: &mut W,
    bytecode: &[u8],
    raw_source: &[u8],
    symbol: &str,
) -> io::Result<()> {
    out.write_all(BANNER.as_bytes())?;
    out.write_all(b"#if 0\r\n")?;
    out.write_all(raw_source)?;
    if raw_source.ends_with(b"\r\n") {
        out.write_all(b"#endif\r\n")?;
    } else {
        out.write_all(b"\r\n#endif\r\n")?;
    }

    out.write_all(b"namespace Js\r\n{\r\n    const char Library_Bytecode_")?;
    out.write_all(symbol.as_bytes())?;
    out.write_all(b"[] = {\r\n/* 00000000 */")?;

    let last = bytecode.len().saturating_sub(1);
    for (i, byte) in bytecode.iter().enumerate() {
        write!(out, " 0x{:02X}", byte)?;
        if i < last {
            out.write_all(b",")?;
        }
        if i % BYTES_PER_LINE == BYTES_PER_LINE - 1 && i < last {
            write!(out, "\r\n/* {:08X} */", i + 1)?;
        }
    }

    out.write_all(b"};\r\n\r\n")?;
    out.write_all(b"}\r\n")?;
    Ok(())
}
