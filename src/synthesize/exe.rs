use std::{fs, io, path::Path};

use tracing::debug;

use crate::synthesize::arch::Assembly;

/// Writes generated code to an output file.
pub trait Executable: Default {
    fn with_binary_identifier(self, ident: String) -> Self;

    fn build(&self, assembly: &Assembly, out_path: impl AsRef<Path>) -> io::Result<()>;
}

/// Flat binary image: the code (and on x86-64 the data region after it) written verbatim, to be
/// loaded at address zero.
#[derive(Default)]
pub struct RawBinary {
    ident: Option<String>,
}

impl Executable for RawBinary {
    fn with_binary_identifier(mut self, ident: String) -> Self {
        self.ident = Some(ident);
        self
    }

    fn build(&self, assembly: &Assembly, out_path: impl AsRef<Path>) -> io::Result<()> {
        let out_path = out_path.as_ref();
        debug!(
            ident = self.ident.as_deref().unwrap_or("unnamed"),
            path = %out_path.display(),
            bytes = assembly.code.len(),
            "writing raw binary"
        );

        fs::write(out_path, &assembly.code)
    }
}

#[derive(Default)]
pub struct DummyExecutable;

impl Executable for DummyExecutable {
    fn with_binary_identifier(self, _ident: String) -> Self {
        self
    }

    fn build(&self, _assembly: &Assembly, _out_path: impl AsRef<Path>) -> io::Result<()> {
        Ok(())
    }
}
