use std::{
    io,
    marker::PhantomData,
    path::{Path, PathBuf},
    rc::Rc,
};

use ariadne::Source;
use tracing::info;

use crate::{
    analyze::{ErrorVec, Lines},
    synthesize::exe::Executable,
};

pub mod analyze;
pub mod ir;
pub mod synthesize;

pub use synthesize::{
    arch::{Arch, Assembly, generate},
    error::{Error, ErrorKind},
};

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("couldn't read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("couldn't write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("{count} error(s) in {name}")]
    Invalid { name: String, count: usize },
}

/// Drives a source file through the reader and the generator of one architecture.
pub struct Assembler<E: Executable> {
    arch: Arch,
    _marker: PhantomData<E>,
}

impl<E: Executable> Assembler<E> {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            _marker: PhantomData,
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Assembles `path` and writes the result to `out_path`. Diagnostics are printed to stderr.
    pub fn assemble(
        &self,
        path: impl AsRef<Path>,
        out_path: impl AsRef<Path>,
    ) -> Result<Assembly, AssembleError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| AssembleError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let source_name = Rc::new(
            path.file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(String::from("unknown")),
        );

        let assembly = match self.assemble_source(source_name.clone(), &source) {
            Ok(assembly) => assembly,
            Err(errors) => {
                errors.dump(source_name.clone(), &Source::from(source));
                return Err(AssembleError::Invalid {
                    name: source_name.to_string(),
                    count: errors.len(),
                });
            }
        };

        let out_path = out_path.as_ref();
        E::default()
            .with_binary_identifier(source_name.to_string())
            .build(&assembly, out_path)
            .map_err(|source| AssembleError::Write {
                path: out_path.to_path_buf(),
                source,
            })?;

        info!(arch = %self.arch, bytes = assembly.code.len(), "assembled {}", source_name);
        Ok(assembly)
    }

    pub fn assemble_source(&self, name: Rc<String>, source: &str) -> Result<Assembly, ErrorVec> {
        let ir = analyze::parse_source(name.clone(), source)?;

        generate(self.arch, &ir).map_err(|error| {
            let lines = Lines::new(source);
            analyze::Error::from_generation(name, &lines, &error).into()
        })
    }
}
