use tracing::{debug, trace};

use crate::{
    ir::Position,
    synthesize::{buffer::CodeBuffer, error::ErrorKind, symbol::SymbolTable},
};

/// What a relocation is allowed to point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// Jump or call target.
    Code,
    /// Variable or buffer.
    Data,
}

/// A 32-bit relative displacement that is patched once every address is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub name: String,
    /// Offset of the zeroed 4-byte placeholder.
    pub patch_offset: usize,
    /// Offset just past the referencing instruction; displacements are relative to it.
    pub end_offset: usize,
    pub pos: Position,
    pub reference: Reference,
}

#[derive(Debug, Default)]
pub struct Relocations {
    pending: Vec<Relocation>,
}

impl Relocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, relocation: Relocation) {
        trace!(?relocation, "record relocation");
        self.pending.push(relocation);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Patches every pending relocation into `code`. The first failure is returned together with
    /// the position of the instruction that made the reference.
    pub fn resolve(
        self,
        symbols: &SymbolTable,
        code: &mut CodeBuffer,
    ) -> Result<(), (Position, ErrorKind)> {
        debug!(count = self.pending.len(), "resolving relocations");

        for relocation in self.pending {
            let displacement =
                relocation.displacement(symbols).map_err(|e| (relocation.pos, e))?;
            code.patch(relocation.patch_offset, &displacement.to_le_bytes());
        }

        Ok(())
    }
}

impl Relocation {
    fn displacement(&self, symbols: &SymbolTable) -> Result<i32, ErrorKind> {
        let target = match self.reference {
            Reference::Code => symbols.resolve_label(&self.name)?,
            Reference::Data => symbols.resolve_data(&self.name)?.address,
        };

        let displacement = target as i64 - self.end_offset as i64;
        i32::try_from(displacement).map_err(|_| ErrorKind::BranchOutOfRange {
            target: self.name.clone(),
            displacement,
            min: i32::MIN as i64,
            max: i32::MAX as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesize::symbol::SymbolKind;

    fn jump_at(offset: usize, name: &str) -> Relocation {
        Relocation {
            name: name.to_owned(),
            patch_offset: offset + 1,
            end_offset: offset + 5,
            pos: Position::new(1, 1),
            reference: Reference::Code,
        }
    }

    #[test]
    fn patches_forward_and_backward() {
        let mut code = CodeBuffer::new();
        code.extend(&[0xE9, 0, 0, 0, 0, 0xE9, 0, 0, 0, 0]).unwrap();

        let mut symbols = SymbolTable::new();
        symbols.define("top", SymbolKind::Label, 0).unwrap();
        symbols.define("end", SymbolKind::Label, 10).unwrap();

        let mut relocations = Relocations::new();
        relocations.push(jump_at(0, "end"));
        relocations.push(jump_at(5, "top"));
        relocations.resolve(&symbols, &mut code).unwrap();

        assert_eq!(
            code.finish(),
            vec![0xE9, 5, 0, 0, 0, 0xE9, 0xF6, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn unresolved_reports_referencing_position() {
        let mut code = CodeBuffer::new();
        code.extend(&[0xE8, 0, 0, 0, 0]).unwrap();

        let mut relocation = jump_at(0, "missing");
        relocation.pos = Position::new(7, 5);

        let mut relocations = Relocations::new();
        relocations.push(relocation);

        let (pos, kind) = relocations
            .resolve(&SymbolTable::new(), &mut code)
            .unwrap_err();
        assert_eq!(pos, Position::new(7, 5));
        assert_eq!(
            kind,
            ErrorKind::UnresolvedSymbol {
                name: "missing".into()
            }
        );
    }

    #[test]
    fn data_reference_to_label_is_rejected() {
        let mut code = CodeBuffer::new();
        code.extend(&[0; 7]).unwrap();

        let mut symbols = SymbolTable::new();
        symbols.define("here", SymbolKind::Label, 0).unwrap();

        let mut relocations = Relocations::new();
        relocations.push(Relocation {
            name: "here".into(),
            patch_offset: 3,
            end_offset: 7,
            pos: Position::new(2, 1),
            reference: Reference::Data,
        });

        let (_, kind) = relocations.resolve(&symbols, &mut code).unwrap_err();
        assert!(matches!(kind, ErrorKind::AddressingMode(_)));
    }
}
