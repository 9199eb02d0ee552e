use std::collections::HashMap;

use strum::Display;
use tracing::trace;

use crate::synthesize::error::ErrorKind;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum SymbolKind {
    Label,
    Variable,
    Buffer,
}

impl SymbolKind {
    /// Variables and buffers live in data storage, labels in code.
    pub fn is_data(&self) -> bool {
        !matches!(self, Self::Label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub address: u64,
}

/// Names of labels, variables and buffers mapped to their resolved addresses. Names are unique
/// across all kinds.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, kind: SymbolKind, address: u64) -> Result<(), ErrorKind> {
        self.ensure_undefined(name)?;

        trace!(name, %kind, address, "define symbol");
        self.symbols.insert(name.to_owned(), Symbol { kind, address });
        Ok(())
    }

    pub fn ensure_undefined(&self, name: &str) -> Result<(), ErrorKind> {
        if self.symbols.contains_key(name) {
            return Err(ErrorKind::DuplicateSymbol {
                name: name.to_owned(),
            });
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).copied()
    }

    /// Looks up a symbol that must exist.
    pub fn resolve(&self, name: &str) -> Result<Symbol, ErrorKind> {
        self.get(name).ok_or_else(|| ErrorKind::UnresolvedSymbol {
            name: name.to_owned(),
        })
    }

    /// Looks up a jump or call target, rejecting variables and buffers.
    pub fn resolve_label(&self, name: &str) -> Result<u64, ErrorKind> {
        let symbol = self.resolve(name)?;
        if symbol.kind != SymbolKind::Label {
            return Err(ErrorKind::addressing(format!(
                "`{}` is a {}, not a label",
                name, symbol.kind
            )));
        }

        Ok(symbol.address)
    }

    /// Looks up a variable or buffer, rejecting labels.
    pub fn resolve_data(&self, name: &str) -> Result<Symbol, ErrorKind> {
        let symbol = self.resolve(name)?;
        if !symbol.kind.is_data() {
            return Err(ErrorKind::addressing(format!(
                "`{}` is a label, not a variable",
                name
            )));
        }

        Ok(symbol)
    }

    /// Moves every variable and buffer by `base`. Used once the code size is known and data is
    /// placed after it.
    pub fn rebase_data(&mut self, base: u64) {
        for symbol in self.symbols.values_mut() {
            if symbol.kind.is_data() {
                symbol.address += base;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All symbols ordered by address, then name.
    pub fn sorted(&self) -> Vec<(&str, Symbol)> {
        let mut symbols: Vec<(&str, Symbol)> = self
            .symbols
            .iter()
            .map(|(name, symbol)| (name.as_str(), *symbol))
            .collect();
        symbols.sort_by(|(a_name, a), (b_name, b)| {
            a.address.cmp(&b.address).then_with(|| a_name.cmp(b_name))
        });
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_get() {
        let mut symbols = SymbolTable::new();
        symbols.define("start", SymbolKind::Label, 0x10).unwrap();
        assert_eq!(
            symbols.get("start"),
            Some(Symbol {
                kind: SymbolKind::Label,
                address: 0x10
            })
        );
        assert_eq!(symbols.get("missing"), None);
    }

    #[test]
    fn duplicate_across_kinds_is_rejected() {
        let mut symbols = SymbolTable::new();
        symbols.define("x", SymbolKind::Variable, 0x30).unwrap();
        assert_eq!(
            symbols.define("x", SymbolKind::Label, 4),
            Err(ErrorKind::DuplicateSymbol { name: "x".into() })
        );
    }

    #[test]
    fn resolve_label_rejects_variables() {
        let mut symbols = SymbolTable::new();
        symbols.define("count", SymbolKind::Variable, 0x30).unwrap();
        assert!(matches!(
            symbols.resolve_label("count"),
            Err(ErrorKind::AddressingMode(_))
        ));
        assert_eq!(
            symbols.resolve_label("nowhere"),
            Err(ErrorKind::UnresolvedSymbol {
                name: "nowhere".into()
            })
        );
    }

    #[test]
    fn rebase_only_moves_data() {
        let mut symbols = SymbolTable::new();
        symbols.define("loop", SymbolKind::Label, 3).unwrap();
        symbols.define("a", SymbolKind::Variable, 0).unwrap();
        symbols.define("buf", SymbolKind::Buffer, 8).unwrap();
        symbols.rebase_data(100);

        assert_eq!(symbols.get("loop").unwrap().address, 3);
        assert_eq!(symbols.get("a").unwrap().address, 100);
        assert_eq!(symbols.get("buf").unwrap().address, 108);
    }

    #[test]
    fn sorted_by_address() {
        let mut symbols = SymbolTable::new();
        symbols.define("b", SymbolKind::Label, 8).unwrap();
        symbols.define("a", SymbolKind::Label, 2).unwrap();
        let names: Vec<&str> = symbols.sorted().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
