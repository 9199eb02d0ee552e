use std::{ops::Range, rc::Rc, str::FromStr};

use tracing::debug;

use crate::{
    analyze::{
        Error, ErrorCode, ErrorContext, ErrorVec, Lines,
        lex::{
            Lexer,
            token::{Mnemonic, Punct, Token, register},
        },
    },
    ir::{Instruction, Operation, Source, VirtualReg},
};

/// Reads the textual IR, one instruction per line.
///
/// A line holds an optional `name:` label followed by an optional instruction. Errors are
/// collected per line and parsing resumes on the next one.
pub struct Parser {
    err_ctx: ErrorContext,
    lexer: Lexer,
    lines: Lines,
}

impl Parser {
    pub fn new(source_name: Rc<String>, source: &str, lexer: Lexer) -> Self {
        Self {
            err_ctx: ErrorContext::new(source_name),
            lexer,
            lines: Lines::new(source),
        }
    }

    pub fn into_ir(mut self) -> Result<Vec<Instruction>, ErrorVec> {
        let mut ir = Vec::new();

        loop {
            match self.parse_line(&mut ir) {
                Ok(true) => (),
                Ok(false) => break,
                Err(err) => {
                    self.err_ctx.report(err);
                    if !self.skip_line() {
                        break;
                    }
                }
            }
        }

        if !self.err_ctx.is_empty() {
            return Err(self.err_ctx.take_errors());
        }

        debug!(instructions = ir.len(), "parsed ir");
        Ok(ir)
    }

    /// Discards the rest of the line, returns whether there is more input. Lexer errors are
    /// reported and stop parsing.
    fn skip_line(&mut self) -> bool {
        loop {
            match self.lexer.take_current() {
                Ok(Some((Token::Newline, _))) => return true,
                Ok(Some(_)) => (),
                Ok(None) => return false,
                Err(err) => {
                    self.err_ctx.report(err);
                    return false;
                }
            }
        }
    }

    /// Parses one line into `ir`, returns whether there is more input.
    fn parse_line(&mut self, ir: &mut Vec<Instruction>) -> Result<bool, Error> {
        let Some((token, range)) = self.lexer.current().cloned() else {
            return Ok(false);
        };

        let word = match token {
            Token::Ident(word) => word,
            Token::Newline => {
                self.lexer.take_current()?;
                return Ok(true);
            }
            _ => {
                return Err(self
                    .err_ctx
                    .unexpected_token(range, "expected a label or an instruction")
                    .finish());
            }
        };

        let pos = self.lines.position(range.start);
        self.lexer.take_current()?;

        if matches!(self.lexer.current(), Some((Token::Punct(Punct::Colon), _))) {
            self.lexer.take_current()?;
            ir.push(Instruction::new(Operation::Label { name: word }, pos));

            // an instruction may follow on the same line
            return match self.lexer.current() {
                Some((Token::Ident(_), _)) => self.parse_line(ir),
                _ => self.expect_end_of_line(),
            };
        }

        let Ok(mnemonic) = Mnemonic::from_str(&word) else {
            return Err(self
                .err_ctx
                .build(range.clone())
                .with_code(ErrorCode::UnknownMnemonic)
                .with_message(format!("unknown mnemonic `{}`", word))
                .with_label(range, "not an instruction")
                .finish());
        };

        let op = self.parse_operation(mnemonic)?;
        ir.push(Instruction::new(op, pos));

        self.expect_end_of_line()
    }

    fn parse_operation(&mut self, mnemonic: Mnemonic) -> Result<Operation, Error> {
        let op = match mnemonic {
            Mnemonic::Mov => {
                let (dest, src) = self.parse_reg_source()?;
                Operation::Mov { dest, src }
            }
            Mnemonic::Load => {
                let dest = self.expect_reg()?;
                self.expect_comma()?;
                let addr = self.expect_indirect()?;
                Operation::Load { dest, addr }
            }
            Mnemonic::Store => {
                let addr = self.expect_indirect()?;
                self.expect_comma()?;
                let src = self.expect_source()?;
                Operation::Store { addr, src }
            }
            Mnemonic::Add
            | Mnemonic::Sub
            | Mnemonic::And
            | Mnemonic::Or
            | Mnemonic::Xor
            | Mnemonic::Mul
            | Mnemonic::Div
            | Mnemonic::Mod
            | Mnemonic::Shl
            | Mnemonic::Shr => {
                let (dest, src) = self.parse_reg_source()?;
                match mnemonic {
                    Mnemonic::Add => Operation::Add { dest, src },
                    Mnemonic::Sub => Operation::Sub { dest, src },
                    Mnemonic::And => Operation::And { dest, src },
                    Mnemonic::Or => Operation::Or { dest, src },
                    Mnemonic::Xor => Operation::Xor { dest, src },
                    Mnemonic::Mul => Operation::Mul { dest, src },
                    Mnemonic::Div => Operation::Div { dest, src },
                    Mnemonic::Mod => Operation::Mod { dest, src },
                    Mnemonic::Shl => Operation::Shl { dest, count: src },
                    _ => Operation::Shr { dest, count: src },
                }
            }
            Mnemonic::Cmp => {
                let (a, b) = self.parse_reg_source()?;
                Operation::Cmp { a, b }
            }
            Mnemonic::Not => Operation::Not {
                dest: self.expect_reg()?,
            },
            Mnemonic::Neg => Operation::Neg {
                dest: self.expect_reg()?,
            },
            Mnemonic::Inc => Operation::Inc {
                dest: self.expect_reg()?,
            },
            Mnemonic::Dec => Operation::Dec {
                dest: self.expect_reg()?,
            },
            Mnemonic::Push => Operation::Push {
                src: self.expect_reg()?,
            },
            Mnemonic::Pop => Operation::Pop {
                dest: self.expect_reg()?,
            },
            Mnemonic::Jmp
            | Mnemonic::Je
            | Mnemonic::Jne
            | Mnemonic::Jl
            | Mnemonic::Jg
            | Mnemonic::Jle
            | Mnemonic::Jge
            | Mnemonic::Call => {
                let target = self.expect_symbol()?;
                match mnemonic {
                    Mnemonic::Jmp => Operation::Jmp { target },
                    Mnemonic::Je => Operation::Je { target },
                    Mnemonic::Jne => Operation::Jne { target },
                    Mnemonic::Jl => Operation::Jl { target },
                    Mnemonic::Jg => Operation::Jg { target },
                    Mnemonic::Jle => Operation::Jle { target },
                    Mnemonic::Jge => Operation::Jge { target },
                    _ => Operation::Call { target },
                }
            }
            Mnemonic::Ret => Operation::Ret,
            Mnemonic::Halt => Operation::Halt,
            Mnemonic::Nop => Operation::Nop,
            Mnemonic::Int => Operation::Int {
                vector: self.expect_number()?,
            },
            Mnemonic::Org => Operation::Org {
                address: self.expect_number()?,
            },
            Mnemonic::Var => {
                let name = self.expect_symbol()?;
                let init = if self.eat_comma()? {
                    Some(self.expect_number()?)
                } else {
                    None
                };
                Operation::Var { name, init }
            }
            Mnemonic::Buffer => {
                let name = self.expect_symbol()?;
                self.expect_comma()?;
                let len = self.expect_number()?;
                Operation::Buffer { name, len }
            }
            Mnemonic::Set => {
                let name = self.expect_symbol()?;
                self.expect_comma()?;
                let src = self.expect_source()?;
                Operation::Set { name, src }
            }
            Mnemonic::Get => {
                let dest = self.expect_reg()?;
                self.expect_comma()?;
                let name = self.expect_symbol()?;
                Operation::Get { dest, name }
            }
            Mnemonic::Setb | Mnemonic::Clrb | Mnemonic::Cplb => {
                let bit = self.expect_number()?;
                match mnemonic {
                    Mnemonic::Setb => Operation::Setb { bit },
                    Mnemonic::Clrb => Operation::Clrb { bit },
                    _ => Operation::Cplb { bit },
                }
            }
            Mnemonic::Jb | Mnemonic::Jnb => {
                let bit = self.expect_number()?;
                self.expect_comma()?;
                let target = self.expect_symbol()?;
                match mnemonic {
                    Mnemonic::Jb => Operation::Jb { bit, target },
                    _ => Operation::Jnb { bit, target },
                }
            }
            Mnemonic::Djnz => {
                let reg = self.expect_reg()?;
                self.expect_comma()?;
                let target = self.expect_symbol()?;
                Operation::Djnz { reg, target }
            }
        };

        Ok(op)
    }

    fn parse_reg_source(&mut self) -> Result<(VirtualReg, Source), Error> {
        let reg = self.expect_reg()?;
        self.expect_comma()?;
        let src = self.expect_source()?;
        Ok((reg, src))
    }

    fn expect_reg(&mut self) -> Result<VirtualReg, Error> {
        let (token, range) = self.expect_take_current()?;
        let reg = match &token {
            Token::Ident(ident) => register(ident),
            _ => None,
        };

        reg.map(VirtualReg)
            .ok_or_else(|| self.invalid_operand(range, "expected a register"))
    }

    fn expect_source(&mut self) -> Result<Source, Error> {
        let (token, range) = self.expect_take_current()?;
        match token {
            Token::Number(n) => Ok(Source::Imm(n)),
            Token::Ident(ident) => match register(&ident) {
                Some(reg) => Ok(Source::Reg(VirtualReg(reg))),
                None => Err(self.invalid_operand(range, "expected a register or an immediate")),
            },
            _ => Err(self.invalid_operand(range, "expected a register or an immediate")),
        }
    }

    fn expect_number(&mut self) -> Result<i64, Error> {
        let (token, range) = self.expect_take_current()?;
        match token {
            Token::Number(n) => Ok(n),
            _ => Err(self.invalid_operand(range, "expected a number")),
        }
    }

    fn expect_symbol(&mut self) -> Result<String, Error> {
        let (token, range) = self.expect_take_current()?;
        match token {
            Token::Ident(ident) if register(&ident).is_none() => Ok(ident),
            _ => Err(self.invalid_operand(range, "expected a symbol name")),
        }
    }

    /// `[rN]`
    fn expect_indirect(&mut self) -> Result<VirtualReg, Error> {
        self.expect_next(
            |t| matches!(t, Token::Punct(Punct::LeftBracket)),
            "expected '['",
        )?;
        let reg = self.expect_reg()?;
        self.expect_next(
            |t| matches!(t, Token::Punct(Punct::RightBracket)),
            "expected ']'",
        )?;
        Ok(reg)
    }

    fn expect_comma(&mut self) -> Result<(), Error> {
        self.expect_next(|t| matches!(t, Token::Punct(Punct::Comma)), "expected ','")
    }

    fn eat_comma(&mut self) -> Result<bool, Error> {
        if matches!(self.lexer.current(), Some((Token::Punct(Punct::Comma), _))) {
            self.lexer.take_current()?;
            return Ok(true);
        }

        Ok(false)
    }

    fn expect_end_of_line(&mut self) -> Result<bool, Error> {
        match self.lexer.take_current()? {
            Some((Token::Newline, _)) => Ok(true),
            None => Ok(false),
            Some((_, range)) => Err(self
                .err_ctx
                .unexpected_token(range, "expected end of line")
                .finish()),
        }
    }

    fn expect_next<F>(&mut self, matches: F, message: impl ToString) -> Result<(), Error>
    where
        F: FnOnce(&Token) -> bool,
    {
        let (token, range) = self.expect_take_current()?;
        if !matches(&token) {
            return Err(self.err_ctx.unexpected_token(range, message).finish());
        }

        Ok(())
    }

    /// Takes the current token, which must not end the line.
    fn expect_take_current(&mut self) -> Result<(Token, Range<usize>), Error> {
        let pos = self.lexer.cur_token_start();
        match self.lexer.current() {
            Some((Token::Newline, _)) | None => Err(self
                .err_ctx
                .unexpected_eol(pos, "missing operand")
                .finish()),
            Some(_) => Ok(self.lexer.take_current()?.unwrap_or((Token::Newline, pos..pos))),
        }
    }

    fn invalid_operand(&mut self, range: Range<usize>, message: &str) -> Error {
        self.err_ctx
            .build(range.clone())
            .with_code(ErrorCode::InvalidOperand)
            .with_message("invalid operand")
            .with_label(range, message)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Position;

    fn parse(source: &str) -> Result<Vec<Instruction>, ErrorVec> {
        crate::analyze::parse_source(Rc::new(String::from("test.ir")), source)
    }

    fn ops(source: &str) -> Vec<Operation> {
        parse(source).unwrap().into_iter().map(|i| i.op).collect()
    }

    fn r(n: u8) -> VirtualReg {
        VirtualReg(n)
    }

    // ---- Instructions ----

    #[test]
    fn register_and_immediate_operands() {
        assert_eq!(
            ops("mov r0, 5\nadd r0, r1\nshl r2, 3\n"),
            vec![
                Operation::Mov {
                    dest: r(0),
                    src: Source::Imm(5)
                },
                Operation::Add {
                    dest: r(0),
                    src: Source::Reg(r(1))
                },
                Operation::Shl {
                    dest: r(2),
                    count: Source::Imm(3)
                },
            ]
        );
    }

    #[test]
    fn indirect_operands() {
        assert_eq!(
            ops("load r3, [r1]\nstore [r0], -1"),
            vec![
                Operation::Load {
                    dest: r(3),
                    addr: r(1)
                },
                Operation::Store {
                    addr: r(0),
                    src: Source::Imm(-1)
                },
            ]
        );
    }

    #[test]
    fn declarations() {
        assert_eq!(
            ops("var x\nvar y, 0x10\nbuffer buf, 16\nset x, r1\nget r2, buf"),
            vec![
                Operation::Var {
                    name: "x".into(),
                    init: None
                },
                Operation::Var {
                    name: "y".into(),
                    init: Some(16)
                },
                Operation::Buffer {
                    name: "buf".into(),
                    len: 16
                },
                Operation::Set {
                    name: "x".into(),
                    src: Source::Reg(r(1))
                },
                Operation::Get {
                    dest: r(2),
                    name: "buf".into()
                },
            ]
        );
    }

    #[test]
    fn bit_instructions() {
        assert_eq!(
            ops("setb 0x90\njnb 0x90, wait\ndjnz r2, wait"),
            vec![
                Operation::Setb { bit: 0x90 },
                Operation::Jnb {
                    bit: 0x90,
                    target: "wait".into()
                },
                Operation::Djnz {
                    reg: r(2),
                    target: "wait".into()
                },
            ]
        );
    }

    // ---- Labels and positions ----

    #[test]
    fn labels_comments_and_positions() {
        let ir = parse("; program\nstart:\n    nop ; idle\nend: halt\n").unwrap();

        assert_eq!(
            ir,
            vec![
                Instruction::new(
                    Operation::Label {
                        name: "start".into()
                    },
                    Position::new(2, 1)
                ),
                Instruction::new(Operation::Nop, Position::new(3, 5)),
                Instruction::new(Operation::Label { name: "end".into() }, Position::new(4, 1)),
                Instruction::new(Operation::Halt, Position::new(4, 6)),
            ]
        );
    }

    #[test]
    fn listing_parses_back() {
        let source = "top:\n    cmp r0, 10\n    jle top\n    org 0x100\n    int 33\n";
        let listing: String = parse(source)
            .unwrap()
            .iter()
            .map(|i| format!("{}\n", i))
            .collect();

        assert_eq!(listing, source);
    }

    // ---- Errors ----

    #[test]
    fn errors_are_collected_per_line() {
        let errors = parse("mov r0\nfrob r1\nadd r0, r1\njmp r2\n").unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert_eq!(parse("ret r0").unwrap_err().len(), 1);
    }

    #[test]
    fn register_is_not_a_symbol() {
        assert!(parse("call r1").is_err());
        assert!(parse("mov r0, label").is_err());
    }
}
