use std::{ops::Range, rc::Rc};

use ariadne::{ColorGenerator, Label, Report, ReportBuilder, ReportKind};
use tracing::trace;

use crate::analyze::{
    Error, ErrorCode, Span,
    lex::token::{Punct, Token},
};

pub mod token;

pub struct Lexer {
    source_name: Rc<String>,
    color_gen: ColorGenerator,
    code: Vec<char>,
    index: usize,
    current: Option<(Token, Range<usize>)>,
    next: Option<(Token, Range<usize>)>,
}

impl Lexer {
    pub fn new(source_name: Rc<String>, code: impl AsRef<str>) -> Result<Self, Error> {
        let code: Vec<char> = code.as_ref().chars().collect();

        let mut lexer = Self {
            source_name,
            color_gen: ColorGenerator::new(),
            code,
            index: 0,
            current: None,
            next: None,
        };

        lexer.lex_two()?;

        Ok(lexer)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Get current token
    pub fn current(&self) -> Option<&(Token, Range<usize>)> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Result<Option<(Token, Range<usize>)>, Error> {
        let cur = self.current.take();
        self.lex_one()?;
        Ok(cur)
    }

    /// Lookahead to next token
    pub fn next(&self) -> Option<&(Token, Range<usize>)> {
        self.next.as_ref()
    }

    /// Start of the current token, or the end of input.
    pub fn cur_token_start(&self) -> usize {
        self.current
            .as_ref()
            .map(|(_, range)| range.start)
            .unwrap_or(self.code.len())
    }

    /// Move on from current token to the next
    pub fn lex_one(&mut self) -> Result<(), Error> {
        self.current = self.next.take();
        self.next = self.lex_next()?;
        if let Some((tok, range)) = &self.next {
            trace!(?tok, ?range, "lexed");
        }
        Ok(())
    }

    /// Move on and skip the next token
    pub fn lex_two(&mut self) -> Result<(), Error> {
        self.lex_one()?;
        self.lex_one()?;
        Ok(())
    }
}

/// Internals
impl Lexer {
    fn peek_char(&self, offset: usize) -> Option<char> {
        self.code.get(self.index + offset).copied()
    }

    fn cur_char(&self) -> Option<char> {
        self.peek_char(0)
    }

    /// Skips blanks and comments, stopping at line ends.
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.cur_char() {
            match c {
                '\n' => break,
                ';' => {
                    while self.cur_char().is_some_and(|c| c != '\n') {
                        self.index += 1;
                    }
                }
                c if c.is_whitespace() => self.index += 1,
                _ => break,
            }
        }
    }

    fn lex_next(&mut self) -> Result<Option<(Token, Range<usize>)>, Error> {
        self.skip_whitespace();

        let Some(c) = self.cur_char() else {
            return Ok(None);
        };

        if c == '\n' {
            self.index += 1;
            return Ok(Some((Token::Newline, (self.index - 1)..self.index)));
        }

        if let Some(punct) = Punct::parse(c) {
            self.index += 1;
            return Ok(Some((Token::Punct(punct), (self.index - 1)..self.index)));
        }

        if is_ident_start(c) {
            return Ok(Some(self.lex_ident()));
        }

        let signed = matches!(c, '-' | '+') && self.peek_char(1).is_some_and(|c| c.is_ascii_digit());
        if c.is_ascii_digit() || signed {
            return self.lex_number().map(Some);
        }

        Err(Error::new(
            self.error(self.index, 1)
                .with_message("unexpected character")
                .with_code(ErrorCode::UnexpectedCharacter)
                .with_label(self.label(self.index, 1).with_message("what is this?"))
                .finish(),
        ))
    }

    fn lex_ident(&mut self) -> (Token, Range<usize>) {
        let start = self.index;
        let mut string = String::new();
        while let Some(c) = self.cur_char().filter(|c| is_ident_continue(*c)) {
            string.push(c);
            self.index += 1;
        }

        (Token::Ident(string), start..self.index)
    }

    /// Decimal, `0x` hexadecimal or `0b` binary, with an optional sign.
    fn lex_number(&mut self) -> Result<(Token, Range<usize>), Error> {
        let start = self.index;
        let mut string = String::new();
        while let Some(c) = self
            .cur_char()
            .filter(|c| c.is_ascii_alphanumeric() || (self.index == start && matches!(c, '-' | '+')))
        {
            string.push(c);
            self.index += 1;
        }

        match parse_number(&string) {
            Some(num) => Ok((Token::Number(num), start..self.index)),
            None => Err(Error::new(
                self.error(start, self.index - start)
                    .with_message("invalid number")
                    .with_code(ErrorCode::InvalidNumber)
                    .with_label(
                        self.label(start, self.index - start)
                            .with_message("not a 64-bit integer"),
                    )
                    .finish(),
            )),
        }
    }

    fn error(&self, pos: usize, length: usize) -> ReportBuilder<'static, Span> {
        Report::build(
            ReportKind::Error,
            (self.source_name.clone(), pos..(pos + length)),
        )
    }

    fn label(&mut self, pos: usize, length: usize) -> Label<Span> {
        Label::new((self.source_name.clone(), pos..(pos + length)))
            .with_color(self.color_gen.next())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn parse_number(string: &str) -> Option<i64> {
    let (negative, unsigned) = match *string.as_bytes().first()? {
        b'-' => (true, &string[1..]),
        b'+' => (false, &string[1..]),
        _ => (false, string),
    };

    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits) = if let Some(hex) = lower.strip_prefix("0x") {
        (16, hex)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        (2, bin)
    } else {
        (10, lower.as_str())
    };

    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    i64::try_from(if negative { -magnitude } else { magnitude }).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(Rc::new("test".into()), source).unwrap();
        let mut tokens = Vec::new();
        while let Some((token, _)) = lexer.take_current().unwrap() {
            tokens.push(token);
        }
        tokens
    }

    fn ident(s: &str) -> Token {
        Token::Ident(s.into())
    }

    #[test]
    fn instruction_line() {
        assert_eq!(
            tokens("  mov r0, -5 ; load five\n"),
            vec![
                ident("mov"),
                ident("r0"),
                Token::Punct(Punct::Comma),
                Token::Number(-5),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn labels_and_brackets() {
        assert_eq!(
            tokens("loop_1: store [r1], 0x7F"),
            vec![
                ident("loop_1"),
                Token::Punct(Punct::Colon),
                ident("store"),
                Token::Punct(Punct::LeftBracket),
                ident("r1"),
                Token::Punct(Punct::RightBracket),
                Token::Punct(Punct::Comma),
                Token::Number(0x7F),
            ]
        );
    }

    #[test]
    fn number_bases() {
        assert_eq!(parse_number("0b1010"), Some(10));
        assert_eq!(parse_number("0XfF"), Some(255));
        assert_eq!(parse_number("-0x80"), Some(-128));
        assert_eq!(parse_number("+42"), Some(42));
        assert_eq!(parse_number("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_number("9223372036854775808"), None);
        assert_eq!(parse_number("12ab"), None);
    }

    #[test]
    fn comment_only_lines() {
        assert_eq!(tokens("; nothing\n\n"), vec![Token::Newline, Token::Newline]);
    }

    #[test]
    fn unexpected_character() {
        assert!(Lexer::new(Rc::new("test".into()), "$1").is_err());

        let mut lexer = Lexer::new(Rc::new("test".into()), "mov r0, $1").unwrap();
        assert!(lexer.take_current().is_ok());
        assert!(lexer.take_current().is_err());
    }
}
