use std::{
    fmt::Display,
    ops::{Deref, Range},
    rc::Rc,
};

use ariadne::{Color, ColorGenerator, Label, Report, ReportBuilder, ReportKind, Source};

use crate::{
    analyze::{lex::Lexer, parse::Parser},
    ir::{Instruction, Position},
    synthesize::error::Error as GenerationError,
};

pub mod lex;
pub mod parse;

pub type Span = (Rc<String>, Range<usize>);

/// Reads textual IR into instructions, collecting every error found.
pub fn parse_source(source_name: Rc<String>, source: &str) -> Result<Vec<Instruction>, ErrorVec> {
    let lexer = Lexer::new(source_name.clone(), source)?;
    let parser = Parser::new(source_name, source, lexer);
    parser.into_ir()
}

#[derive(Debug)]
pub struct Error(Box<Report<'static, Span>>);

impl Error {
    pub fn new(report: Report<'static, Span>) -> Self {
        Self(Box::new(report))
    }

    /// Renders a generation error at the line and column of the offending instruction.
    pub fn from_generation(source_name: Rc<String>, lines: &Lines, error: &GenerationError) -> Self {
        let range = lines.range(error.pos);

        let report = Report::build(ReportKind::Error, (source_name.clone(), range.clone()))
            .with_code(ErrorCode::Generation)
            .with_message(error.kind.to_string())
            .with_label(
                Label::new((source_name, range))
                    .with_color(Color::BrightRed)
                    .with_message(format!("while generating code for {}", error.arch)),
            )
            .finish();

        Self::new(report)
    }
}

impl Deref for Error {
    type Target = Report<'static, Span>;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

pub struct ErrorBuilder<'c> {
    builder: ReportBuilder<'static, Span>,
    context: &'c mut ErrorContext,
}

impl<'c> ErrorBuilder<'c> {
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.builder = self.builder.with_code(code);
        self
    }

    pub fn with_message(mut self, msg: impl ToString) -> Self {
        self.builder.set_message(msg);
        self
    }

    pub fn with_label(mut self, range: Range<usize>, msg: impl ToString) -> Self {
        let label = Label::new((self.context.source_name.clone(), range))
            .with_color(self.context.color_gen.next())
            .with_message(msg);

        self.builder.add_label(label);

        self
    }

    pub fn report(self) {
        let error = Error::new(self.builder.finish());
        self.context.errors.push(error);
    }

    pub fn finish(self) -> Error {
        Error::new(self.builder.finish())
    }
}

pub struct ErrorContext {
    source_name: Rc<String>,
    color_gen: ColorGenerator,
    errors: Vec<Error>,
}

impl ErrorContext {
    pub fn new(source_name: Rc<String>) -> Self {
        Self {
            source_name,
            color_gen: ColorGenerator::new(),
            errors: Vec::new(),
        }
    }

    pub fn unexpected_token(
        &mut self,
        range: Range<usize>,
        message: impl ToString,
    ) -> ErrorBuilder<'_> {
        self.build(range.clone())
            .with_code(ErrorCode::UnexpectedToken)
            .with_message("unexpected token")
            .with_label(range, message)
    }

    pub fn unexpected_eol(&mut self, pos: usize, message: impl ToString) -> ErrorBuilder<'_> {
        let range = pos.saturating_sub(1)..pos;
        self.build(range.clone())
            .with_code(ErrorCode::UnexpectedToken)
            .with_message("unexpected end of line")
            .with_label(range, message)
    }

    pub fn build(&mut self, range: Range<usize>) -> ErrorBuilder<'_> {
        let builder = Report::build(ReportKind::Error, (self.source_name.clone(), range));

        ErrorBuilder {
            builder,
            context: self,
        }
    }

    pub fn report(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> ErrorVec {
        ErrorVec(std::mem::take(&mut self.errors))
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug)]
pub enum ErrorCode {
    UnexpectedCharacter,
    UnexpectedToken,
    InvalidNumber,
    UnknownMnemonic,
    InvalidOperand,
    Generation,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{:02}", *self as u32)
    }
}

#[derive(Debug)]
pub struct ErrorVec(Vec<Error>);

impl ErrorVec {
    /// Prints all errors to stderr
    pub fn dump(&self, source_name: Rc<String>, source: &Source) {
        for error in &self.0 {
            if error.eprint((source_name.clone(), source)).is_err() {
                eprintln!("couldn't print error message to stderr");
            }

            eprintln!();
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }
}

impl From<Error> for ErrorVec {
    fn from(error: Error) -> Self {
        Self(vec![error])
    }
}

/// Maps between character offsets and 1-based line/column positions.
#[derive(Debug, Clone)]
pub struct Lines {
    /// Offset of the first character of every line.
    starts: Vec<usize>,
    len: usize,
}

impl Lines {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        let mut len = 0;
        for (i, c) in source.chars().enumerate() {
            if c == '\n' {
                starts.push(i + 1);
            }
            len = i + 1;
        }

        Self { starts, len }
    }

    pub fn position(&self, offset: usize) -> Position {
        let line = self.starts.partition_point(|start| *start <= offset);
        let column = offset - self.starts[line - 1];
        Position::new(line as u32, column as u32 + 1)
    }

    /// Range from `pos` to the end of its line.
    pub fn range(&self, pos: Position) -> Range<usize> {
        let line = (pos.line as usize).clamp(1, self.starts.len());
        let line_start = self.starts[line - 1];
        let line_end = self
            .starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.len);

        let start = (line_start + (pos.column as usize).saturating_sub(1)).min(line_end);
        start..line_end.max(start + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based() {
        let lines = Lines::new("nop\n  ret\n");
        assert_eq!(lines.position(0), Position::new(1, 1));
        assert_eq!(lines.position(2), Position::new(1, 3));
        assert_eq!(lines.position(6), Position::new(2, 3));
    }

    #[test]
    fn range_runs_to_end_of_line() {
        let lines = Lines::new("nop\n  mov r0, 1\nret");
        assert_eq!(lines.range(Position::new(2, 3)), 6..15);
        assert_eq!(lines.range(Position::new(3, 1)), 16..19);
    }

    #[test]
    fn error_codes() {
        assert_eq!(ErrorCode::UnexpectedCharacter.to_string(), "E00");
        assert_eq!(ErrorCode::Generation.to_string(), "E05");
    }
}
