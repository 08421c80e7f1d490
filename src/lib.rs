//! Locus - a tiny expression language with first-class closures
//!
//! Locus is an expression-oriented, dynamically typed, lexically scoped
//! language. Every value lives in a heap cell addressed by an integer
//! location, variables bind locations rather than values, and closures
//! capture a snapshot of their environment that can be inspected from the
//! outside. That combination makes closures double as minimal records:
//!
//! ```text
//! letrec (
//!     make = lambda (v) lambda () 0    # a closure capturing v
//! )
//! letrec (obj = (make 42))
//! [
//!     @ v obj                          # 1: obj's environment binds v
//!     & v obj                          # 42: read the field itself
//! ]
//! ```
//!
//! Evaluation is driven by an explicit-stack step machine rather than host
//! recursion, so deep user recursion cannot overflow the native stack and
//! the garbage collector has a single safe point between steps. The
//! collector is a mark/sweep/compact pass that renumbers heap locations and
//! repairs every surviving reference before evaluation resumes.
//!
//! ## Semantics in brief
//!
//! - Arguments are passed by reference: the callee's parameters share the
//!   caller's heap locations, so `set` inside a call mutates the caller's
//!   binding.
//! - `letrec` allocates Void placeholders for all names before evaluating
//!   any binding, then back-patches them in place, so mutually recursive
//!   bindings resolve.
//! - `@ name expr` asks whether a closure's environment binds `name`;
//!   `& name expr` evaluates to the bound location itself, which is the only
//!   way to alias a cell other than variable binding.
//! - `if` and `while` require an Integer condition; there is no truthiness.
//!
//! ## Modules
//!
//! - [`lexer`]: source text to located tokens
//! - [`parser`]: tokens to the expression tree
//! - [`ast`]: expression node types
//! - [`heap`]: value cells, locations, compaction
//! - [`evaluator`]: the step machine and its collector
//! - [`intrinsics`]: the built-in operation registry

use std::fmt;
use std::io::{BufRead, Write};

pub mod ast;
pub mod evaluator;
pub mod heap;
pub mod intrinsics;
pub mod lexer;
pub mod parser;

/// Maximum expression nesting accepted by the parser. The evaluator itself
/// runs on an explicit stack and needs no such limit; this only bounds the
/// parser's host-stack recursion.
pub const MAX_PARSE_DEPTH: usize = 512;

/// A line/column position in the source text, 1-based. A non-positive line
/// or column means the position is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: i32,
    pub col: i32,
}

impl SourceLocation {
    pub fn new(line: i32, col: i32) -> Self {
        SourceLocation { line, col }
    }

    /// The "unknown" position, rendered as `(SourceLocation N/A)`.
    pub fn none() -> Self {
        SourceLocation { line: 0, col: 0 }
    }

    /// Advance past one source character.
    pub fn update(&mut self, c: char) {
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        SourceLocation::new(1, 1)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line <= 0 || self.col <= 0 {
            write!(f, "(SourceLocation N/A)")
        } else {
            write!(f, "(SourceLocation {} {})", self.line, self.col)
        }
    }
}

/// Error surface for the whole pipeline: one variant per family, each
/// carrying the source position it was raised at and a short message.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Lexer {
        location: SourceLocation,
        message: String,
    },
    Parser {
        location: SourceLocation,
        message: String,
    },
    Runtime {
        location: SourceLocation,
        message: String,
    },
}

impl Error {
    pub fn lexer(location: SourceLocation, message: impl Into<String>) -> Self {
        Error::Lexer {
            location,
            message: message.into(),
        }
    }

    pub fn parser(location: SourceLocation, message: impl Into<String>) -> Self {
        Error::Parser {
            location,
            message: message.into(),
        }
    }

    pub fn runtime(location: SourceLocation, message: impl Into<String>) -> Self {
        Error::Runtime {
            location,
            message: message.into(),
        }
    }

    pub fn location(&self) -> SourceLocation {
        match self {
            Error::Lexer { location, .. }
            | Error::Parser { location, .. }
            | Error::Runtime { location, .. } => *location,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Lexer { message, .. }
            | Error::Parser { message, .. }
            | Error::Runtime { message, .. } => message,
        }
    }

    fn family(&self) -> &'static str {
        match self {
            Error::Lexer { .. } => "lexer",
            Error::Parser { .. } => "parser",
            Error::Runtime { .. } => "runtime",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} error {}] {}",
            self.family(),
            self.location(),
            self.message()
        )
    }
}

impl std::error::Error for Error {}

/// Lex, parse, and run a complete program, returning the rendered final
/// value. `.get` reads standard input and `.put` writes standard output.
pub fn run_source(source: &str) -> Result<String, Error> {
    let tokens = lexer::lex(source)?;
    let program = parser::parse(tokens)?;
    let mut machine = evaluator::Machine::new(&program);
    machine.execute()?;
    Ok(machine.result_value().to_string())
}

/// Like [`run_source`], but with caller-supplied streams for `.get` and
/// `.put`.
pub fn run_source_with_io(
    source: &str,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
) -> Result<String, Error> {
    let tokens = lexer::lex(source)?;
    let program = parser::parse(tokens)?;
    let mut machine = evaluator::Machine::with_io(&program, input, output);
    machine.execute()?;
    Ok(machine.result_value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_rendering() {
        assert_eq!(SourceLocation::new(3, 7).to_string(), "(SourceLocation 3 7)");
        assert_eq!(SourceLocation::none().to_string(), "(SourceLocation N/A)");
        assert_eq!(SourceLocation::new(-1, -1).to_string(), "(SourceLocation N/A)");
    }

    #[test]
    fn test_source_location_update() {
        let mut sl = SourceLocation::default();
        sl.update('a');
        sl.update('b');
        assert_eq!(sl, SourceLocation::new(1, 3));
        sl.update('\n');
        assert_eq!(sl, SourceLocation::new(2, 1));
    }

    #[test]
    fn test_error_rendering() {
        let err = Error::runtime(SourceLocation::new(2, 5), "undefined variable");
        assert_eq!(
            err.to_string(),
            "[runtime error (SourceLocation 2 5)] undefined variable"
        );

        let err = Error::parser(SourceLocation::none(), "incomplete token stream");
        assert_eq!(
            err.to_string(),
            "[parser error (SourceLocation N/A)] incomplete token stream"
        );

        let err = Error::lexer(SourceLocation::new(1, 1), "unsupported character");
        assert_eq!(
            err.to_string(),
            "[lexer error (SourceLocation 1 1)] unsupported character"
        );
    }
}
