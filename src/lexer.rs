//! Tokenization of Locus source text.
//!
//! The lexer first validates that the source uses only the supported
//! character set, then repeatedly skips whitespace and `#` line comments
//! and scans one token. Each token records the line/column of its first
//! character; positions are recovered from remaining-input arithmetic
//! against a precomputed table of line start offsets.
//!
//! String literals are scanned raw (quotes and escape sequences included);
//! decoding the escapes is the parser's job, so an unterminated literal is
//! a lexer error while an unsupported escape is a parser error.

use std::collections::VecDeque;

use nom::{
    IResult, Parser,
    bytes::complete::{escaped, take_while, take_while1},
    character::complete::{anychar, char, none_of, one_of, satisfy},
    combinator::{opt, recognize},
    sequence::{delimited, pair},
};

use crate::{Error, SourceLocation};

/// Non-alphanumeric characters permitted in source text.
const PUNCTUATION_CHARSET: &str = "`~!@#$%^&*()-_=+[{]}\\|;:'\",<.>/?";

/// Characters that form single-character tokens.
const SPECIAL_TOKENS: &str = "(){}[]=@&";

/// One source token: the raw text plus the position of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub sl: SourceLocation,
    pub text: String,
}

impl Token {
    /// Tokens are classified by their first character, so the parser can
    /// dispatch without re-scanning.
    pub fn is_integer(&self) -> bool {
        self.text
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '+' || c == '-')
    }

    pub fn is_string(&self) -> bool {
        self.text.starts_with('"')
    }

    pub fn is_intrinsic(&self) -> bool {
        self.text.starts_with('.')
    }

    pub fn is_name(&self) -> bool {
        self.text
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

/// Tokenize a complete source text.
pub fn lex(source: &str) -> Result<VecDeque<Token>, Error> {
    check_charset(source)?;
    let line_starts = line_starts(source);

    let mut tokens = VecDeque::new();
    let mut rest = source;
    loop {
        rest = skip_trivia(rest);
        if rest.is_empty() {
            break;
        }
        let sl = location_at(&line_starts, source.len() - rest.len());
        let (next, text) = scan_token(rest, sl)?;
        tokens.push_back(Token {
            sl,
            text: text.to_owned(),
        });
        rest = next;
    }
    Ok(tokens)
}

/// Reject any character outside the supported set, reporting where it is.
fn check_charset(source: &str) -> Result<(), Error> {
    let mut sl = SourceLocation::default();
    for c in source.chars() {
        let supported = c.is_ascii_alphanumeric()
            || PUNCTUATION_CHARSET.contains(c)
            || c == ' '
            || c == '\t'
            || c == '\n';
        if !supported {
            return Err(Error::lexer(sl, "unsupported character"));
        }
        sl.update(c);
    }
    Ok(())
}

/// Skip whitespace and `#` comments (which run to end of line).
fn skip_trivia(mut rest: &str) -> &str {
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace());
        match rest.strip_prefix('#') {
            Some(comment) => {
                rest = match comment.find('\n') {
                    Some(end) => &comment[end + 1..],
                    None => "",
                };
            }
            None => return rest,
        }
    }
}

/// Scan exactly one token from the head of `rest`, dispatching on its first
/// character.
fn scan_token<'a>(rest: &'a str, sl: SourceLocation) -> Result<(&'a str, &'a str), Error> {
    let Some(first) = rest.chars().next() else {
        return Err(Error::lexer(sl, "unsupported token starting character"));
    };

    if first.is_ascii_digit() || first == '+' || first == '-' {
        let (next, text) = run(integer_token, rest, sl, "invalid number literal")?;
        if !is_valid_integer(text) {
            return Err(Error::lexer(sl, "invalid number literal"));
        }
        Ok((next, text))
    } else if first.is_ascii_alphabetic() {
        run(name_token, rest, sl, "unsupported token starting character")
    } else if first == '.' {
        run(intrinsic_token, rest, sl, "unsupported token starting character")
    } else if SPECIAL_TOKENS.contains(first) {
        run(special_token, rest, sl, "unsupported token starting character")
    } else if first == '"' {
        run(string_token, rest, sl, "incomplete string literal")
    } else {
        Err(Error::lexer(sl, "unsupported token starting character"))
    }
}

/// Run a nom token scanner, mapping its failure to a lexer error at `sl`.
fn run<'a>(
    mut scanner: impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>>,
    input: &'a str,
    sl: SourceLocation,
    message: &'static str,
) -> Result<(&'a str, &'a str), Error> {
    scanner
        .parse(input)
        .map_err(|_| Error::lexer(sl, message))
}

/// A run of digits and signs; validated against the integer grammar
/// afterwards so that e.g. `12+3` and `007` are rejected as one bad token
/// rather than split.
fn integer_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_digit() || c == '+' || c == '-').parse(input)
}

fn name_token(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic()),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// `.` followed by everything up to whitespace or `)`.
fn intrinsic_token(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        char('.'),
        take_while(|c: char| !c.is_whitespace() && c != ')'),
    ))
    .parse(input)
}

fn special_token(input: &str) -> IResult<&str, &str> {
    recognize(one_of(SPECIAL_TOKENS)).parse(input)
}

/// A double-quoted literal, kept raw. Backslash escapes any character at
/// this stage; the parser decides which escapes are meaningful.
fn string_token(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('"'),
        opt(escaped(none_of("\\\""), '\\', anychar)),
        char('"'),
    ))
    .parse(input)
}

/// `[+-]?(0|[1-9][0-9]*)`
fn is_valid_integer(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    digits == "0" || !digits.starts_with('0')
}

/// Byte offsets at which each line begins.
fn line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn location_at(line_starts: &[usize], offset: usize) -> SourceLocation {
    let line = line_starts.partition_point(|&start| start <= offset);
    let col = offset - line_starts[line - 1] + 1;
    SourceLocation::new(line as i32, col as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        lex(source)
            .expect("lexing should succeed")
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_tokenizes_simple_program() {
        assert_eq!(
            texts("letrec (x = 1) (.+ x -2)"),
            vec!["letrec", "(", "x", "=", "1", ")", "(", ".+", "x", "-2", ")"]
        );
    }

    #[test]
    fn test_tokenizes_every_special_symbol() {
        assert_eq!(
            texts("( ) [ ] = @ & { }"),
            vec!["(", ")", "[", "]", "=", "@", "&", "{", "}"]
        );
    }

    #[test]
    fn test_string_tokens_kept_raw() {
        assert_eq!(texts(r#""hi there""#), vec![r#""hi there""#]);
        assert_eq!(texts(r#""a\"b""#), vec![r#""a\"b""#]);
        assert_eq!(texts(r#""""#), vec![r#""""#]);
        // A real newline inside the literal is kept verbatim.
        assert_eq!(texts("\"a\nb\""), vec!["\"a\nb\""]);
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(texts("1 # one\n# whole line\n2"), vec!["1", "2"]);
        assert_eq!(texts("# only a comment"), Vec::<String>::new());
    }

    #[test]
    fn test_token_locations() {
        let tokens = lex("ab cd\n  ef").expect("lexing should succeed");
        let positions: Vec<(i32, i32)> = tokens.iter().map(|t| (t.sl.line, t.sl.col)).collect();
        assert_eq!(positions, vec![(1, 1), (1, 4), (2, 3)]);
    }

    #[test]
    fn test_intrinsic_token_stops_at_closing_paren() {
        assert_eq!(texts("(.void)"), vec!["(", ".void", ")"]);
        assert_eq!(texts("(.s->i x)"), vec!["(", ".s->i", "x", ")"]);
    }

    #[test]
    fn test_integer_validation() {
        assert!(is_valid_integer("0"));
        assert!(is_valid_integer("-42"));
        assert!(is_valid_integer("+7"));
        assert!(!is_valid_integer("007"));
        assert!(!is_valid_integer("12+3"));
        assert!(!is_valid_integer("+"));
        assert!(!is_valid_integer("--1"));
    }

    #[test]
    fn test_lexer_errors() {
        let err = lex("café").expect_err("non-ASCII source must be rejected");
        assert_eq!(err.message(), "unsupported character");

        let err = lex("\"open").expect_err("unterminated string must be rejected");
        assert_eq!(err.message(), "incomplete string literal");
        assert_eq!(err.location(), SourceLocation::new(1, 1));

        let err = lex("1 007").expect_err("leading zeros must be rejected");
        assert_eq!(err.message(), "invalid number literal");
        assert_eq!(err.location(), SourceLocation::new(1, 3));
    }
}
