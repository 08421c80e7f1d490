//! Recursive-descent parser from tokens to the expression tree.
//!
//! The grammar is predictive: every form is identified by its first token,
//! and keywords are checked before variables so `lambda`, `letrec`, `if`,
//! `while`, and `set` are never read as names. Nesting depth is bounded by
//! [`MAX_PARSE_DEPTH`] because the descent runs on the host stack; the
//! evaluator itself has no such limit.

use std::collections::VecDeque;

use crate::ast::{Callee, Expr, Lambda, Var};
use crate::lexer::Token;
use crate::{Error, MAX_PARSE_DEPTH, SourceLocation};

/// Parse a complete program: exactly one expression, no trailing tokens.
pub fn parse(tokens: VecDeque<Token>) -> Result<Expr, Error> {
    let mut parser = Parser { tokens, depth: 0 };
    let expr = parser.parse_expr()?;
    if let Some(extra) = parser.tokens.front() {
        return Err(Error::parser(extra.sl, "redundant trailing tokens"));
    }
    Ok(expr)
}

struct Parser {
    tokens: VecDeque<Token>,
    depth: usize,
}

impl Parser {
    /// Pop the next token and check it against a predicate.
    fn consume(&mut self, pred: impl Fn(&Token) -> bool) -> Result<Token, Error> {
        let Some(token) = self.tokens.pop_front() else {
            return Err(Error::parser(
                SourceLocation::none(),
                "incomplete token stream",
            ));
        };
        if !pred(&token) {
            return Err(Error::parser(token.sl, "unexpected token"));
        }
        Ok(token)
    }

    fn next_is(&self, text: &str) -> bool {
        self.tokens.front().is_some_and(|t| t.is(text))
    }

    fn next_is_name(&self) -> bool {
        self.tokens.front().is_some_and(Token::is_name)
    }

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            let sl = self
                .tokens
                .front()
                .map_or_else(SourceLocation::none, |t| t.sl);
            return Err(Error::parser(sl, "expression too deeply nested"));
        }
        let expr = self.parse_expr_inner();
        self.depth -= 1;
        expr
    }

    fn parse_expr_inner(&mut self) -> Result<Expr, Error> {
        let Some(next) = self.tokens.front() else {
            return Err(Error::parser(
                SourceLocation::none(),
                "incomplete token stream",
            ));
        };
        if next.is_integer() {
            self.parse_integer()
        } else if next.is_string() {
            self.parse_string()
        } else if next.is("set") {
            self.parse_set()
        } else if next.is("lambda") {
            self.parse_lambda()
        } else if next.is("letrec") {
            self.parse_letrec()
        } else if next.is("if") {
            self.parse_if()
        } else if next.is("while") {
            self.parse_while()
        } else if next.is_name() {
            // keywords are checked first, so this really is a variable
            Ok(Expr::Variable(self.parse_variable()?))
        } else if next.is("(") {
            self.parse_call()
        } else if next.is("[") {
            self.parse_sequence()
        } else if next.is("@") {
            self.parse_query()
        } else if next.is("&") {
            self.parse_access()
        } else {
            Err(Error::parser(next.sl, "unrecognized token"))
        }
    }

    fn parse_integer(&mut self) -> Result<Expr, Error> {
        let token = self.consume(Token::is_integer)?;
        // the lexer guarantees the shape, so the only possible failure
        // here is a literal too large for the machine integer
        let value = token
            .text
            .parse::<i64>()
            .map_err(|_| Error::parser(token.sl, "invalid number literal"))?;
        Ok(Expr::Integer {
            sl: token.sl,
            value,
        })
    }

    /// Strip the quotes and decode the escape sequences of a raw string
    /// token. Only `\\`, `\"`, `\t`, and `\n` are supported.
    fn parse_string(&mut self) -> Result<Expr, Error> {
        let token = self.consume(Token::is_string)?;
        let raw = &token.text[1..token.text.len() - 1];
        let mut value = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                value.push(c);
                continue;
            }
            match chars.next() {
                Some('\\') => value.push('\\'),
                Some('"') => value.push('"'),
                Some('t') => value.push('\t'),
                Some('n') => value.push('\n'),
                Some(_) => return Err(Error::parser(token.sl, "unsupported escape sequence")),
                None => return Err(Error::parser(token.sl, "incomplete escape sequence")),
            }
        }
        Ok(Expr::Str {
            sl: token.sl,
            value,
        })
    }

    fn parse_variable(&mut self) -> Result<Var, Error> {
        let token = self.consume(Token::is_name)?;
        Ok(Var {
            sl: token.sl,
            name: token.text,
        })
    }

    fn parse_set(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("set"))?;
        let target = self.parse_variable()?;
        let value = self.parse_expr()?;
        Ok(Expr::Set {
            sl: start.sl,
            target,
            value: Box::new(value),
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("lambda"))?;
        self.consume(|t| t.is("("))?;
        let mut params = Vec::new();
        while self.next_is_name() {
            params.push(self.parse_variable()?);
        }
        self.consume(|t| t.is(")"))?;
        let body = self.parse_expr()?;
        Ok(Expr::Lambda(Lambda {
            sl: start.sl,
            params,
            body: Box::new(body),
        }))
    }

    fn parse_letrec(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("letrec"))?;
        self.consume(|t| t.is("("))?;
        let mut bindings = Vec::new();
        while self.next_is_name() {
            let var = self.parse_variable()?;
            self.consume(|t| t.is("="))?;
            let expr = self.parse_expr()?;
            bindings.push((var, expr));
        }
        self.consume(|t| t.is(")"))?;
        let body = self.parse_expr()?;
        Ok(Expr::Letrec {
            sl: start.sl,
            bindings,
            body: Box::new(body),
        })
    }

    fn parse_if(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("if"))?;
        let cond = self.parse_expr()?;
        let branch1 = self.parse_expr()?;
        let branch2 = self.parse_expr()?;
        Ok(Expr::If {
            sl: start.sl,
            cond: Box::new(cond),
            branch1: Box::new(branch1),
            branch2: Box::new(branch2),
        })
    }

    fn parse_while(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("while"))?;
        let cond = self.parse_expr()?;
        let body = self.parse_expr()?;
        Ok(Expr::While {
            sl: start.sl,
            cond: Box::new(cond),
            body: Box::new(body),
        })
    }

    fn parse_call(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("("))?;
        let Some(next) = self.tokens.front() else {
            return Err(Error::parser(start.sl, "incomplete token stream"));
        };
        let callee = if next.is_intrinsic() {
            let token = self.consume(Token::is_intrinsic)?;
            Callee::Intrinsic {
                sl: token.sl,
                name: token.text,
            }
        } else {
            Callee::Expr(Box::new(self.parse_expr()?))
        };
        let mut args = Vec::new();
        while !self.tokens.is_empty() && !self.next_is(")") {
            args.push(self.parse_expr()?);
        }
        self.consume(|t| t.is(")"))?;
        Ok(Expr::Call {
            sl: start.sl,
            callee,
            args,
        })
    }

    fn parse_sequence(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("["))?;
        let mut exprs = Vec::new();
        while !self.tokens.is_empty() && !self.next_is("]") {
            exprs.push(self.parse_expr()?);
        }
        if exprs.is_empty() {
            return Err(Error::parser(start.sl, "zero-length sequence"));
        }
        self.consume(|t| t.is("]"))?;
        Ok(Expr::Sequence {
            sl: start.sl,
            exprs,
        })
    }

    fn parse_query(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("@"))?;
        let field = self.parse_variable()?;
        let object = self.parse_expr()?;
        Ok(Expr::Query {
            sl: start.sl,
            field,
            object: Box::new(object),
        })
    }

    fn parse_access(&mut self) -> Result<Expr, Error> {
        let start = self.consume(|t| t.is("&"))?;
        let field = self.parse_variable()?;
        let object = self.parse_expr()?;
        Ok(Expr::Access {
            sl: start.sl,
            field,
            object: Box::new(object),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_source(source: &str) -> Result<Expr, Error> {
        parse(lex(source).expect("lexing should succeed"))
    }

    #[test]
    fn test_parses_literals_and_variables() {
        assert!(matches!(
            parse_source("42"),
            Ok(Expr::Integer { value: 42, .. })
        ));
        assert!(matches!(
            parse_source("-7"),
            Ok(Expr::Integer { value: -7, .. })
        ));
        match parse_source(r#""a\tb\n""#) {
            Ok(Expr::Str { value, .. }) => assert_eq!(value, "a\tb\n"),
            other => panic!("expected string literal, got {other:?}"),
        }
        match parse_source("abc_1") {
            Ok(Expr::Variable(var)) => assert_eq!(var.name, "abc_1"),
            other => panic!("expected variable, got {other:?}"),
        }
    }

    #[test]
    fn test_parses_lambda_and_letrec() {
        match parse_source("lambda (a b) a") {
            Ok(Expr::Lambda(lambda)) => {
                assert_eq!(lambda.params.len(), 2);
                assert_eq!(lambda.params[0].name, "a");
                assert!(matches!(*lambda.body, Expr::Variable(_)));
            }
            other => panic!("expected lambda, got {other:?}"),
        }
        match parse_source("letrec (x = 1 y = x) y") {
            Ok(Expr::Letrec { bindings, .. }) => {
                assert_eq!(bindings.len(), 2);
                assert_eq!(bindings[0].0.name, "x");
                assert_eq!(bindings[1].0.name, "y");
            }
            other => panic!("expected letrec, got {other:?}"),
        }
        // zero-parameter lambdas and empty letrec binding lists are legal
        assert!(parse_source("lambda () 0").is_ok());
        assert!(parse_source("letrec () 0").is_ok());
    }

    #[test]
    fn test_parses_calls() {
        match parse_source("(.+ 1 2)") {
            Ok(Expr::Call {
                callee: Callee::Intrinsic { name, .. },
                args,
                ..
            }) => {
                assert_eq!(name, ".+");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected intrinsic call, got {other:?}"),
        }
        match parse_source("(f)") {
            Ok(Expr::Call {
                callee: Callee::Expr(_),
                args,
                ..
            }) => assert!(args.is_empty()),
            other => panic!("expected zero-argument call, got {other:?}"),
        }
        // an intrinsic reference is only recognized in callee position
        let err = parse_source("(f .put)").expect_err("intrinsic argument must be rejected");
        assert_eq!(err.message(), "unrecognized token");
    }

    #[test]
    fn test_parses_query_and_access() {
        assert!(matches!(parse_source("@ v x"), Ok(Expr::Query { .. })));
        assert!(matches!(parse_source("& v x"), Ok(Expr::Access { .. })));
    }

    #[test]
    fn test_parser_errors() {
        let cases: Vec<(&str, &str)> = vec![
            ("", "incomplete token stream"),
            ("letrec (x = 1)", "incomplete token stream"),
            ("(", "incomplete token stream"),
            ("[]", "zero-length sequence"),
            ("1 2", "redundant trailing tokens"),
            ("letrec [x = 1] x", "unexpected token"),
            ("lambda (1) x", "unexpected token"),
            // well-formed shape, but too large for the machine integer
            ("99999999999999999999", "invalid number literal"),
            (")", "unrecognized token"),
            (r#""a\q""#, "unsupported escape sequence"),
        ];
        for (source, expected) in cases {
            let err = parse_source(source)
                .expect_err(&format!("source {source:?} should fail to parse"));
            assert_eq!(err.message(), expected, "source {source:?}");
        }
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let deep = "[".repeat(2000) + "1" + &"]".repeat(2000);
        let err = parse_source(&deep).expect_err("deep nesting must be rejected");
        assert_eq!(err.message(), "expression too deeply nested");
    }
}
