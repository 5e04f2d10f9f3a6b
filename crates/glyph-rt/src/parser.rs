//! The parser seam, SPEC_FULL §B.1.
//!
//! The runtime core consumes [`TaggedTemplate`] trees, not source text;
//! spec §6 explicitly places lexing/parsing for the host language outside
//! the engine's scope. [`ArithmeticParser`] is a minimal, concrete
//! implementation of [`ExpressionParser`] — arithmetic, comparisons,
//! variables, and calls to already-registered builtins/functions — good
//! enough to drive spec §8's arithmetic-evaluation scenario without pulling
//! in a real grammar. Grounded in the teacher's own small hand-written expression
//! parser for f-string/format-spec sub-expressions
//! (`crates/ouros/src/parse.rs`), which takes the same "minimal recursive
//! descent over a narrow grammar" approach rather than reaching for a
//! parser-combinator crate.

use std::collections::HashMap;
use std::fmt;

use crate::{
    ast::template::{ArgStrategy, NodeTemplate, SlotId, TaggedTemplate},
    values::Value,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at byte {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// An IR-producing frontend, SPEC_FULL §B.1: anything implementing this
/// can drive the engine without the engine knowing how its source text is
/// structured.
pub trait ExpressionParser {
    /// Parses `source` into a tagged template tree, resolving variable
    /// names against `environment` (name to slot) and builtin/function
    /// calls against `callables` (name to callable value).
    fn parse(
        &self,
        source: &str,
        environment: &HashMap<String, SlotId>,
        callables: &HashMap<String, Value>,
    ) -> Result<TaggedTemplate, ParseError>;
}

/// Token stream over arithmetic/comparison expressions with identifiers,
/// integer/decimal literals, parenthesization, and `name(arg, ...)` calls.
struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
    Eof,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();
        let Some(c) = self.peek_char() else {
            return Ok(Token::Eof);
        };

        if c.is_ascii_digit() {
            return self.lex_number();
        }
        if c.is_alphabetic() || c == '_' {
            return Ok(self.lex_ident());
        }
        match c {
            '(' => {
                self.pos += 1;
                Ok(Token::LParen)
            }
            ')' => {
                self.pos += 1;
                Ok(Token::RParen)
            }
            ',' => {
                self.pos += 1;
                Ok(Token::Comma)
            }
            '=' if self.source[self.pos..].starts_with("==") => {
                self.pos += 2;
                Ok(Token::Op('='))
            }
            '+' | '-' | '*' | '/' | '<' | '>' => {
                self.pos += 1;
                Ok(Token::Op(c))
            }
            other => Err(ParseError {
                message: format!("unexpected character '{other}'"),
                position: self.pos,
            }),
        }
    }

    fn lex_number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek_char() == Some('.') {
            is_float = true;
            self.pos += 1;
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.source[start..self.pos];
        if is_float {
            text.parse::<f64>().map(Token::Float).map_err(|e| ParseError {
                message: format!("invalid decimal literal: {e}"),
                position: start,
            })
        } else {
            text.parse::<i64>().map(Token::Int).map_err(|e| ParseError {
                message: format!("invalid integer literal: {e}"),
                position: start,
            })
        }
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while self.peek_char().is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.') {
            self.pos += 1;
        }
        Token::Ident(self.source[start..self.pos].to_owned())
    }
}

/// A minimal recursive-descent parser over arithmetic, comparisons, and
/// calls, precedence `==` / `<` `>` < `+` `-` < `*` `/` < unary `-` <
/// atoms.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticParser;

struct ParserState<'a> {
    tokens: Vec<Token>,
    pos: usize,
    environment: &'a HashMap<String, SlotId>,
    callables: &'a HashMap<String, Value>,
}

impl ExpressionParser for ArithmeticParser {
    fn parse(
        &self,
        source: &str,
        environment: &HashMap<String, SlotId>,
        callables: &HashMap<String, Value>,
    ) -> Result<TaggedTemplate, ParseError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let done = tok == Token::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        let mut state = ParserState {
            tokens,
            pos: 0,
            environment,
            callables,
        };
        let expr = state.parse_equality()?;
        if state.current() != &Token::Eof {
            return Err(ParseError {
                message: format!("unexpected trailing token {:?}", state.current()),
                position: 0,
            });
        }
        Ok(expr)
    }
}

impl ParserState<'_> {
    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn parse_equality(&mut self) -> Result<TaggedTemplate, ParseError> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.current(), Token::Op('=')) {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = call_node("==", vec![lhs, rhs], self.callables)?;
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<TaggedTemplate, ParseError> {
        let mut lhs = self.parse_additive()?;
        while matches!(self.current(), Token::Op('<') | Token::Op('>')) {
            let Token::Op(op) = self.advance() else { unreachable!() };
            let rhs = self.parse_additive()?;
            lhs = if op == '<' {
                call_node("<", vec![lhs, rhs], self.callables)?
            } else {
                call_node("<", vec![rhs, lhs], self.callables)?
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<TaggedTemplate, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        while matches!(self.current(), Token::Op('+') | Token::Op('-')) {
            let Token::Op(op) = self.advance() else { unreachable!() };
            let rhs = self.parse_multiplicative()?;
            lhs = call_node(&op.to_string(), vec![lhs, rhs], self.callables)?;
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<TaggedTemplate, ParseError> {
        let mut lhs = self.parse_unary()?;
        while matches!(self.current(), Token::Op('*') | Token::Op('/')) {
            let Token::Op(op) = self.advance() else { unreachable!() };
            let rhs = self.parse_unary()?;
            lhs = call_node(&op.to_string(), vec![lhs, rhs], self.callables)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<TaggedTemplate, ParseError> {
        if matches!(self.current(), Token::Op('-')) {
            self.advance();
            let operand = self.parse_unary()?;
            let zero = TaggedTemplate::new(NodeTemplate::Literal(Value::Long(0))).with_id(crate::ast::template::ExpressionId::new());
            return call_node("-", vec![zero, operand], self.callables);
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<TaggedTemplate, ParseError> {
        let id = crate::ast::template::ExpressionId::new();
        match self.advance() {
            Token::Int(n) => Ok(TaggedTemplate::new(NodeTemplate::Literal(Value::Long(n))).with_id(id)),
            Token::Float(n) => Ok(TaggedTemplate::new(NodeTemplate::Literal(Value::Double(n))).with_id(id)),
            Token::Ident(name) => self.parse_ident_expr(name, id),
            Token::LParen => {
                let inner = self.parse_equality()?;
                if self.advance() != Token::RParen {
                    return Err(ParseError {
                        message: "expected closing ')'".to_owned(),
                        position: self.pos,
                    });
                }
                Ok(inner)
            }
            other => Err(ParseError {
                message: format!("unexpected token {other:?}"),
                position: self.pos,
            }),
        }
    }

    fn parse_ident_expr(&mut self, name: String, id: crate::ast::template::ExpressionId) -> Result<TaggedTemplate, ParseError> {
        if matches!(self.current(), Token::LParen) {
            self.advance();
            let mut args = Vec::new();
            if !matches!(self.current(), Token::RParen) {
                loop {
                    args.push(self.parse_equality()?);
                    if matches!(self.current(), Token::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            if self.advance() != Token::RParen {
                return Err(ParseError {
                    message: "expected closing ')' after call arguments".to_owned(),
                    position: self.pos,
                });
            }
            return call_node(&name, args, self.callables);
        }

        if let Some(slot) = self.environment.get(&name) {
            return Ok(TaggedTemplate::new(NodeTemplate::VariableRead(*slot)).with_id(id));
        }
        if let Some(value) = self.callables.get(&name) {
            return Ok(TaggedTemplate::new(NodeTemplate::Literal(value.clone())).with_id(id));
        }
        Err(ParseError {
            message: format!("unbound name `{name}`"),
            position: self.pos,
        })
    }
}

fn call_node(name: &str, args: Vec<TaggedTemplate>, callables: &HashMap<String, Value>) -> Result<TaggedTemplate, ParseError> {
    let callee_value = callables.get(name).cloned().ok_or_else(|| ParseError {
        message: format!("unknown callable `{name}`"),
        position: 0,
    })?;
    let callee = Box::new(TaggedTemplate::new(NodeTemplate::Literal(callee_value)));
    let tagged_args = args.into_iter().map(|a| (a, ArgStrategy::Eager)).collect();
    Ok(TaggedTemplate::new(NodeTemplate::FunctionCall {
        callee,
        args: tagged_args,
    })
    .with_id(crate::ast::template::ExpressionId::new()))
}

/// Parses `source` as a free-standing expression, resolving any named
/// variable against `environment` and calls against the standard builtin
/// table (spec §8's worked arithmetic-evaluation scenario).
pub fn parse_arithmetic(source: &str, environment: &HashMap<String, SlotId>) -> Result<TaggedTemplate, ParseError> {
    let callables = crate::builtins::standard_builtins();
    ArithmeticParser.parse(source, environment, &callables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_arithmetic() {
        let env = HashMap::new();
        let template = parse_arithmetic("1 + 2 * 3", &env).unwrap();
        assert!(matches!(template.kind, NodeTemplate::FunctionCall { .. }));
    }

    #[test]
    fn parses_variable_reference() {
        let mut env = HashMap::new();
        env.insert("x".to_owned(), SlotId(0));
        let template = parse_arithmetic("x + 1", &env).unwrap();
        assert!(matches!(template.kind, NodeTemplate::FunctionCall { .. }));
    }

    #[test]
    fn rejects_unbound_name() {
        let env = HashMap::new();
        assert!(parse_arithmetic("y + 1", &env).is_err());
    }

    #[test]
    fn respects_multiplicative_precedence() {
        let env = HashMap::new();
        let template = parse_arithmetic("2 + 3 * 4", &env).unwrap();
        let NodeTemplate::FunctionCall { args, .. } = template.kind else {
            panic!("expected a call node");
        };
        // The outer call is `+`; its RHS should be the `*` subexpression.
        let (rhs, _) = &args[1];
        assert!(matches!(rhs.kind, NodeTemplate::FunctionCall { .. }));
    }
}
