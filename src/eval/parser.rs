// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Recursive-descent parser producing the `EvalValue` AST, modeled on
//! `hdds::dds::filter::parser`'s precedence-climbing structure.

use super::lexer::{Lexer, Token};
use crate::error::{Error, Result};

/// One of the four reference forms `%name`, `name:value`,
/// `name:selectedValue`, `name:propertyNames` (§3.3, §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Bare(String),
    Value(String),
    SelectedValue(String),
    PropertyNames(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),
    BoolLit(bool),
    Reference(Reference),
    List(Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token().unwrap_or(Token::Eof);
        Self { lexer, lookahead }
    }

    fn bump(&mut self) -> Result<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if &self.lookahead == expected {
            self.bump()?;
            Ok(())
        } else {
            Err(Error::ParseFailed(format!(
                "expected {expected:?}, found {:?}",
                self.lookahead
            )))
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        let expr = self.parse_or()?;
        if self.lookahead != Token::Eof {
            return Err(Error::ParseFailed(format!(
                "trailing input at {:?}",
                self.lookahead
            )));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        loop {
            let is_or = match &self.lookahead {
                Token::OrOr => true,
                Token::Ident(s) if s.eq_ignore_ascii_case("or") => true,
                _ => false,
            };
            if !is_or {
                break;
            }
            self.bump()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        loop {
            let is_and = match &self.lookahead {
                Token::AndAnd => true,
                Token::Ident(s) if s.eq_ignore_ascii_case("and") => true,
                _ => false,
            };
            if !is_and {
                break;
            }
            self.bump()?;
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.lookahead {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                _ => break,
            };
            self.bump()?;
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.lookahead {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump()?;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.lookahead {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.lookahead {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.bump()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match &self.lookahead {
            Token::Bang => {
                self.bump()?;
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            Token::Ident(s) if s.eq_ignore_ascii_case("not") => {
                self.bump()?;
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            Token::Minus => {
                self.bump()?;
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while self.lookahead == Token::LBracket {
            self.bump()?;
            let index = self.parse_or()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump()? {
            Token::Int(i) => Ok(Expr::IntLit(i)),
            Token::Float(f) => Ok(Expr::FloatLit(f)),
            Token::Str(s) => Ok(Expr::StringLit(s)),
            Token::Percent(name) => Ok(Expr::Reference(Reference::Bare(name))),
            Token::Ident(name) => {
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::BoolLit(true));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::BoolLit(false));
                }
                if self.lookahead == Token::Colon {
                    self.bump()?;
                    let Token::Ident(suffix) = self.bump()? else {
                        return Err(Error::ParseFailed(
                            "expected value/selectedValue/propertyNames after ':'".to_string(),
                        ));
                    };
                    return Ok(Expr::Reference(match suffix.as_str() {
                        "value" => Reference::Value(name),
                        "selectedValue" => Reference::SelectedValue(name),
                        "propertyNames" => Reference::PropertyNames(name),
                        other => {
                            return Err(Error::ParseFailed(format!(
                                "unknown reference suffix '{other}'"
                            )))
                        }
                    }));
                }
                Ok(Expr::Reference(Reference::Bare(name)))
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.lookahead != Token::RBracket {
                    items.push(self.parse_or()?);
                    while self.lookahead == Token::Comma {
                        self.bump()?;
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            other => Err(Error::ParseFailed(format!("unexpected token {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_suffixes() {
        assert_eq!(
            Parser::new("Other:selectedValue").parse_expr().unwrap(),
            Expr::Reference(Reference::SelectedValue("Other".to_string()))
        );
        assert_eq!(
            Parser::new("%Other").parse_expr().unwrap(),
            Expr::Reference(Reference::Bare("Other".to_string()))
        );
    }

    #[test]
    fn precedence_mul_before_add() {
        let expr = Parser::new("1 + 2 * 3").parse_expr().unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::IntLit(1)),
                Box::new(Expr::Binary(BinOp::Mul, Box::new(Expr::IntLit(2)), Box::new(Expr::IntLit(3))))
            )
        );
    }

    #[test]
    fn list_literal_and_index() {
        let expr = Parser::new("[1,2,3][1]").parse_expr().unwrap();
        match expr {
            Expr::Index(base, idx) => {
                assert!(matches!(*base, Expr::List(ref v) if v.len() == 3));
                assert_eq!(*idx, Expr::IntLit(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_input_is_parse_failed() {
        assert!(Parser::new("1 2").parse_expr().is_err());
    }
}
