//! Recursive-descent parser producing the sandbox AST
//!
//! Call targets are restricted at parse time: only bare builtin names and
//! `module.function` forms may be called, and identifiers starting with an
//! underscore are rejected outright, so dunder probing never reaches the
//! interpreter.

use crate::data::errors::SandboxError;
use crate::data::types::GraphValue;
use crate::sandbox::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(GraphValue),
    Name(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Attr(Box<Expr>, String),
    Call {
        module: Option<String>,
        function: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
    NotIn,
}

pub(crate) fn parse(tokens: Vec<Token>) -> Result<Expr, SandboxError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(SandboxError::Eval(format!(
            "unexpected trailing input at token {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), SandboxError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(SandboxError::Eval(format!("expected {}", what)))
        }
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn or_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.and_expr()?;
        loop {
            if self.eat(&Token::OrOr) || self.eat_keyword("or") {
                let right = self.and_expr()?;
                left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn and_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.not_expr()?;
        loop {
            if self.eat(&Token::AndAnd) || self.eat_keyword("and") {
                let right = self.not_expr()?;
                left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn not_expr(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let left = self.additive()?;
        // (operator, tokens to consume); "not in" is the only two-token form
        let op = match self.peek() {
            Some(Token::Eq) => Some((BinaryOp::Eq, 1)),
            Some(Token::Ne) => Some((BinaryOp::Ne, 1)),
            Some(Token::Lt) => Some((BinaryOp::Lt, 1)),
            Some(Token::Le) => Some((BinaryOp::Le, 1)),
            Some(Token::Gt) => Some((BinaryOp::Gt, 1)),
            Some(Token::Ge) => Some((BinaryOp::Ge, 1)),
            Some(Token::Ident(w)) if w == "in" => Some((BinaryOp::In, 1)),
            Some(Token::Ident(w))
                if w == "not"
                    && matches!(
                        self.tokens.get(self.pos + 1),
                        Some(Token::Ident(next)) if next == "in"
                    ) =>
            {
                Some((BinaryOp::NotIn, 2))
            }
            _ => None,
        };
        match op {
            Some((op, consumed)) => {
                self.pos += consumed;
                let right = self.additive()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn additive(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name,
                    _ => {
                        return Err(SandboxError::Eval(
                            "expected attribute name after '.'".to_string(),
                        ))
                    }
                };
                check_name(&name)?;
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat(&Token::LBracket) {
                let index = self.or_expr()?;
                self.expect(Token::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.peek() == Some(&Token::LParen) {
                expr = self.call(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn call(&mut self, target: Expr) -> Result<Expr, SandboxError> {
        let (module, function) = match target {
            Expr::Name(name) => (None, name),
            Expr::Attr(object, function) => match *object {
                Expr::Name(module) => (Some(module), function),
                _ => {
                    return Err(SandboxError::Denied(
                        "only whitelisted functions may be called".to_string(),
                    ))
                }
            },
            _ => {
                return Err(SandboxError::Denied(
                    "only whitelisted functions may be called".to_string(),
                ))
            }
        };
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.or_expr()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }
        Ok(Expr::Call {
            module,
            function,
            args,
        })
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Expr::Literal(GraphValue::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(GraphValue::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(GraphValue::String(s))),
            Some(Token::Ident(word)) => match word.as_str() {
                "True" | "true" => Ok(Expr::Literal(GraphValue::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(GraphValue::Bool(false))),
                "None" | "null" => Ok(Expr::Literal(GraphValue::Null)),
                _ => {
                    check_name(&word)?;
                    Ok(Expr::Name(word))
                }
            },
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.or_expr()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = match self.next() {
                            Some(Token::Str(s)) => s,
                            Some(Token::Ident(w)) => w,
                            _ => {
                                return Err(SandboxError::Eval(
                                    "expected map key".to_string(),
                                ))
                            }
                        };
                        self.expect(Token::Colon, "':'")?;
                        entries.push((key, self.or_expr()?));
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or '}'")?;
                    }
                }
                Ok(Expr::Map(entries))
            }
            other => Err(SandboxError::Eval(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn check_name(name: &str) -> Result<(), SandboxError> {
    if name.starts_with('_') {
        return Err(SandboxError::Denied(format!(
            "access to private name '{}' is not allowed",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::lexer::tokenize;

    fn parse_str(input: &str) -> Result<Expr, SandboxError> {
        parse(tokenize(input)?)
    }

    #[test]
    fn test_precedence() {
        let expr = parse_str("1 + 2 * 3 == 7").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Eq, left, _) => match *left {
                Expr::Binary(BinaryOp::Add, _, right) => {
                    assert!(matches!(*right, Expr::Binary(BinaryOp::Mul, _, _)));
                }
                other => panic!("expected addition, got {:?}", other),
            },
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_not_in() {
        let expr = parse_str("'x' not in tags").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::NotIn, _, _)));
    }

    #[test]
    fn test_call_shapes() {
        assert!(matches!(
            parse_str("len(items)").unwrap(),
            Expr::Call { module: None, .. }
        ));
        match parse_str("re.search('a+', name)").unwrap() {
            Expr::Call {
                module, function, ..
            } => {
                assert_eq!(module.as_deref(), Some("re"));
                assert_eq!(function, "search");
            }
            other => panic!("expected call, got {:?}", other),
        }
        // calling the result of an expression is denied
        assert!(matches!(
            parse_str("(len)(items)"),
            Err(SandboxError::Denied(_))
        ));
    }

    #[test]
    fn test_dunder_denied() {
        assert!(matches!(
            parse_str("__import__"),
            Err(SandboxError::Denied(_))
        ));
        assert!(matches!(
            parse_str("x.__class__"),
            Err(SandboxError::Denied(_))
        ));
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(parse_str("1 2").is_err());
    }
}
