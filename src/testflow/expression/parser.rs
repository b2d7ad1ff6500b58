use super::lexer::Token;
use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    /// A member access chain; an optional segment on a nullish base
    /// short-circuits the whole chain to `undefined`.
    Chain { base: Box<Expr>, segments: Vec<Segment> },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub optional: bool,
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Name(String),
    Computed(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// Deepest syntax tree accepted. Each parenthesis, bracket, ternary branch,
/// unary operator and chained binary operator counts as one level.
const MAX_DEPTH: usize = 128;

pub fn parse(tokens: &[Token]) -> Result<Expr, ExprError> {
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ExprError::Syntax(format!("unexpected token {tok:?}"))),
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(ExprError::Syntax(format!(
                "expected '{punct}', found {:?}",
                self.peek()
            )))
        }
    }

    fn descend(&mut self) -> Result<(), ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::Syntax("nesting too deep".into()));
        }
        self.depth += 1;
        Ok(())
    }

    /// Returns the first of `ops` that the next token matches, consuming it.
    fn eat_any(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        let op = ops.iter().find(|op| matches!(self.peek(), Some(Token::Punct(p)) if p == *op))?;
        self.pos += 1;
        Some(*op)
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        self.descend()?;
        let cond = self.logical_or()?;
        if !self.eat("?") {
            self.depth = depth;
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect(":")?;
        let otherwise = self.expression()?;
        self.depth = depth;
        Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn logical_or(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut lhs = self.logical_and()?;
        while let Some(op) = self.eat_any(&["||", "??"]) {
            self.descend()?;
            let rhs = self.logical_and()?;
            let op = if op == "||" { LogicalOp::Or } else { LogicalOp::Nullish };
            lhs = Expr::Logical(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn logical_and(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut lhs = self.equality()?;
        while self.eat("&&") {
            self.descend()?;
            let rhs = self.equality()?;
            lhs = Expr::Logical(LogicalOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut lhs = self.comparison()?;
        while let Some(op) = self.eat_any(&["===", "!==", "==", "!="]) {
            self.descend()?;
            let op = match op {
                "===" => BinaryOp::StrictEq,
                "!==" => BinaryOp::StrictNe,
                "==" => BinaryOp::Eq,
                _ => BinaryOp::Ne,
            };
            let rhs = self.comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut lhs = self.additive()?;
        while let Some(op) = self.eat_any(&["<=", ">=", "<", ">"]) {
            self.descend()?;
            let op = match op {
                "<=" => BinaryOp::Le,
                ">=" => BinaryOp::Ge,
                "<" => BinaryOp::Lt,
                _ => BinaryOp::Gt,
            };
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.eat_any(&["+", "-"]) {
            self.descend()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_any(&["*", "/", "%"]) {
            self.descend()?;
            let op = match op {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.eat_any(&["!", "-", "+"]) {
            Some("!") => UnaryOp::Not,
            Some("-") => UnaryOp::Neg,
            Some(_) => UnaryOp::Plus,
            None => return self.postfix(),
        };
        let depth = self.depth;
        self.descend()?;
        let operand = self.unary()?;
        self.depth = depth;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        let mut segments = Vec::new();

        loop {
            if self.eat(".") {
                segments.push(Segment { optional: false, key: Key::Name(self.ident()?) });
            } else if self.eat("?.") {
                let key = if self.eat("[") {
                    let key = Key::Computed(self.expression()?);
                    self.expect("]")?;
                    key
                } else {
                    Key::Name(self.ident()?)
                };
                segments.push(Segment { optional: true, key });
            } else if self.eat("[") {
                let key = Key::Computed(self.expression()?);
                self.expect("]")?;
                segments.push(Segment { optional: false, key });
            } else if matches!(self.peek(), Some(Token::Punct("("))) {
                return Err(ExprError::Syntax("function calls are not supported".into()));
            } else {
                break;
            }
        }

        if segments.is_empty() {
            Ok(base)
        } else {
            Ok(Expr::Chain { base: Box::new(base), segments })
        }
    }

    fn ident(&mut self) -> Result<String, ExprError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            other => Err(ExprError::Syntax(format!("expected property name, found {other:?}"))),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Number(*n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s.clone())),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "undefined" => Expr::Undefined,
                "NaN" => Expr::Number(f64::NAN),
                "Infinity" => Expr::Number(f64::INFINITY),
                _ => Expr::Ident(name.clone()),
            }),
            Some(Token::Punct("(")) => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => {
                let mut items = Vec::new();
                if !self.eat("]") {
                    loop {
                        items.push(self.expression()?);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                        if self.eat("]") {
                            break;
                        }
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(tok) => Err(ExprError::Syntax(format!("unexpected token {tok:?}"))),
            None => Err(ExprError::Syntax("unexpected end of expression".into())),
        }
    }
}
