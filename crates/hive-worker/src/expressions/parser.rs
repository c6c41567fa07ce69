// Recursive-descent parser producing the expression tree.
//
// Precedence, loosest first: or, and, not, comparisons (chainable), + -,
// * / // %, unary minus, indexing.

use super::lexer::Token;
use crate::error::ParamError;
use crate::params::ParamValue;

type Result<T> = std::result::Result<T, ParamError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    /// A literal, or a value a `#name#` reference resolved to.
    Value(ParamValue),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Deepest expression tree, and deepest bracket nesting, accepted.
const MAX_DEPTH: usize = 100;

pub(crate) fn parse(tokens: Vec<Token>) -> Result<Expr> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    if parser.tokens.is_empty() {
        return Err(ParamError::syntax("empty expression"));
    }
    let (expr, _) = parser.or_expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ParamError::syntax(format!(
            "unexpected {} in expression",
            token.describe()
        ))),
    }
}

/// A parsed subtree and its depth.
type Parsed = (Expr, usize);

fn too_deep() -> ParamError {
    ParamError::syntax(format!("expression nested deeper than {MAX_DEPTH} levels"))
}

/// Wrap `expr` as a node of `depth`, refusing trees that are too deep.
fn node(expr: Expr, depth: usize) -> Result<Parsed> {
    if depth > MAX_DEPTH {
        return Err(too_deep());
    }
    Ok((expr, depth))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
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

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(p)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_ident(name)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of expression".to_string());
        Err(ParamError::syntax(format!("expected '{p}', found {found}")))
    }

    fn enter(&mut self) -> Result<()> {
        self.nesting += 1;
        if self.nesting > MAX_DEPTH {
            return Err(too_deep());
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn or_expr(&mut self) -> Result<Parsed> {
        self.enter()?;
        let (mut left, mut depth) = self.and_expr()?;
        while self.eat_ident("or") || self.eat_punct("||") {
            let (right, right_depth) = self.and_expr()?;
            (left, depth) = node(
                Expr::Or(Box::new(left), Box::new(right)),
                1 + depth.max(right_depth),
            )?;
        }
        self.leave();
        Ok((left, depth))
    }

    fn and_expr(&mut self) -> Result<Parsed> {
        let (mut left, mut depth) = self.not_expr()?;
        while self.eat_ident("and") || self.eat_punct("&&") {
            let (right, right_depth) = self.not_expr()?;
            (left, depth) = node(
                Expr::And(Box::new(left), Box::new(right)),
                1 + depth.max(right_depth),
            )?;
        }
        Ok((left, depth))
    }

    fn not_expr(&mut self) -> Result<Parsed> {
        if self.eat_ident("not") || self.eat_punct("!") {
            self.enter()?;
            let (inner, depth) = self.not_expr()?;
            self.leave();
            return node(Expr::Not(Box::new(inner)), depth + 1);
        }
        self.comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let followed_by_in = self.tokens.get(self.pos + 1).is_some_and(|t| t.is_ident("in"));
        let (op, width) = match self.peek()? {
            Token::Punct("==") => (CompareOp::Eq, 1),
            Token::Punct("!=") => (CompareOp::NotEq, 1),
            Token::Punct("<") => (CompareOp::Lt, 1),
            Token::Punct("<=") => (CompareOp::Le, 1),
            Token::Punct(">") => (CompareOp::Gt, 1),
            Token::Punct(">=") => (CompareOp::Ge, 1),
            Token::Ident(name) if name == "in" => (CompareOp::In, 1),
            Token::Ident(name) if name == "not" && followed_by_in => (CompareOp::NotIn, 2),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Parsed> {
        let (first, mut depth) = self.additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            let (operand, operand_depth) = self.additive()?;
            depth = depth.max(operand_depth);
            rest.push((op, operand));
        }
        if rest.is_empty() {
            Ok((first, depth))
        } else {
            node(Expr::Compare(Box::new(first), rest), depth + 1)
        }
    }

    fn additive(&mut self) -> Result<Parsed> {
        let (mut left, mut depth) = self.term()?;
        loop {
            let op = if self.eat_punct("+") {
                BinaryOp::Add
            } else if self.eat_punct("-") {
                BinaryOp::Sub
            } else {
                return Ok((left, depth));
            };
            let (right, right_depth) = self.term()?;
            (left, depth) = node(
                Expr::Binary(op, Box::new(left), Box::new(right)),
                1 + depth.max(right_depth),
            )?;
        }
    }

    fn term(&mut self) -> Result<Parsed> {
        let (mut left, mut depth) = self.unary()?;
        loop {
            let op = if self.eat_punct("*") {
                BinaryOp::Mul
            } else if self.eat_punct("//") {
                BinaryOp::FloorDiv
            } else if self.eat_punct("/") {
                BinaryOp::Div
            } else if self.eat_punct("%") {
                BinaryOp::Mod
            } else {
                return Ok((left, depth));
            };
            let (right, right_depth) = self.unary()?;
            (left, depth) = node(
                Expr::Binary(op, Box::new(left), Box::new(right)),
                1 + depth.max(right_depth),
            )?;
        }
    }

    fn unary(&mut self) -> Result<Parsed> {
        if self.eat_punct("-") {
            self.enter()?;
            let (inner, depth) = self.unary()?;
            self.leave();
            return node(Expr::Neg(Box::new(inner)), depth + 1);
        }
        if self.eat_punct("+") {
            self.enter()?;
            let parsed = self.unary()?;
            self.leave();
            return Ok(parsed);
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Parsed> {
        let (mut expr, mut depth) = self.primary()?;
        while self.eat_punct("[") {
            let (index, index_depth) = self.or_expr()?;
            self.expect_punct("]")?;
            (expr, depth) = node(
                Expr::Index(Box::new(expr), Box::new(index)),
                1 + depth.max(index_depth),
            )?;
        }
        Ok((expr, depth))
    }

    fn primary(&mut self) -> Result<Parsed> {
        let token = self
            .next()
            .ok_or_else(|| ParamError::syntax("unexpected end of expression"))?;
        match token {
            Token::Int(i) => Ok((Expr::Value(ParamValue::Int(i)), 1)),
            Token::Float(f) => Ok((Expr::Value(ParamValue::Float(f)), 1)),
            Token::Str(s) => Ok((Expr::Value(ParamValue::String(s)), 1)),
            Token::Value(v) => Ok((Expr::Value(v), 1)),
            Token::Punct("(") => {
                let inner = self.or_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let (items, depth) = self.sequence("]")?;
                node(Expr::List(items), depth + 1)
            }
            Token::Punct("{") => self.map_literal(),
            Token::Ident(name) => self.identifier(name),
            other => Err(ParamError::syntax(format!(
                "unexpected {} in expression",
                other.describe()
            ))),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Parsed> {
        match name.as_str() {
            "true" | "True" => return Ok((Expr::Value(ParamValue::Bool(true)), 1)),
            "false" | "False" => return Ok((Expr::Value(ParamValue::Bool(false)), 1)),
            "null" | "None" => return Ok((Expr::Value(ParamValue::Null), 1)),
            _ => {}
        }
        if self.eat_punct("(") {
            let (args, depth) = self.sequence(")")?;
            return node(Expr::Call(name, args), depth + 1);
        }
        Err(ParamError::syntax(format!("unknown name '{name}' in expression")))
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    /// Returns the items and the depth of the deepest one.
    fn sequence(&mut self, close: &str) -> Result<(Vec<Expr>, usize)> {
        let mut items = Vec::new();
        let mut depth = 0;
        while !self.eat_punct(close) {
            let (item, item_depth) = self.or_expr()?;
            items.push(item);
            depth = depth.max(item_depth);
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok((items, depth))
    }

    fn map_literal(&mut self) -> Result<Parsed> {
        let mut entries = Vec::new();
        let mut depth = 0;
        while !self.eat_punct("}") {
            let (key, key_depth) = self.or_expr()?;
            self.expect_punct(":")?;
            let (value, value_depth) = self.or_expr()?;
            entries.push((key, value));
            depth = depth.max(key_depth).max(value_depth);
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        node(Expr::Map(entries), depth + 1)
    }
}
