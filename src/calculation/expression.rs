//! Formula expressions.
//!
//! Formulas are parsed once into an [`Expr`] tree and evaluated against a
//! variable lookup. Parsing exposes the referenced identifiers through
//! [`Expression::variables`], which feeds the dependency graph used to order
//! component evaluation.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! ternary    := or ( "?" ternary ":" ternary )?
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := comparison ( ( "==" | "!=" ) comparison )*
//! comparison := additive ( ( "<" | "<=" | ">" | ">=" ) additive )*
//! additive   := term ( ( "+" | "-" ) term )*
//! term       := unary ( ( "*" | "/" ) unary )*
//! unary      := ( "-" | "!" ) unary | primary
//! primary    := number | "true" | "false" | ident | call | "(" ternary ")"
//! call       := ( "if" | "min" | "max" | "abs" | "round" ) "(" args ")"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Maximum nesting of parentheses, calls, unary operators and conditionals.
pub const MAX_DEPTH: usize = 64;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The source text is not a valid expression.
    #[error("syntax error at offset {position}: {message}")]
    Syntax {
        /// Byte offset of the offending token.
        position: usize,
        /// What was wrong.
        message: String,
    },
    /// The expression nests deeper than [`MAX_DEPTH`].
    #[error("expression nests deeper than 64 levels")]
    TooDeep,
    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// An identifier has no value.
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    /// An operand has the wrong type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The type the operator needs.
        expected: &'static str,
        /// The type it got.
        found: &'static str,
    },
    /// Arithmetic overflowed the decimal range.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
    /// A function argument is out of range.
    #[error("invalid argument to {function}: {message}")]
    InvalidArgument {
        /// The function called.
        function: &'static str,
        /// What was wrong.
        message: String,
    },
}

impl ExpressionError {
    /// Returns true for errors found while parsing.
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. } | Self::TooDeep)
    }
}

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// A decimal number.
    Number(Decimal),
    /// A boolean.
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Bool(_) => "boolean",
        }
    }

    /// Returns the number, or a type mismatch.
    pub fn as_number(&self) -> Result<Decimal, ExpressionError> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(ExpressionError::TypeMismatch {
                expected: "number",
                found: other.type_name(),
            }),
        }
    }

    /// Returns the boolean, or a type mismatch.
    pub fn as_bool(&self) -> Result<bool, ExpressionError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(ExpressionError::TypeMismatch {
                expected: "boolean",
                found: other.type_name(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Smallest argument.
    Min,
    /// Largest argument.
    Max,
    /// Absolute value.
    Abs,
    /// `round(x, places)`, half away from zero.
    Round,
}

impl Function {
    fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Abs => "abs",
            Self::Round => "round",
        }
    }
}

/// A parsed expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A numeric literal.
    Number(Decimal),
    /// `true` or `false`.
    Bool(bool),
    /// A variable reference.
    Variable(String),
    /// A prefix operator.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// Its operand.
        operand: Box<Expr>,
    },
    /// An infix operator.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `cond ? a : b` or `if(cond, a, b)`.
    Conditional {
        /// The condition.
        condition: Box<Expr>,
        /// Value when true.
        then_branch: Box<Expr>,
        /// Value when false.
        else_branch: Box<Expr>,
    },
    /// A built-in function call.
    Call {
        /// The function.
        function: Function,
        /// Its arguments.
        args: Vec<Expr>,
    },
}

impl Expr {
    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) | Expr::Bool(_) => {}
            Expr::Variable(name) => {
                out.insert(name.clone());
            }
            Expr::Unary { operand, .. } => operand.collect_variables(out),
            Expr::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_variables(out);
                then_branch.collect_variables(out);
                else_branch.collect_variables(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }
}

/// A parsed formula together with its source text.
///
/// # Example
///
/// ```
/// use payroll_engine::calculation::expression::{Expression, Value};
/// use rust_decimal::Decimal;
/// use std::collections::BTreeMap;
///
/// let formula = Expression::parse("hours_worked > 160 ? (hours_worked - 160) * 1.5 : 0").unwrap();
/// let mut env = BTreeMap::new();
/// env.insert("hours_worked".to_string(), Value::Number(Decimal::from(170)));
///
/// assert_eq!(formula.evaluate(&env).unwrap(), Value::Number(Decimal::from(15)));
/// assert!(formula.variables().contains("hours_worked"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parses a formula.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_ternary()?;
        parser.expect_end()?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// The original formula text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed tree.
    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Every identifier the formula reads, sorted.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.root.collect_variables(&mut out);
        out
    }

    /// Evaluates against a map of variable values.
    pub fn evaluate(&self, env: &BTreeMap<String, Value>) -> Result<Value, ExpressionError> {
        self.evaluate_with(|name| env.get(name).copied())
    }

    /// Evaluates with a lookup function for variable values.
    ///
    /// `&&`, `||` and conditionals short-circuit, so an undefined variable
    /// on the branch not taken is not an error.
    pub fn evaluate_with<F>(&self, lookup: F) -> Result<Value, ExpressionError>
    where
        F: Fn(&str) -> Option<Value>,
    {
        eval(&self.root, &lookup)
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Result<Value, ExpressionError>
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Variable(name) => {
            lookup(name).ok_or_else(|| ExpressionError::UndefinedVariable(name.clone()))
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, lookup)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-value.as_number()?)),
                UnaryOp::Not => Ok(Value::Bool(!value.as_bool()?)),
            }
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, lookup),
        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            if eval(condition, lookup)?.as_bool()? {
                eval(then_branch, lookup)
            } else {
                eval(else_branch, lookup)
            }
        }
        Expr::Call { function, args } => eval_call(*function, args, lookup),
    }
}

fn eval_binary<F>(op: BinaryOp, left: &Expr, right: &Expr, lookup: &F) -> Result<Value, ExpressionError>
where
    F: Fn(&str) -> Option<Value>,
{
    match op {
        BinaryOp::And => {
            if !eval(left, lookup)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(right, lookup)?.as_bool()?))
        }
        BinaryOp::Or => {
            if eval(left, lookup)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(right, lookup)?.as_bool()?))
        }
        BinaryOp::Eq | BinaryOp::Neq => {
            let l = eval(left, lookup)?;
            let r = eval(right, lookup)?;
            let equal = match (l, r) {
                (Value::Number(a), Value::Number(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (a, b) => {
                    return Err(ExpressionError::TypeMismatch {
                        expected: a.type_name(),
                        found: b.type_name(),
                    });
                }
            };
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let a = eval(left, lookup)?.as_number()?;
            let b = eval(right, lookup)?.as_number()?;
            let ordering = a.cmp(&b);
            let holds = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Lte => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(holds))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let a = eval(left, lookup)?.as_number()?;
            let b = eval(right, lookup)?.as_number()?;
            let (result, operation) = match op {
                BinaryOp::Add => (a.checked_add(b), "addition"),
                BinaryOp::Sub => (a.checked_sub(b), "subtraction"),
                BinaryOp::Mul => (a.checked_mul(b), "multiplication"),
                _ => {
                    if b.is_zero() {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    (a.checked_div(b), "division")
                }
            };
            result
                .map(Value::Number)
                .ok_or(ExpressionError::Overflow(operation))
        }
    }
}

fn eval_call<F>(function: Function, args: &[Expr], lookup: &F) -> Result<Value, ExpressionError>
where
    F: Fn(&str) -> Option<Value>,
{
    let mut numbers = Vec::with_capacity(args.len());
    for arg in args {
        numbers.push(eval(arg, lookup)?.as_number()?);
    }
    match (function, numbers.as_slice()) {
        (Function::Min, [first, rest @ ..]) => {
            Ok(Value::Number(rest.iter().fold(*first, |acc, n| acc.min(*n))))
        }
        (Function::Max, [first, rest @ ..]) => {
            Ok(Value::Number(rest.iter().fold(*first, |acc, n| acc.max(*n))))
        }
        (Function::Abs, [x]) => Ok(Value::Number(x.abs())),
        (Function::Round, [x, places]) => {
            let dp = places
                .fract()
                .is_zero()
                .then(|| places.to_u32())
                .flatten()
                .filter(|dp| *dp <= 28)
                .ok_or_else(|| ExpressionError::InvalidArgument {
                    function: "round",
                    message: format!("places must be a whole number from 0 to 28, got {}", places),
                })?;
            Ok(Value::Number(
                x.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
            ))
        }
        (function, got) => Err(ExpressionError::InvalidArgument {
            function: function.name(),
            message: format!("unexpected argument count {}", got.len()),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Lte,
    Gt,
    Gte,
    EqEq,
    Neq,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    position: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let (position, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())) {
            let start = i;
            let mut seen_dot = false;
            while let Some(&(_, d)) = chars.get(i) {
                if d.is_ascii_digit() {
                    i += 1;
                } else if d == '.' && !seen_dot {
                    seen_dot = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let end = chars.get(i).map_or(src.len(), |(p, _)| *p);
            let text = &src[chars[start].0..end];
            let value = Decimal::from_str(text)
                .map_err(|_| syntax(position, format!("invalid number '{}'", text)))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                position,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while chars
                .get(i)
                .is_some_and(|(_, d)| d.is_ascii_alphanumeric() || *d == '_' || *d == '.')
            {
                i += 1;
            }
            let end = chars.get(i).map_or(src.len(), |(p, _)| *p);
            tokens.push(Spanned {
                token: Token::Ident(src[chars[start].0..end].to_string()),
                position,
            });
            continue;
        }

        let next = chars.get(i + 1).map(|(_, n)| *n);
        let (token, width) = match (c, next) {
            ('<', Some('=')) => (Token::Lte, 2),
            ('>', Some('=')) => (Token::Gte, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::Neq, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Bang, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('?', _) => (Token::Question, 1),
            (':', _) => (Token::Colon, 1),
            _ => return Err(syntax(position, format!("unexpected character '{}'", c))),
        };
        tokens.push(Spanned { token, position });
        i += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: src.len(),
    });
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map_or(&Token::Eof, |spanned| &spanned.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |spanned| spanned.position)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(syntax(self.position(), format!("expected {}", what)))
        }
    }

    fn expect_end(&self) -> Result<(), ExpressionError> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(syntax(self.position(), format!("unexpected {:?} after expression", other))),
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let condition = self.parse_or()?;
        let expr = if self.eat(&Token::Question) {
            let then_branch = self.parse_ternary()?;
            self.expect(&Token::Colon, "':' in conditional")?;
            let else_branch = self.parse_ternary()?;
            Expr::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            }
        } else {
            condition
        };
        self.leave();
        Ok(expr)
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ExpressionError>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr, ExpressionError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_binary_level(Self::parse_and, &[(Token::OrOr, BinaryOp::Or)])
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_binary_level(Self::parse_equality, &[(Token::AndAnd, BinaryOp::And)])
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_binary_level(
            Self::parse_comparison,
            &[(Token::EqEq, BinaryOp::Eq), (Token::Neq, BinaryOp::Neq)],
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_binary_level(
            Self::parse_additive,
            &[
                (Token::Lte, BinaryOp::Lte),
                (Token::Gte, BinaryOp::Gte),
                (Token::Lt, BinaryOp::Lt),
                (Token::Gt, BinaryOp::Gt),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_binary_level(
            Self::parse_term,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_binary_level(
            Self::parse_unary,
            &[(Token::Star, BinaryOp::Mul), (Token::Slash, BinaryOp::Div)],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::LParen => {
                let inner = self.parse_ternary()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    return self.parse_call(&name, position);
                }
                match name.as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    _ => Ok(Expr::Variable(name)),
                }
            }
            Token::Eof => Err(syntax(position, "unexpected end of expression")),
            other => Err(syntax(position, format!("unexpected {:?}", other))),
        }
    }

    fn parse_call(&mut self, name: &str, position: usize) -> Result<Expr, ExpressionError> {
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_ternary()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Comma, "',' or ')' in argument list")?;
            }
        }

        let arity_error = |expected: &str| {
            syntax(
                position,
                format!("{}() takes {}, got {}", name, expected, args.len()),
            )
        };
        match name {
            "if" => {
                if args.len() != 3 {
                    return Err(arity_error("3 arguments"));
                }
                let mut args = args.into_iter();
                match (args.next(), args.next(), args.next()) {
                    (Some(condition), Some(then_branch), Some(else_branch)) => Ok(Expr::Conditional {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    }),
                    _ => Err(syntax(position, "if() takes 3 arguments")),
                }
            }
            "min" | "max" => {
                if args.is_empty() {
                    return Err(arity_error("at least 1 argument"));
                }
                let function = if name == "min" { Function::Min } else { Function::Max };
                Ok(Expr::Call { function, args })
            }
            "abs" => {
                if args.len() != 1 {
                    return Err(arity_error("1 argument"));
                }
                Ok(Expr::Call {
                    function: Function::Abs,
                    args,
                })
            }
            "round" => {
                if args.len() != 2 {
                    return Err(arity_error("2 arguments"));
                }
                Ok(Expr::Call {
                    function: Function::Round,
                    args,
                })
            }
            other => Err(syntax(position, format!("unknown function '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn num(s: &str) -> Value {
        Value::Number(dec(s))
    }

    fn eval_str(source: &str, vars: &[(&str, &str)]) -> Result<Value, ExpressionError> {
        let env: BTreeMap<String, Value> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), num(v)))
            .collect();
        Expression::parse(source)?.evaluate(&env)
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval_str("2 + 3 * 4", &[]).unwrap(), num("14"));
        assert_eq!(eval_str("(2 + 3) * 4", &[]).unwrap(), num("20"));
        assert_eq!(eval_str("10 - 4 - 3", &[]).unwrap(), num("3"));
        assert_eq!(eval_str("24 / 4 / 2", &[]).unwrap(), num("3"));
        assert_eq!(eval_str("-2 * -3", &[]).unwrap(), num("6"));
    }

    #[test]
    fn test_decimal_literals_are_exact() {
        assert_eq!(eval_str("0.1 + 0.2", &[]).unwrap(), num("0.3"));
        assert_eq!(eval_str(".5 * 4", &[]).unwrap(), num("2.0"));
    }

    #[test]
    fn test_variables_with_dots() {
        let result = eval_str("allowance.meal * 2", &[("allowance.meal", "12.50")]).unwrap();
        assert_eq!(result, num("25.00"));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_str("1 < 2 && 2 <= 2", &[]).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("1 > 2 || 3 >= 4", &[]).unwrap(), Value::Bool(false));
        assert_eq!(eval_str("!(1 == 1)", &[]).unwrap(), Value::Bool(false));
        assert_eq!(eval_str("1 != 2", &[]).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("true == false", &[]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_ternary_and_if() {
        let vars = [("tenure_years", "6")];
        assert_eq!(eval_str("tenure_years >= 5 ? 200 : 0", &vars).unwrap(), num("200"));
        assert_eq!(eval_str("if(tenure_years < 5, 200, 0)", &vars).unwrap(), num("0"));
    }

    #[test]
    fn test_nested_ternary_is_right_associative() {
        let source = "x > 10 ? 3 : x > 5 ? 2 : 1";
        assert_eq!(eval_str(source, &[("x", "7")]).unwrap(), num("2"));
        assert_eq!(eval_str(source, &[("x", "1")]).unwrap(), num("1"));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_str("min(5, 2, 9)", &[]).unwrap(), num("2"));
        assert_eq!(eval_str("max(5, 2, 9)", &[]).unwrap(), num("9"));
        assert_eq!(eval_str("abs(-4.5)", &[]).unwrap(), num("4.5"));
        assert_eq!(eval_str("round(2.345, 2)", &[]).unwrap(), num("2.35"));
        assert_eq!(eval_str("round(-2.5, 0)", &[]).unwrap(), num("-3"));
    }

    #[test]
    fn test_round_rejects_fractional_places() {
        let err = eval_str("round(1, 1.5)", &[]).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidArgument { function: "round", .. }));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let err = eval_str("base_salary / hours_worked", &[("base_salary", "3000"), ("hours_worked", "0")])
            .unwrap_err();
        assert_eq!(err, ExpressionError::DivisionByZero);
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let err = eval_str("bonus + 1", &[]).unwrap_err();
        assert_eq!(err, ExpressionError::UndefinedVariable("bonus".to_string()));
    }

    #[test]
    fn test_short_circuit_skips_untaken_branch() {
        assert_eq!(eval_str("false && missing > 1", &[]).unwrap(), Value::Bool(false));
        assert_eq!(eval_str("true || missing > 1", &[]).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("1 < 2 ? 5 : missing", &[]).unwrap(), num("5"));
    }

    #[test]
    fn test_type_mismatch() {
        let err = eval_str("1 + true", &[]).unwrap_err();
        assert!(matches!(err, ExpressionError::TypeMismatch { expected: "number", .. }));
        let err = eval_str("1 ? 2 : 3", &[]).unwrap_err();
        assert!(matches!(err, ExpressionError::TypeMismatch { expected: "boolean", .. }));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = eval_str("79228162514264337593543950335 * 2", &[]).unwrap_err();
        assert_eq!(err, ExpressionError::Overflow("multiplication"));
    }

    #[test]
    fn test_syntax_errors() {
        for source in ["", "1 +", "(1 + 2", "1 2", "a ? b", "foo(1)", "1 # 2", "min()", "round(1)"] {
            let err = Expression::parse(source).unwrap_err();
            assert!(err.is_syntax(), "expected syntax error for {:?}, got {:?}", source, err);
        }
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(Expression::parse(&deep).unwrap_err(), ExpressionError::TooDeep);

        let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(Expression::parse(&shallow).is_ok());
    }

    #[test]
    fn test_variables_extraction() {
        let formula =
            Expression::parse("if(overtime_hours > 0, overtime_hours * hourly_rate * 1.5, min(bonus, 100))")
                .unwrap();
        let vars: Vec<String> = formula.variables().into_iter().collect();
        assert_eq!(vars, vec!["bonus", "hourly_rate", "overtime_hours"]);
    }

    #[test]
    fn test_function_names_are_not_variables() {
        let formula = Expression::parse("max(a, 0) + abs(b)").unwrap();
        let vars: Vec<String> = formula.variables().into_iter().collect();
        assert_eq!(vars, vec!["a", "b"]);
    }

    #[test]
    fn test_source_is_kept() {
        let formula = Expression::parse("base_salary * 0.1").unwrap();
        assert_eq!(formula.source(), "base_salary * 0.1");
    }
}
