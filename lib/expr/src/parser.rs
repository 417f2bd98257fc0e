//! Expression parser
//!
//! Precedence, lowest first:
//!
//! ```text
//! ternary     a ? b : c                (right-assoc)
//! or          ||  or
//! and         &&  and
//! equality    ==  !=
//! comparison  <  <=  >  >=
//! additive    +  -
//! term        *  /  %
//! unary       -  !  not                (prefix)
//! power       ^                        (right-assoc, binds tighter than unary on its left)
//! primary     literal | [list] | name(args) | name | ( expr )
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value, verify},
    error::{context, ContextError, ErrorKind, ParseError, VerboseError, VerboseErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ExprError, Result};

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

const KEYWORDS: &[&str] = &["true", "false", "null", "and", "or", "not"];

// ============================================================================
// Public API
// ============================================================================

/// Parse a complete expression
pub fn parse(input: &str) -> Result<Expr> {
    match all_consuming(delimited(multispace0, expression, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(syntax_error(input, e)),
        Err(nom::Err::Incomplete(_)) => Err(ExprError::Syntax {
            message: "incomplete expression".to_string(),
            position: input.len(),
        }),
    }
}

/// Report the error that got furthest into the input, preferring a
/// described expectation over a raw combinator kind at the same offset
fn syntax_error(input: &str, e: VerboseError<&str>) -> ExprError {
    let mut furthest: Option<&(&str, VerboseErrorKind)> = None;
    for entry in &e.errors {
        let better = match furthest {
            None => true,
            Some((rest, kind)) => {
                entry.0.len() < rest.len()
                    || (entry.0.len() == rest.len()
                        && matches!(entry.1, VerboseErrorKind::Context(_))
                        && !matches!(kind, VerboseErrorKind::Context(_)))
            }
        };
        if better {
            furthest = Some(entry);
        }
    }
    let Some((rest, kind)) = furthest else {
        return ExprError::Syntax {
            message: "invalid expression".to_string(),
            position: 0,
        };
    };

    let position = input.len() - rest.len();
    let near: String = rest.chars().take(16).collect();
    let expected = match kind {
        VerboseErrorKind::Context(what) => format!("expected {}", what),
        VerboseErrorKind::Char(c) => format!("expected '{}'", c),
        VerboseErrorKind::Nom(ErrorKind::Eof) => "unexpected trailing input".to_string(),
        VerboseErrorKind::Nom(_) => "unexpected input".to_string(),
    };
    let message = if near.is_empty() {
        format!("{} at end of expression", expected)
    } else {
        format!("{} near '{}'", expected, near)
    };
    ExprError::Syntax { message, position }
}

// ============================================================================
// Helpers
// ============================================================================

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A word that is not the prefix of a longer identifier
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    terminated(tag(word), not(satisfy(is_ident_char)))
}

/// Left-associative binary level. Once an operator is consumed an operand
/// must follow.
fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> PResult<'a, Expr>,
    operator: fn(&'a str) -> PResult<'a, BinaryOp>,
) -> PResult<'a, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(ws(operator), cut(operand)))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |lhs, (op, rhs)| Expr::binary(op, lhs, rhs));
    Ok((input, expr))
}

// ============================================================================
// Operators
// ============================================================================

fn expression(input: &str) -> PResult<'_, Expr> {
    ternary(input)
}

fn ternary(input: &str) -> PResult<'_, Expr> {
    let (input, cond) = or_expr(input)?;
    let (input, branches) = opt(tuple((
        ws(char('?')),
        cut(ternary),
        cut(context("':' in conditional", ws(char(':')))),
        cut(ternary),
    )))(input)?;

    let expr = match branches {
        Some((_, then, _, otherwise)) => Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
        None => cond,
    };
    Ok((input, expr))
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    binary_level(input, and_expr, |i| {
        value(BinaryOp::Or, alt((tag("||"), keyword("or"))))(i)
    })
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    binary_level(input, equality, |i| {
        value(BinaryOp::And, alt((tag("&&"), keyword("and"))))(i)
    })
}

fn equality(input: &str) -> PResult<'_, Expr> {
    binary_level(input, comparison, |i| {
        alt((value(BinaryOp::Eq, tag("==")), value(BinaryOp::Ne, tag("!="))))(i)
    })
}

fn comparison(input: &str) -> PResult<'_, Expr> {
    binary_level(input, additive, |i| {
        alt((
            value(BinaryOp::Le, tag("<=")),
            value(BinaryOp::Ge, tag(">=")),
            value(BinaryOp::Lt, tag("<")),
            value(BinaryOp::Gt, tag(">")),
        ))(i)
    })
}

fn additive(input: &str) -> PResult<'_, Expr> {
    binary_level(input, term, |i| {
        alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))))(i)
    })
}

fn term(input: &str) -> PResult<'_, Expr> {
    binary_level(input, unary, |i| {
        alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
            value(BinaryOp::Rem, char('%')),
        ))(i)
    })
}

fn unary_op(input: &str) -> PResult<'_, UnaryOp> {
    terminated(
        alt((
            value(UnaryOp::Neg, char('-')),
            value(UnaryOp::Not, terminated(char('!'), not(char('=')))),
            value(UnaryOp::Not, keyword("not")),
        )),
        multispace0,
    )(input)
}

/// Prefix operators are collected iteratively, then applied innermost first
fn unary(input: &str) -> PResult<'_, Expr> {
    let (input, ops) = many0(unary_op)(input)?;
    let (input, operand) = power(input)?;
    Ok((input, apply_prefix(ops, operand)))
}

/// `^` chains are collected as operand segments and folded from the right, so
/// `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)` and a prefix operator on an exponent covers
/// the rest of the chain.
fn power(input: &str) -> PResult<'_, Expr> {
    let (input, base) = primary(input)?;
    let (input, mut segments) =
        many0(preceded(ws(char('^')), cut(pair(many0(unary_op), primary))))(input)?;
    let Some((ops, last)) = segments.pop() else {
        return Ok((input, base));
    };
    let mut exponent = apply_prefix(ops, last);
    while let Some((ops, operand)) = segments.pop() {
        exponent = apply_prefix(ops, Expr::binary(BinaryOp::Pow, operand, exponent));
    }
    Ok((input, Expr::binary(BinaryOp::Pow, base, exponent)))
}

fn apply_prefix(ops: Vec<UnaryOp>, operand: Expr) -> Expr {
    ops.into_iter()
        .rev()
        .fold(operand, |expr, op| Expr::unary(op, expr))
}

// ============================================================================
// Primaries
// ============================================================================

fn primary(input: &str) -> PResult<'_, Expr> {
    context(
        "a value",
        alt((
            number,
            map(string_literal, |s| Expr::Literal(Value::String(s))),
            value(Expr::Literal(Value::Bool(true)), keyword("true")),
            value(Expr::Literal(Value::Bool(false)), keyword("false")),
            value(Expr::Literal(Value::Null), keyword("null")),
            list,
            call_or_ident,
            delimited(
                char('('),
                ws(expression),
                cut(context("closing ')'", char(')'))),
            ),
        )),
    )(input)
}

fn number(input: &str) -> PResult<'_, Expr> {
    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    if let Ok(n) = text.parse::<i64>() {
        return Ok((rest, Expr::Literal(Value::from(n))));
    }
    let parsed = text
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64);
    match parsed {
        Some(n) => Ok((rest, Expr::Literal(Value::Number(n)))),
        None => Err(nom::Err::Failure(VerboseError::add_context(
            input,
            "a finite number",
            VerboseError::from_error_kind(input, ErrorKind::Float),
        ))),
    }
}

fn string_literal(input: &str) -> PResult<'_, String> {
    alt((quoted('"'), quoted('\'')))(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> PResult<'a, String> {
    move |input: &'a str| {
        let (mut rest, _) = char(quote)(input)?;
        let mut out = String::new();
        loop {
            let mut chars = rest.chars();
            match chars.next() {
                None => {
                    return Err(nom::Err::Failure(VerboseError {
                        errors: vec![(rest, VerboseErrorKind::Context("closing quote"))],
                    }))
                }
                Some(c) if c == quote => return Ok((chars.as_str(), out)),
                Some('\\') => {
                    let unescaped = match chars.next() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some(c @ ('\\' | '"' | '\'')) => c,
                        _ => {
                            return Err(nom::Err::Failure(VerboseError {
                                errors: vec![(rest, VerboseErrorKind::Context("a valid escape"))],
                            }))
                        }
                    };
                    out.push(unescaped);
                }
                Some(c) => out.push(c),
            }
            rest = chars.as_str();
        }
    }
}

fn list(input: &str) -> PResult<'_, Expr> {
    map(
        delimited(
            pair(char('['), multispace0),
            separated_list0(char(','), ws(expression)),
            cut(context("closing ']'", char(']'))),
        ),
        Expr::List,
    )(input)
}

/// `name`, `a.b.0` or `name(args)`
fn identifier(input: &str) -> PResult<'_, &str> {
    verify(
        recognize(pair(
            pair(
                satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
                take_while(is_ident_char),
            ),
            many0(pair(char('.'), take_while1(is_ident_char))),
        )),
        |name: &str| !KEYWORDS.contains(&name),
    )(input)
}

fn call_or_ident(input: &str) -> PResult<'_, Expr> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(preceded(
        pair(multispace0, char('(')),
        cut(terminated(
            separated_list0(char(','), ws(expression)),
            preceded(multispace0, context("closing ')'", char(')'))),
        )),
    ))(input)?;

    let expr = match args {
        Some(args) => Expr::Call {
            name: name.to_string(),
            args,
        },
        None => Expr::Ident(name.to_string()),
    };
    Ok((input, expr))
}
