// src/expr/parser.rs

//! Nom parser for the small expression language used in if-parts,
//! auto-complete, manual-activation and repetition conditions.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or      := and ("||" and)*
//! and     := not ("&&" not)*
//! not     := "!" not | compare
//! compare := sum (("==" | "!=" | "<=" | ">=" | "<" | ">") sum)?
//! sum     := primary (("+" | "-") primary)*
//! primary := "(" or ")" | literal | path
//! ```

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, not, opt, peek, recognize, value},
    multi::{many0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use serde_json::{Number, Value};

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `a.b.c` lookup; the first segment names a variable.
    Path(Vec<String>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

/// Strip an optional `${...}` / `#{...}` wrapper and parse the rest.
pub fn parse_expression(source: &str) -> Result<Expr, String> {
    let body = unwrap_delimiters(source.trim());
    match all_consuming(delimited(multispace0, or_expr, multispace0))(body) {
        Ok((_, expr)) => Ok(expr),
        Err(err) => Err(format!("cannot parse expression '{source}': {err}")),
    }
}

fn unwrap_delimiters(source: &str) -> &str {
    for prefix in ["${", "#{"] {
        if let Some(rest) = source.strip_prefix(prefix) {
            if let Some(inner) = rest.strip_suffix('}') {
                return inner;
            }
        }
    }
    source
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn fold_binary(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(pair(value(BinOp::Or, ws(tag("||"))), and_expr))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(pair(value(BinOp::And, ws(tag("&&"))), not_expr))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn not_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(ws(terminated(char('!'), not(char('=')))), not_expr),
            |inner| Expr::Not(Box::new(inner)),
        ),
        compare_expr,
    ))(input)
}

fn compare_op(input: &str) -> IResult<&str, BinOp> {
    ws(alt((
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Lt, tag("<")),
        value(BinOp::Gt, tag(">")),
    )))(input)
}

fn compare_expr(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = sum_expr(input)?;
    let (input, rhs) = opt(pair(compare_op, sum_expr))(input)?;
    let expr = match rhs {
        Some((op, rhs)) => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        None => lhs,
    };
    Ok((input, expr))
}

fn sum_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = primary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((value(BinOp::Add, char('+')), value(BinOp::Sub, char('-'))))),
        primary,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        delimited(char('('), ws(or_expr), char(')')),
        literal,
        path,
    )))(input)
}

fn literal(input: &str) -> IResult<&str, Expr> {
    alt((
        map(keyword("true"), |_| Expr::Literal(Value::Bool(true))),
        map(keyword("false"), |_| Expr::Literal(Value::Bool(false))),
        map(keyword("null"), |_| Expr::Literal(Value::Null)),
        map(string_literal, |s| Expr::Literal(Value::String(s))),
        number_literal,
    ))(input)
}

/// A keyword that is not the prefix of a longer identifier.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), not(peek(take_while1(is_ident_char))))
}

fn string_literal(input: &str) -> IResult<&str, String> {
    alt((
        delimited(char('\''), quoted_body('\''), char('\'')),
        delimited(char('"'), quoted_body('"'), char('"')),
    ))(input)
}

/// Body of a quoted string; `\\` and an escaped quote are the only escapes.
fn quoted_body<'a>(quote: char) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    let stop: &'static str = if quote == '"' { "\\\"" } else { "\\'" };
    map(
        opt(escaped_transform(
            is_not(stop),
            '\\',
            alt((char('\\'), char(quote))),
        )),
        Option::unwrap_or_default,
    )
}

fn number_literal(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        peek(take_while1(|c: char| c.is_ascii_digit())),
        recognize_float,
    )))(input)?;
    let number = match text.parse::<i64>() {
        Ok(int) => Number::from(int),
        Err(_) => match text.parse::<f64>().ok().and_then(Number::from_f64) {
            Some(n) => n,
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Float,
                )));
            }
        },
    };
    Ok((rest, Expr::Literal(Value::Number(number))))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_char)))(input)
}

fn path(input: &str) -> IResult<&str, Expr> {
    map(separated_list1(char('.'), identifier), |segments| {
        Expr::Path(segments.into_iter().map(str::to_string).collect())
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Path(vec![name.to_string()]))
    }

    #[test]
    fn parses_wrapped_boolean_variable() {
        assert_eq!(parse_expression("${approved}").unwrap(), *var("approved"));
        assert_eq!(parse_expression("#{ approved }").unwrap(), *var("approved"));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_expression("a || b && c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Or,
                var("a"),
                Box::new(Expr::Binary(BinOp::And, var("b"), var("c")))
            )
        );
    }

    #[test]
    fn parses_comparisons_and_literals() {
        let expr = parse_expression("${amount >= 10.5 && status != 'done'}").unwrap();
        match expr {
            Expr::Binary(BinOp::And, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Binary(BinOp::Ge, _, _)));
                assert!(matches!(*rhs, Expr::Binary(BinOp::Ne, _, _)));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn negation_does_not_eat_not_equal() {
        let expr = parse_expression("!done").unwrap();
        assert_eq!(expr, Expr::Not(var("done")));
        assert!(matches!(
            parse_expression("a != b").unwrap(),
            Expr::Binary(BinOp::Ne, _, _)
        ));
    }

    #[test]
    fn keywords_do_not_swallow_identifiers() {
        assert_eq!(parse_expression("trueish").unwrap(), *var("trueish"));
        assert_eq!(
            parse_expression("order.customer.vip").unwrap(),
            Expr::Path(vec!["order".into(), "customer".into(), "vip".into()])
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_expression("a &&").is_err());
        assert!(parse_expression("${(a}").is_err());
    }
}
