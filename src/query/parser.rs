//! Query Parser
//!
//! Parses query strings into the `Expr` AST.
//!
//! # Supported Syntax
//!
//! ```text
//! <number>                          1, -2.5, 1e3, Inf, NaN
//! name{label="v", other=~"re.*"}   instant vector selector
//! name[5m]                          range vector selector (ms s m h d w y)
//! rate(name[1m])                    function call
//! sum by (a, b) (expr)              aggregation, grouping before or after
//! a + b * c ^ d                     binary operators
//! a > bool 3                        comparison returning 0/1
//! ```
//!
//! Binary precedence, highest first: `^`, `* / %`, `+ -`,
//! `== != > < >= <=`, `and unless`, `or`. `^` is right associative.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, map_res, not, opt, recognize, value},
    multi::{many0, many1, separated_list0},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};
use crate::storage::{MatchOp, Matcher};

/// Parse a query string into an expression
pub fn parse_query(input: &str) -> QueryResult<Expr> {
    let input = input.trim();
    if input.is_empty() {
        return Err(QueryError::Parse("empty query".to_string()));
    }

    match expr(input) {
        Ok((remaining, expr)) => {
            if remaining.trim().is_empty() {
                Ok(expr)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after expression: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(QueryError::Parse(format!(
            "unexpected input at '{}'",
            e.input.chars().take(30).collect::<String>()
        ))),
        Err(nom::Err::Incomplete(_)) => Err(QueryError::Parse("incomplete query".to_string())),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Case-insensitive keyword not followed by an identifier character
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_ident_char)))
}

/// Top-level expression (lowest precedence)
fn expr(input: &str) -> IResult<&str, Expr> {
    or_expr(input)
}

/// Fold `operand (op operand)*` left-associatively
fn fold_binary(first: Expr, rest: Vec<(BinaryOp, bool, Expr)>) -> Expr {
    rest.into_iter()
        .fold(first, |lhs, (op, return_bool, rhs)| Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            return_bool,
        })
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(map(
        pair(
            preceded(multispace0, value(BinaryOp::Or, keyword("or"))),
            preceded(multispace0, and_expr),
        ),
        |(op, rhs)| (op, false, rhs),
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = comparison_expr(input)?;
    let (input, rest) = many0(map(
        pair(
            preceded(
                multispace0,
                alt((
                    value(BinaryOp::And, keyword("and")),
                    value(BinaryOp::Unless, keyword("unless")),
                )),
            ),
            preceded(multispace0, comparison_expr),
        ),
        |(op, rhs)| (op, false, rhs),
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Gte, tag(">=")),
        value(BinaryOp::Lte, tag("<=")),
        value(BinaryOp::Gt, tag(">")),
        value(BinaryOp::Lt, tag("<")),
    ))(input)
}

fn comparison_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = additive_expr(input)?;
    let (input, rest) = many0(map(
        tuple((
            preceded(multispace0, comparison_op),
            opt(preceded(multispace0, keyword("bool"))),
            preceded(multispace0, additive_expr),
        )),
        |(op, modifier, rhs)| (op, modifier.is_some(), rhs),
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn additive_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = multiplicative_expr(input)?;
    let (input, rest) = many0(map(
        pair(
            preceded(
                multispace0,
                alt((
                    value(BinaryOp::Add, char('+')),
                    value(BinaryOp::Sub, char('-')),
                )),
            ),
            preceded(multispace0, multiplicative_expr),
        ),
        |(op, rhs)| (op, false, rhs),
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary_expr(input)?;
    let (input, rest) = many0(map(
        pair(
            preceded(
                multispace0,
                alt((
                    value(BinaryOp::Mul, char('*')),
                    value(BinaryOp::Div, char('/')),
                    value(BinaryOp::Mod, char('%')),
                )),
            ),
            preceded(multispace0, unary_expr),
        ),
        |(op, rhs)| (op, false, rhs),
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

/// Unary sign binds looser than `^`, so `-2 ^ 2` is `-(2 ^ 2)`
fn unary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(pair(char('-'), multispace0), unary_expr), |e| match e {
            Expr::Number(n) => Expr::Number(-n),
            other => Expr::binary(BinaryOp::Sub, Expr::Number(0.0), other),
        }),
        preceded(pair(char('+'), multispace0), unary_expr),
        power_expr,
    ))(input)
}

fn power_expr(input: &str) -> IResult<&str, Expr> {
    let (input, base) = postfix_expr(input)?;
    let (input, exponent) = opt(preceded(
        tuple((multispace0, char('^'), multispace0)),
        unary_expr,
    ))(input)?;

    Ok(match exponent {
        Some(exponent) => (input, Expr::binary(BinaryOp::Pow, base, exponent)),
        None => (input, base),
    })
}

/// Primary expression with an optional `[range]` suffix
fn postfix_expr(input: &str) -> IResult<&str, Expr> {
    let (input, primary) = primary_expr(input)?;

    if let Expr::Selector(selector) = &primary {
        if let Ok((rest, range_ms)) = range_suffix(input) {
            return Ok((
                rest,
                Expr::Matrix(MatrixSelector {
                    selector: selector.clone(),
                    range_ms,
                }),
            ));
        }
    }

    Ok((input, primary))
}

fn range_suffix(input: &str) -> IResult<&str, i64> {
    delimited(
        pair(multispace0, char('[')),
        delimited(multispace0, duration, multispace0),
        char(']'),
    )(input)
}

fn primary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(
            pair(char('('), multispace0),
            expr,
            pair(multispace0, char(')')),
        ),
        map(number, Expr::Number),
        aggregate_expr,
        call_expr,
        map(vector_selector, Expr::Selector),
    ))(input)
}

/// Number literal: decimal, exponent, `Inf`, `NaN`
fn number(input: &str) -> IResult<&str, f64> {
    alt((
        value(f64::INFINITY, keyword("inf")),
        value(f64::NAN, keyword("nan")),
        map_res(
            terminated(recognize_float, not(satisfy(is_ident_char))),
            |s: &str| s.parse::<f64>(),
        ),
    ))(input)
}

/// Duration like `5m`, `1h30m`, `250ms`
pub(crate) fn duration(input: &str) -> IResult<&str, i64> {
    let unit = alt((
        value(1i64, tag("ms")),
        value(1000i64, tag("s")),
        value(60 * 1000i64, tag("m")),
        value(60 * 60 * 1000i64, tag("h")),
        value(24 * 60 * 60 * 1000i64, tag("d")),
        value(7 * 24 * 60 * 60 * 1000i64, tag("w")),
        value(365 * 24 * 60 * 60 * 1000i64, tag("y")),
    ));

    let (rest, parts) = many1(pair(map_res(digit1, |s: &str| s.parse::<i64>()), unit))(input)?;
    let total = parts
        .iter()
        .try_fold(0i64, |acc, (n, unit)| n.checked_mul(*unit)?.checked_add(acc));

    match total {
        Some(total) if total > 0 => Ok((rest, total)),
        // zero or too long to fit in milliseconds
        _ => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

/// Identifier for functions and labels
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Metric name (may contain ':')
fn metric_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(is_ident_char),
    ))(input)
}

fn grouping(input: &str) -> IResult<&str, Grouping> {
    let (input, by) = alt((value(true, keyword("by")), value(false, keyword("without"))))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, labels) = label_list(input)?;

    let labels = labels.into_iter().map(str::to_string).collect();
    Ok((
        input,
        if by {
            Grouping::By(labels)
        } else {
            Grouping::Without(labels)
        },
    ))
}

/// `(a, b, c)` with an optional trailing comma
fn label_list(input: &str) -> IResult<&str, Vec<&str>> {
    let (input, _) = pair(char('('), multispace0)(input)?;
    let (input, labels) = separated_list0(
        tuple((multispace0, char(','), multispace0)),
        identifier,
    )(input)?;
    let (input, _) = tuple((multispace0, opt(char(',')), multispace0, char(')')))(input)?;
    Ok((input, labels))
}

fn aggregate_expr(input: &str) -> IResult<&str, Expr> {
    let (input, op) = map_res(identifier, |name: &str| {
        AggregateOp::from_name(name).ok_or("not an aggregation")
    })(input)?;
    let (input, _) = multispace0(input)?;
    let (input, before) = opt(terminated(grouping, multispace0))(input)?;
    let (input, inner) = delimited(
        pair(char('('), multispace0),
        expr,
        pair(multispace0, char(')')),
    )(input)?;
    let (input, after) = if before.is_none() {
        opt(preceded(multispace0, grouping))(input)?
    } else {
        (input, None)
    };

    Ok((
        input,
        Expr::Aggregate {
            op,
            grouping: before.or(after),
            expr: Box::new(inner),
        },
    ))
}

fn call_expr(input: &str) -> IResult<&str, Expr> {
    let (input, func) = identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, args) = delimited(
        pair(char('('), multispace0),
        separated_list0(tuple((multispace0, char(','), multispace0)), expr),
        pair(multispace0, char(')')),
    )(input)?;

    Ok((
        input,
        Expr::Call {
            func: func.to_string(),
            args,
        },
    ))
}

fn vector_selector(input: &str) -> IResult<&str, VectorSelector> {
    let (input, name) = opt(metric_identifier)(input)?;
    let (input, matchers) = if name.is_some() {
        opt(preceded(multispace0, label_matchers))(input)?
    } else {
        map(label_matchers, Some)(input)?
    };

    let mut all = Vec::new();
    if let Some(name) = name {
        all.push(Matcher::metric_name(name));
    }
    all.extend(matchers.unwrap_or_default());

    // `{}` selects nothing
    if all.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((input, VectorSelector::new(all)))
}

fn label_matchers(input: &str) -> IResult<&str, Vec<Matcher>> {
    let (input, _) = pair(char('{'), multispace0)(input)?;
    let (input, matchers) = separated_list0(
        tuple((multispace0, char(','), multispace0)),
        label_matcher,
    )(input)?;
    let (input, _) = tuple((multispace0, opt(char(',')), multispace0, char('}')))(input)?;
    Ok((input, matchers))
}

fn label_matcher(input: &str) -> IResult<&str, Matcher> {
    let (input, name) = identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = alt((
        value(MatchOp::Regex, tag("=~")),
        value(MatchOp::NotRegex, tag("!~")),
        value(MatchOp::NotEqual, tag("!=")),
        value(MatchOp::Equal, tag("=")),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    let (rest, text) = string_literal(input)?;

    let matcher = Matcher::new(op, name, text).map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::MapRes))
    })?;
    Ok((rest, matcher))
}

/// Double- or single-quoted string with backslash escapes
fn string_literal(input: &str) -> IResult<&str, String> {
    let (input, quote) = alt((char('"'), char('\'')))(input)?;

    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((&input[idx + c.len_utf8()..], out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_name(expr: &Expr) -> Option<&str> {
        match expr {
            Expr::Selector(sel) => sel.metric_name(),
            Expr::Matrix(ms) => ms.selector.metric_name(),
            _ => None,
        }
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_query("42").unwrap(), Expr::Number(42.0));
        assert_eq!(parse_query("-2.5").unwrap(), Expr::Number(-2.5));
        assert_eq!(parse_query("1e3").unwrap(), Expr::Number(1000.0));
        assert_eq!(parse_query("Inf").unwrap(), Expr::Number(f64::INFINITY));
        assert!(matches!(parse_query("NaN").unwrap(), Expr::Number(n) if n.is_nan()));
    }

    #[test]
    fn test_parse_simple_selector() {
        let expr = parse_query("process_open_fds").unwrap();
        assert_eq!(selector_name(&expr), Some("process_open_fds"));
    }

    #[test]
    fn test_parse_selector_with_matchers() {
        let query = r#"requests_total{vhost="a", code!="500", path=~"/api/.*",}"#;
        let expr = parse_query(query).unwrap();
        let Expr::Selector(sel) = expr else {
            panic!("expected selector");
        };
        assert_eq!(sel.matchers.len(), 4);
        assert_eq!(sel.matchers[1], Matcher::equal("vhost", "a"));
        assert_eq!(sel.matchers[2].op, MatchOp::NotEqual);
        assert_eq!(sel.matchers[3].op, MatchOp::Regex);
    }

    #[test]
    fn test_parse_nameless_selector() {
        let expr = parse_query(r#"{__name__="up", job='api'}"#).unwrap();
        assert_eq!(selector_name(&expr), Some("up"));

        assert!(parse_query("{}").is_err());
    }

    #[test]
    fn test_parse_matrix_selector() {
        let expr = parse_query("requests_total{vhost=\"a\"}[1h30m]").unwrap();
        let Expr::Matrix(ms) = expr else {
            panic!("expected matrix selector");
        };
        assert_eq!(ms.range_ms, 5_400_000);
        assert_eq!(ms.selector.metric_name(), Some("requests_total"));
    }

    #[test]
    fn test_parse_rate_call() {
        let expr = parse_query("rate(galeb_http_requests_total[1m])").unwrap();
        let Expr::Call { func, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(func, "rate");
        assert_eq!(args.len(), 1);
        assert!(matches!(args[0], Expr::Matrix(MatrixSelector { range_ms: 60_000, .. })));
    }

    #[test]
    fn test_parse_aggregation_grouping_positions() {
        let after = parse_query("sum(rate(x[1m])) by (virtualhost)").unwrap();
        let before = parse_query("sum by (virtualhost) (rate(x[1m]))").unwrap();
        assert_eq!(after, before);

        let Expr::Aggregate { op, grouping, .. } = after else {
            panic!("expected aggregation");
        };
        assert_eq!(op, AggregateOp::Sum);
        assert_eq!(grouping, Some(Grouping::By(vec!["virtualhost".to_string()])));

        let expr = parse_query("count without (instance, job) (up)").unwrap();
        assert!(matches!(
            expr,
            Expr::Aggregate {
                op: AggregateOp::Count,
                grouping: Some(Grouping::Without(_)),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_query("1 + 2 * 3").unwrap();
        assert_eq!(expr.to_string(), "1 + (2 * 3)");

        let expr = parse_query("a - b - c").unwrap();
        assert_eq!(expr.to_string(), "(a - b) - c");

        let expr = parse_query("2 ^ 3 ^ 2").unwrap();
        assert_eq!(expr.to_string(), "2 ^ (3 ^ 2)");

        let expr = parse_query("a / b >= 0 and c or d").unwrap();
        assert_eq!(expr.to_string(), "(((a / b) >= 0) and c) or d");

        let expr = parse_query("-2 ^ 2").unwrap();
        assert_eq!(expr.to_string(), "0 - (2 ^ 2)");
    }

    #[test]
    fn test_parse_bool_modifier() {
        let expr = parse_query("up > bool 0").unwrap();
        assert!(matches!(expr, Expr::Binary { return_bool: true, op: BinaryOp::Gt, .. }));
    }

    #[test]
    fn test_keywords_need_boundaries() {
        // `or_metric` is not the `or` keyword
        assert!(parse_query("a or_metric").is_err());

        // Metric names that start with a keyword are still selectors

        let expr = parse_query("info_metric").unwrap();
        assert_eq!(selector_name(&expr), Some("info_metric"));

        let expr = parse_query("summary_total").unwrap();
        assert_eq!(selector_name(&expr), Some("summary_total"));
    }

    #[test]
    fn test_parse_memory_usage_query() {
        let expr = parse_query(r#"jvm_memory_bytes_used{area="heap"} / jvm_memory_bytes_max >= 0"#)
            .unwrap();
        let Expr::Binary { op, lhs, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Gte);
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Div, .. }));
    }

    #[test]
    fn test_display_round_trips() {
        for query in [
            "sum by (vhost) (rate(requests_total{code=~\"5..\"}[5m]))",
            "(a + b) * 2",
            "max without (pool) (jvm_memory_pool_bytes_used)",
            "x > bool 1",
        ] {
            let expr = parse_query(query).unwrap();
            assert_eq!(parse_query(&expr.to_string()).unwrap(), expr, "{}", query);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_query(""), Err(QueryError::Parse(_))));
        assert!(matches!(parse_query("sum("), Err(QueryError::Parse(_))));
        assert!(matches!(parse_query("x[5]"), Err(QueryError::Parse(_))));
        assert!(matches!(parse_query("x{a=~\"(\"}"), Err(QueryError::Parse(_))));
        assert!(matches!(parse_query("a +"), Err(QueryError::Parse(_))));
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(matches!(parse_query("x[9999999999999y]"), Err(QueryError::Parse(_))));
        assert!(matches!(
            parse_query("rate(x[9999999999999y])"),
            Err(QueryError::Parse(_))
        ));
        assert!(matches!(
            parse_query("x[200000000y200000000y]"),
            Err(QueryError::Parse(_))
        ));
        assert!(matches!(
            parse_query("x[99999999999999999999s]"),
            Err(QueryError::Parse(_))
        ));

        // long but representable
        assert!(parse_query("x[100y]").is_ok());
    }

    #[test]
    fn test_parse_compound_duration() {
        let (rest, ms) = duration("1h30m").unwrap();
        assert_eq!(rest, "");
        assert_eq!(ms, 90 * 60 * 1000);
    }
}
