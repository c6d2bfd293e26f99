//! Lexing of a single marker.
//!
//! The access path mixes free-form attribute names, quoted literals and
//! nested bracket scopes, so it is walked character by character with the
//! scope tracked explicitly. The small grammars inside a scope (bracket
//! tokens, formatter calls) are `nom` parsers.

use crate::error::MarkerError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag, take_till, take_till1},
    character::complete::{char, i64 as nom_i64, multispace0},
    combinator::{all_consuming, map, opt, recognize, rest, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, terminated},
};
use stencil_types::{Condition, FormatterArg, FormatterCall, IteratorSpec, NodePath, Operator};

/// One step of a marker's access path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    /// `name.`
    Object(String),
    /// `name[...]`, `name` is empty for chained brackets (`d[i][i]`).
    Array { name: String, bracket: Bracket },
    /// `..` / `...`: the number of levels to climb.
    Up(usize),
}

/// Parsed content of `[...]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Bracket {
    /// Tokens without insignificant whitespace, used to key lookup nodes.
    pub key: String,
    /// At least one token is an iterator (`i`, `sort`, `i+1`, `type++`).
    pub has_iterator: bool,
    /// A token carries a `+1`/`++` suffix.
    pub closing: bool,
    /// Iterators of the closing occurrence.
    pub iterators: Vec<IteratorSpec>,
    pub conditions: Vec<RawCondition>,
}

/// A condition before it is bound to the node it filters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawCondition {
    pub attr: String,
    pub operator: Operator,
    pub right: String,
}

impl RawCondition {
    pub fn bind(&self, parent: &NodePath) -> Condition {
        Condition {
            left_attr: self.attr.clone(),
            left_parent: parent.clone(),
            operator: self.operator,
            right: self.right.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Lexed {
    pub steps: Vec<Step>,
    pub attribute: String,
    pub formatters: Vec<FormatterCall>,
}

pub(crate) fn lex(marker: &str) -> Result<Lexed, MarkerError> {
    let chars: Vec<char> = marker.chars().collect();
    let mut lexed = Lexed::default();
    let mut word = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '[' => {
                let close = find_bracket_end(&chars, i + 1).ok_or_else(|| {
                    MarkerError::UnclosedBracket { marker: marker.to_string() }
                })?;
                let content: String = chars[i + 1..close].iter().collect();
                lexed.steps.push(Step::Array {
                    name: std::mem::take(&mut word),
                    bracket: parse_bracket(&content),
                });
                i = close + 1;
            }
            '.' => {
                let mut dots = 0;
                while i < chars.len() && chars[i] == '.' {
                    dots += 1;
                    i += 1;
                }
                if !word.is_empty() {
                    lexed.steps.push(Step::Object(std::mem::take(&mut word)));
                }
                if dots > 1 {
                    lexed.steps.push(Step::Up(dots - 1));
                }
            }
            ':' => {
                let rest: String = chars[i + 1..].iter().collect();
                lexed.formatters = parse_formatters(&rest, marker)?;
                break;
            }
            '(' | ')' => {
                return Err(MarkerError::UnexpectedParenthesis { marker: marker.to_string() });
            }
            ']' => return Err(MarkerError::UnclosedBracket { marker: marker.to_string() }),
            c if c.is_whitespace() => i += 1,
            c => {
                word.push(c);
                i += 1;
            }
        }
    }
    lexed.attribute = word;
    Ok(lexed)
}

fn find_bracket_end(chars: &[char], from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, &c) in chars[from..].iter().enumerate() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ']' => return Some(from + offset),
            None => {}
        }
    }
    None
}

/// Splits on commas outside quotes, dropping whitespace outside quotes.
fn split_tokens(content: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quote: Option<char> = None;
    for c in content.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                token.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                token.push(c);
            }
            None if c == ',' => tokens.push(std::mem::take(&mut token)),
            None if c.is_whitespace() => {}
            None => token.push(c),
        }
    }
    tokens.push(token);
    tokens.retain(|t| !t.is_empty());
    tokens
}

fn parse_bracket(content: &str) -> Bracket {
    let tokens = split_tokens(content);
    let mut bracket = Bracket {
        key: tokens.join(","),
        ..Default::default()
    };
    for token in tokens {
        if let Ok((_, condition)) = condition(&token) {
            bracket.conditions.push(condition);
            continue;
        }
        if direct_index(&token).is_ok() {
            // `[2]` is `[i=2]`
            bracket.conditions.push(RawCondition {
                attr: "i".to_string(),
                operator: Operator::Eq,
                right: token,
            });
            continue;
        }
        bracket.has_iterator = true;
        let Ok((_, (base, dynamic))) = closing_iterator(&token) else {
            continue;
        };
        bracket.closing = true;
        let (object, attribute) = match base.split_once('.') {
            Some((object, attribute)) => (Some(object.to_string()), attribute.to_string()),
            None => (None, base.to_string()),
        };
        bracket.iterators.push(IteratorSpec { object, attribute, dynamic });
    }
    bracket
}

fn operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::NotEq, tag("!=")),
        value(Operator::Gt, tag("&gt;")),
        value(Operator::Lt, tag("&lt;")),
        value(Operator::Eq, pair(tag("="), opt(tag("=")))),
        value(Operator::Gt, tag(">")),
        value(Operator::Lt, tag("<")),
    ))
    .parse(input)
}

/// `attr op right`, the right operand kept raw with its quotes.
fn condition(input: &str) -> IResult<&str, RawCondition> {
    map(
        (take_till1(|c: char| matches!(c, '!' | '&' | '=' | '<' | '>')), operator, rest),
        |(attr, operator, right): (&str, Operator, &str)| RawCondition {
            attr: attr.to_string(),
            operator,
            right: right.to_string(),
        },
    )
    .parse(input)
}

fn direct_index(input: &str) -> IResult<&str, i64> {
    all_consuming(nom_i64).parse(input)
}

/// `name+1` or `name++`, the token of a closing occurrence.
fn closing_iterator(input: &str) -> IResult<&str, (&str, bool)> {
    all_consuming(pair(
        take_till1(|c: char| c == '+'),
        alt((value(true, tag("++")), value(false, tag("+1")))),
    ))
    .parse(input)
}

/// A quoted formatter argument, quotes and `\'` escapes kept.
fn quoted(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('\''),
        many0(alt((tag("\\'"), is_not("\\'"), tag("\\")))),
        char('\''),
    ))
    .parse(input)
}

/// Whitespace outside quotes is insignificant.
fn argument(input: &str) -> IResult<&str, String> {
    delimited(
        multispace0,
        alt((
            map(quoted, str::to_string),
            map(take_till(|c: char| matches!(c, ',' | '(' | ')' | '\'')), |raw: &str| {
                raw.split_whitespace().collect()
            }),
        )),
        multispace0,
    )
    .parse(input)
}

/// `name` or `name(arg, ...)`.
fn formatter_call(input: &str) -> IResult<&str, (&str, Option<Vec<String>>)> {
    (
        terminated(take_till(|c: char| matches!(c, ':' | '(' | ')')), multispace0),
        opt(delimited(char('('), separated_list0(char(','), argument), char(')'))),
    )
        .parse(input)
}

fn parse_formatters(chain: &str, marker: &str) -> Result<Vec<FormatterCall>, MarkerError> {
    let mut calls = Vec::new();
    let mut input = chain;
    loop {
        let (after, (name, args)) =
            formatter_call(input).map_err(|_| call_error(input, marker))?;
        let mut args = args.unwrap_or_default();
        if args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        push_call(&mut calls, name.trim().to_string(), args);
        match after.strip_prefix(':') {
            Some(next) => input = next,
            None if after.trim().is_empty() => break,
            None => return Err(call_error(after, marker)),
        }
    }
    Ok(calls)
}

/// Names the syntax error of a formatter call that did not parse.
fn call_error(failed: &str, marker: &str) -> MarkerError {
    let marker = marker.to_string();
    let quotes = failed.matches('\'').count() - failed.matches("\\'").count();
    if quotes % 2 == 1 {
        MarkerError::UnclosedQuote { marker }
    } else if failed.starts_with('(') && !failed.contains(')') {
        MarkerError::UnclosedParenthesis { marker }
    } else {
        MarkerError::UnexpectedParenthesis { marker }
    }
}

fn push_call(calls: &mut Vec<FormatterCall>, name: String, args: Vec<String>) {
    if name.is_empty() {
        return;
    }
    calls.push(FormatterCall {
        name,
        args: args.iter().map(|raw| classify_arg(raw)).collect(),
    });
}

fn classify_arg(raw: &str) -> FormatterArg {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return FormatterArg::Literal(raw[1..raw.len() - 1].replace("\\'", "'"));
    }
    if raw.starts_with('.') {
        let dots = raw.chars().take_while(|&c| c == '.').count();
        return FormatterArg::Data {
            levels: dots - 1,
            path: raw[dots..].to_string(),
        };
    }
    FormatterArg::Literal(raw.to_string())
}
