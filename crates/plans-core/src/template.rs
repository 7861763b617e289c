//! A small template language for human invoice numbers.
//!
//! Supported syntax:
//!
//! - `{{ invoice.number }}`: variable substitution,
//! - `{{ invoice.issued|date:"m/Y" }}`: date formatting (`d j m n Y y`, `\` escapes),
//! - `{% if a == b %}…{% else %}…{% endif %}` with `==`, `!=` or a bare truthy operand,
//! - `{% ifequal a b %}…{% else %}…{% endifequal %}`.
//!
//! Operands are variable paths or quoted string literals. Unknown variables render as
//! an empty string.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{Datelike, NaiveDate};

use crate::error::{PlansError, Result};

/// A value available to templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    /// Text.
    Str(String),
    /// Integer.
    Int(i64),
    /// Calendar date.
    Date(NaiveDate),
}

impl TemplateValue {
    fn as_text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Variables available while rendering, keyed by dotted path.
pub type TemplateContext = BTreeMap<String, TemplateValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Var(String),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Truthy(Operand),
    Eq(Operand, Operand),
    Ne(Operand, Operand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Var { path: String, date_format: Option<String> },
    If { condition: Condition, then: Vec<Node>, otherwise: Vec<Node> },
}

enum Token {
    Text(String),
    Var(String),
    Tag(String),
}

/// A parsed invoice number template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberTemplate {
    source: String,
    nodes: Vec<Node>,
}

impl NumberTemplate {
    /// Parse `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::Template`] on unbalanced tags or unknown syntax.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut iter = tokens.into_iter();
        let (nodes, end) = parse_block(&mut iter)?;
        if let Some(tag) = end {
            return Err(PlansError::Template(format!("unexpected {{% {tag} %}}")));
        }
        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    /// The template text this was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render with `ctx`.
    #[must_use]
    pub fn render(&self, ctx: &TemplateContext) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, ctx, &mut out);
        out
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while !rest.is_empty() {
        let next_var = rest.find("{{");
        let next_tag = rest.find("{%");
        let start = match (next_var, next_tag) {
            (Some(v), Some(t)) => v.min(t),
            (Some(v), None) => v,
            (None, Some(t)) => t,
            (None, None) => {
                tokens.push(Token::Text(rest.to_string()));
                break;
            }
        };
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let is_var = rest[start..].starts_with("{{");
        let close = if is_var { "}}" } else { "%}" };
        let body_start = start + 2;
        let Some(len) = rest[body_start..].find(close) else {
            return Err(PlansError::Template(format!("unclosed {}", &rest[start..])));
        };
        let body = rest[body_start..body_start + len].trim().to_string();
        tokens.push(if is_var {
            Token::Var(body)
        } else {
            Token::Tag(body)
        });
        rest = &rest[body_start + len + 2..];
    }
    Ok(tokens)
}

/// Parse nodes until an `else`/`endif`-style tag, which is returned.
fn parse_block(tokens: &mut impl Iterator<Item = Token>) -> Result<(Vec<Node>, Option<String>)> {
    let mut nodes = Vec::new();
    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) => nodes.push(Node::Text(text)),
            Token::Var(body) => nodes.push(parse_var(&body)?),
            Token::Tag(body) => {
                let words = split_words(&body);
                match words.first().map(String::as_str) {
                    Some("if" | "ifequal") => nodes.push(parse_if(&words, tokens)?),
                    Some("else" | "endif" | "endifequal") => return Ok((nodes, Some(body))),
                    _ => return Err(PlansError::Template(format!("unknown tag {{% {body} %}}"))),
                }
            }
        }
    }
    Ok((nodes, None))
}

fn parse_if(words: &[String], tokens: &mut impl Iterator<Item = Token>) -> Result<Node> {
    let condition = if words[0] == "ifequal" {
        match words {
            [_, a, b] => Condition::Eq(operand(a), operand(b)),
            _ => return Err(PlansError::Template("ifequal takes two operands".into())),
        }
    } else {
        match words {
            [_, a] => Condition::Truthy(operand(a)),
            [_, a, op, b] if op == "==" => Condition::Eq(operand(a), operand(b)),
            [_, a, op, b] if op == "!=" => Condition::Ne(operand(a), operand(b)),
            _ => return Err(PlansError::Template(format!("bad condition: {}", words.join(" ")))),
        }
    };
    let end_tag = if words[0] == "ifequal" { "endifequal" } else { "endif" };

    let (then, end) = parse_block(tokens)?;
    let otherwise = match end.as_deref() {
        Some("else") => {
            let (otherwise, end) = parse_block(tokens)?;
            if end.as_deref() != Some(end_tag) {
                return Err(PlansError::Template(format!("missing {{% {end_tag} %}}")));
            }
            otherwise
        }
        Some(tag) if tag == end_tag => Vec::new(),
        _ => return Err(PlansError::Template(format!("missing {{% {end_tag} %}}"))),
    };
    Ok(Node::If {
        condition,
        then,
        otherwise,
    })
}

fn parse_var(body: &str) -> Result<Node> {
    let mut parts = body.splitn(2, '|');
    let path = parts.next().unwrap_or_default().trim().to_string();
    let date_format = match parts.next().map(str::trim) {
        None => None,
        Some(filter) => {
            let Some(arg) = filter.strip_prefix("date:") else {
                return Err(PlansError::Template(format!("unknown filter: {filter}")));
            };
            Some(unquote(arg.trim()).unwrap_or(arg.trim()).to_string())
        }
    };
    Ok(Node::Var { path, date_format })
}

/// Split a tag body on whitespace, keeping quoted strings together.
fn split_words(body: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in body.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                current.push(c);
                quote = None;
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                current.push(c);
                quote = Some(c);
            }
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            (None, c) => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn unquote(word: &str) -> Option<&str> {
    word.strip_prefix('"')
        .and_then(|w| w.strip_suffix('"'))
        .or_else(|| word.strip_prefix('\'').and_then(|w| w.strip_suffix('\'')))
}

fn operand(word: &str) -> Operand {
    unquote(word).map_or_else(
        || Operand::Var(word.to_string()),
        |literal| Operand::Literal(literal.to_string()),
    )
}

fn resolve(operand: &Operand, ctx: &TemplateContext) -> String {
    match operand {
        Operand::Literal(s) => s.clone(),
        Operand::Var(path) => ctx.get(path).map(TemplateValue::as_text).unwrap_or_default(),
    }
}

fn render_nodes(nodes: &[Node], ctx: &TemplateContext, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { path, date_format } => match (ctx.get(path), date_format) {
                (Some(TemplateValue::Date(date)), Some(format)) => {
                    out.push_str(&format_date(*date, format));
                }
                (Some(_), Some(_)) | (None, _) => {}
                (Some(value), None) => out.push_str(&value.as_text()),
            },
            Node::If {
                condition,
                then,
                otherwise,
            } => {
                let holds = match condition {
                    Condition::Truthy(a) => {
                        let value = resolve(a, ctx);
                        !value.is_empty() && value != "0"
                    }
                    Condition::Eq(a, b) => resolve(a, ctx) == resolve(b, ctx),
                    Condition::Ne(a, b) => resolve(a, ctx) != resolve(b, ctx),
                };
                render_nodes(if holds { then } else { otherwise }, ctx, out);
            }
        }
    }
}

/// Format `date` with Django-style format characters.
fn format_date(date: NaiveDate, format: &str) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        // Writing to a String cannot fail.
        let _ = match c {
            'd' => write!(out, "{:02}", date.day()),
            'j' => write!(out, "{}", date.day()),
            'm' => write!(out, "{:02}", date.month()),
            'n' => write!(out, "{}", date.month()),
            'Y' => write!(out, "{}", date.year()),
            'y' => write!(out, "{:02}", date.year().rem_euclid(100)),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
                Ok(())
            }
            other => {
                out.push(other);
                Ok(())
            }
        };
    }
    out
}
