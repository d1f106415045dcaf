//! Directive syntax for response templates.
//!
//! A template is literal text interleaved with `{{ … }}` tags. Parsing turns
//! it into an ordered list of [`Node`]s that the template engine evaluates
//! left to right:
//!
//! ```text
//! {{request.body}}                              substitution
//! {{val request.body assign='current'}}         assignment
//! {{#assign 'patch'}}{"id": 1}{{/assign}}       block assignment
//! {{jsonMerge current patch}}                   right-biased JSON merge
//! {{formatJson merged format='compact'}}        JSON re-serialization
//! {{uuid}} {{now '%Y'}} {{random 1 6}}          helpers
//! {{default request.query.page '1'}}
//! {{upper request.method}} {{lower request.method}}
//! ```
//!
//! `{{! … }}` is a comment, `{{{ … }}}` is accepted as a synonym for
//! `{{ … }}`, and a `~` just inside the delimiters trims the whitespace on
//! that side of the tag.

use crate::error::TemplateError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Literal(String),
    Emit(Expr),
    Assign { name: String, expr: Expr },
    BlockAssign { name: String, body: Vec<Node> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Value(Operand),
    Merge(Operand, Operand),
    Format { value: Operand, style: FormatStyle },
    Helper { helper: Helper, args: Vec<Operand> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormatStyle {
    Compact,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Helper {
    Uuid,
    Now,
    Random,
    Default,
    Upper,
    Lower,
}

impl Helper {
    fn name(self) -> &'static str {
        match self {
            Helper::Uuid => "uuid",
            Helper::Now => "now",
            Helper::Random => "random",
            Helper::Default => "default",
            Helper::Upper => "upper",
            Helper::Lower => "lower",
        }
    }

    /// Accepted positional argument counts, inclusive.
    fn arity(self) -> (usize, usize) {
        match self {
            Helper::Uuid => (0, 0),
            Helper::Now => (0, 1),
            Helper::Random => (0, 2),
            Helper::Default => (2, 2),
            Helper::Upper | Helper::Lower => (1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    /// Dotted reference into the bindings or the request context
    Path(Vec<String>),
    Literal(Value),
}

impl Operand {
    /// Human-readable form used in error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Operand::Path(segments) => segments.join("."),
            Operand::Literal(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Hash(String, Box<Token>),
}

const BLOCK_ASSIGN: &str = "assign";

/// Parse a template into nodes.
pub(crate) fn parse(template: &str) -> Result<Vec<Node>, TemplateError> {
    // Enclosing blocks: (bound name, nodes collected before the block opened)
    let mut stack: Vec<(String, Vec<Node>)> = Vec::new();
    let mut current: Vec<Node> = Vec::new();
    let mut rest = template;
    let mut consumed = 0;
    let mut strip_next = false;

    while let Some(start) = rest.find("{{") {
        let triple = rest[start + 2..].starts_with('{');
        let (open_len, close) = if triple { (3, "}}}") } else { (2, "}}") };
        let inner_start = start + open_len;
        let end = find_close(&rest[inner_start..], close)
            .ok_or(TemplateError::Unterminated(consumed + start))?;

        let mut tag = &rest[inner_start..inner_start + end];
        let strip_before = tag.starts_with('~');
        if strip_before {
            tag = &tag[1..];
        }
        let strip_after = tag.ends_with('~');
        if strip_after {
            tag = &tag[..tag.len() - 1];
        }

        push_literal(&mut current, &rest[..start], strip_next, strip_before);
        strip_next = strip_after;

        let tag = tag.trim();
        if let Some(open) = tag.strip_prefix('#') {
            let name = parse_block_open(open)?;
            stack.push((name, std::mem::take(&mut current)));
        } else if let Some(closing) = tag.strip_prefix('/') {
            let closing = closing.trim();
            if closing != BLOCK_ASSIGN {
                return Err(TemplateError::UnexpectedClose(closing.to_string()));
            }
            let (name, parent) = stack
                .pop()
                .ok_or_else(|| TemplateError::UnexpectedClose(closing.to_string()))?;
            let body = std::mem::replace(&mut current, parent);
            current.push(Node::BlockAssign { name, body });
        } else if !tag.starts_with('!') {
            current.push(parse_expression(tag)?);
        }

        let advance = inner_start + end + close.len();
        consumed += advance;
        rest = &rest[advance..];
    }

    push_literal(&mut current, rest, strip_next, false);

    if !stack.is_empty() {
        return Err(TemplateError::UnterminatedBlock(BLOCK_ASSIGN.to_string()));
    }
    Ok(current)
}

/// Offset of the closing delimiter, skipping over quoted arguments.
///
/// Comments are free text and end at the first delimiter.
fn find_close(inner: &str, close: &str) -> Option<usize> {
    if inner.trim_start_matches('~').trim_start().starts_with('!') {
        return inner.find(close);
    }

    let mut quote = None;
    let mut escaped = false;
    for (i, c) in inner.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if inner[i..].starts_with(close) => return Some(i),
            None => {}
        }
    }
    None
}

fn push_literal(nodes: &mut Vec<Node>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        nodes.push(Node::Literal(text.to_string()));
    }
}

fn parse_block_open(open: &str) -> Result<String, TemplateError> {
    let tokens = tokenize(open)?;
    let mut tokens = tokens.into_iter();
    match tokens.next() {
        Some(Token::Word(helper)) if helper == BLOCK_ASSIGN => {}
        Some(Token::Word(helper)) => return Err(TemplateError::UnknownHelper(helper)),
        _ => return Err(TemplateError::arguments(BLOCK_ASSIGN, "missing block helper name")),
    }
    let name = match tokens.next() {
        Some(Token::Quoted(name)) | Some(Token::Word(name)) => name,
        _ => return Err(TemplateError::arguments(BLOCK_ASSIGN, "expected a variable name")),
    };
    if tokens.next().is_some() {
        return Err(TemplateError::arguments(BLOCK_ASSIGN, "takes exactly one argument"));
    }
    Ok(name)
}

fn parse_expression(tag: &str) -> Result<Node, TemplateError> {
    let tokens = tokenize(tag)?;

    let mut positional = Vec::new();
    let mut hash = Vec::new();
    for token in tokens {
        match token {
            Token::Hash(key, value) => hash.push((key, *value)),
            other => positional.push(other),
        }
    }

    let mut positional = positional.into_iter();
    let head = positional
        .next()
        .ok_or_else(|| TemplateError::arguments("", "empty directive"))?;
    let args: Vec<Operand> = positional.map(operand).collect();

    let assign = take_hash(&mut hash, "assign").map(hash_string);

    let expr = match head {
        Token::Quoted(text) if args.is_empty() => Expr::Value(Operand::Literal(Value::String(text))),
        Token::Word(word) => build_expr(&word, args, &mut hash)?,
        other => {
            return Err(TemplateError::arguments(
                "",
                format!("unexpected token {other:?} at the start of a directive"),
            ))
        }
    };

    if let Some((key, _)) = hash.first() {
        return Err(TemplateError::arguments("", format!("unknown option `{key}`")));
    }

    Ok(match assign {
        Some(name) => Node::Assign { name, expr },
        None => Node::Emit(expr),
    })
}

fn build_expr(
    head: &str,
    args: Vec<Operand>,
    hash: &mut Vec<(String, Token)>,
) -> Result<Expr, TemplateError> {
    let helper = match head {
        "val" => {
            let [value] = exactly::<1>(head, args)?;
            return Ok(match take_hash(hash, "default") {
                Some(fallback) => Expr::Helper {
                    helper: Helper::Default,
                    args: vec![value, operand(fallback)],
                },
                None => Expr::Value(value),
            });
        }
        "jsonMerge" => {
            let [left, right] = exactly::<2>(head, args)?;
            return Ok(Expr::Merge(left, right));
        }
        "formatJson" => {
            let [value] = exactly::<1>(head, args)?;
            let style = match take_hash(hash, "format").map(hash_string).as_deref() {
                None | Some("pretty") => FormatStyle::Pretty,
                Some("compact") => FormatStyle::Compact,
                Some(other) => {
                    return Err(TemplateError::arguments(
                        head,
                        format!("unknown format `{other}`"),
                    ))
                }
            };
            return Ok(Expr::Format { value, style });
        }
        "uuid" => Helper::Uuid,
        "now" => Helper::Now,
        "random" | "randomInt" => Helper::Random,
        "default" => Helper::Default,
        "upper" => Helper::Upper,
        "lower" => Helper::Lower,
        _ if args.is_empty() => {
            return Ok(Expr::Value(operand(Token::Word(head.to_string()))));
        }
        _ => return Err(TemplateError::UnknownHelper(head.to_string())),
    };

    let (min, max) = helper.arity();
    if args.len() < min || args.len() > max {
        return Err(TemplateError::arguments(
            helper.name(),
            format!("expected {min}..={max} argument(s), got {}", args.len()),
        ));
    }
    Ok(Expr::Helper { helper, args })
}

fn exactly<const N: usize>(head: &str, args: Vec<Operand>) -> Result<[Operand; N], TemplateError> {
    let got = args.len();
    args.try_into().map_err(|_| {
        TemplateError::arguments(head, format!("expected {N} argument(s), got {got}"))
    })
}

fn take_hash(hash: &mut Vec<(String, Token)>, key: &str) -> Option<Token> {
    let index = hash.iter().position(|(k, _)| k == key)?;
    Some(hash.remove(index).1)
}

fn hash_string(token: Token) -> String {
    match token {
        Token::Word(s) | Token::Quoted(s) => s,
        Token::Hash(key, _) => key,
    }
}

fn operand(token: Token) -> Operand {
    match token {
        Token::Quoted(text) => Operand::Literal(Value::String(text)),
        Token::Word(word) => match word.as_str() {
            "true" => Operand::Literal(Value::Bool(true)),
            "false" => Operand::Literal(Value::Bool(false)),
            "null" => Operand::Literal(Value::Null),
            _ => match number(&word) {
                Some(n) => Operand::Literal(n),
                None => Operand::Path(word.split('.').map(String::from).collect()),
            },
        },
        Token::Hash(key, value) => Operand::Path(vec![format!("{key}={}", hash_string(*value))]),
    }
}

fn number(word: &str) -> Option<Value> {
    if let Ok(i) = word.parse::<i64>() {
        return Some(Value::from(i));
    }
    let starts_numeric = word
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-');
    if starts_numeric {
        if let Ok(f) = word.parse::<f64>() {
            return serde_json::Number::from_f64(f).map(Value::Number);
        }
    }
    None
}

fn tokenize(input: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '\'' || c == '"' {
            chars.next();
            tokens.push(Token::Quoted(read_quoted(&mut chars, c)?));
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '=' {
                break;
            }
            word.push(c);
            chars.next();
        }

        if chars.peek() == Some(&'=') {
            chars.next();
            let value = match chars.peek() {
                Some(&q) if q == '\'' || q == '"' => {
                    chars.next();
                    Token::Quoted(read_quoted(&mut chars, q)?)
                }
                _ => {
                    let mut bare = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_whitespace() {
                            break;
                        }
                        bare.push(c);
                        chars.next();
                    }
                    if bare.is_empty() {
                        return Err(TemplateError::arguments(
                            "",
                            format!("option `{word}` has no value"),
                        ));
                    }
                    Token::Word(bare)
                }
            };
            tokens.push(Token::Hash(word, Box::new(value)));
        } else {
            tokens.push(Token::Word(word));
        }
    }

    Ok(tokens)
}

fn read_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    quote: char,
) -> Result<String, TemplateError> {
    let mut text = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => text.push(escaped),
                None => break,
            },
            c if c == quote => return Ok(text),
            c => text.push(c),
        }
    }
    Err(TemplateError::arguments("", format!("unterminated string `{quote}{text}`")))
}
