//! Template engine for dynamic responses.
//!
//! Templates are parsed into directive nodes (see [`crate::directive`]) and
//! evaluated by a small tree-walking interpreter against a JSON view of the
//! request. Evaluation has no effects outside the bindings of the current
//! render call.

use crate::config::{ResponseBody, ResponseDefinition};
use crate::directive::{self, Expr, FormatStyle, Helper, Node, Operand};
use crate::error::{ResponseError, TemplateError};
use crate::matcher::MatchContext;
use crate::request::IncomingRequest;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Generate a random v4-format UUID string.
pub(crate) fn random_uuid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    )
}

/// Request data visible to templates.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// Request method
    pub method: String,
    /// Decoded request path
    pub path: String,
    /// Path plus raw query string
    pub url: String,
    /// Request headers, lower-case names
    pub headers: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Path parameters from URL template matching
    pub path_params: HashMap<String, String>,
    /// Regex capture groups
    pub captures: HashMap<String, String>,
    /// Request body (as string, if text)
    pub body: Option<String>,
    /// Request body as JSON (if parseable)
    pub json: Option<Value>,
}

impl TemplateContext {
    pub fn new(request: &IncomingRequest, match_ctx: &MatchContext) -> Self {
        let body = request.body_str().map(String::from);
        let json = body.as_deref().and_then(|s| serde_json::from_str(s).ok());

        Self {
            method: request.method.to_string(),
            path: request.path.clone(),
            url: request.url(),
            headers: request.headers.clone(),
            query: match_ctx.query_params.clone(),
            path_params: match_ctx.path_params.clone(),
            captures: match_ctx.captures.clone(),
            body,
            json,
        }
    }

    /// The root object templates resolve references against.
    fn to_value(&self) -> Value {
        let mut request = json!({
            "method": self.method,
            "path": self.path,
            "url": self.url,
            "headers": self.headers,
            "query": self.query,
            "pathParams": self.path_params,
            "captures": self.captures,
        });
        if let (Some(body), Some(fields)) = (&self.body, request.as_object_mut()) {
            fields.insert("body".to_string(), Value::String(body.clone()));
        }

        let mut root = Map::new();
        root.insert("request".to_string(), request);
        if let Some(json) = &self.json {
            root.insert("json".to_string(), json.clone());
        }
        Value::Object(root)
    }
}

/// Bindings and request view for one render call.
struct RenderContext {
    root: Value,
    bindings: HashMap<String, Value>,
}

impl RenderContext {
    fn new(ctx: &TemplateContext) -> Self {
        Self {
            root: ctx.to_value(),
            bindings: HashMap::new(),
        }
    }

    /// Resolve an operand; `None` when a path does not exist.
    fn lookup(&self, operand: &Operand) -> Option<Value> {
        let segments = match operand {
            Operand::Literal(value) => return Some(value.clone()),
            Operand::Path(segments) => segments,
        };
        let (first, rest) = segments.split_first()?;

        let mut current = match self.bindings.get(first) {
            Some(bound) => bound.clone(),
            None => self.root.get(first)?.clone(),
        };
        for segment in rest {
            current = descend(current, segment)?;
        }
        Some(current)
    }

    fn resolve(&self, operand: &Operand) -> Result<Value, TemplateError> {
        self.lookup(operand)
            .ok_or_else(|| TemplateError::MissingBinding(operand.describe()))
    }
}

/// Step into an object field or array index; strings holding JSON are parsed first.
fn descend(value: Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(mut map) => map
            .remove(segment)
            .or_else(|| map.remove(&segment.to_ascii_lowercase())),
        Value::Array(mut items) => {
            let index = segment.parse::<usize>().ok()?;
            (index < items.len()).then(|| items.swap_remove(index))
        }
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(text.trim()).ok()?;
            match parsed {
                Value::Object(_) | Value::Array(_) => descend(parsed, segment),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Interpret a value as JSON: strings are parsed, structured values pass through.
fn as_json(value: Value, operand: &Operand) -> Result<Value, TemplateError> {
    match value {
        Value::String(text) => {
            serde_json::from_str(text.trim()).map_err(|e| TemplateError::InvalidJson {
                binding: operand.describe(),
                message: e.to_string(),
            })
        }
        other => Ok(other),
    }
}

fn as_object(value: Value, operand: &Operand) -> Result<Map<String, Value>, TemplateError> {
    match as_json(value, operand)? {
        Value::Object(map) => Ok(map),
        other => Err(TemplateError::InvalidJson {
            binding: operand.describe(),
            message: format!("expected a JSON object, found {other}"),
        }),
    }
}

/// Shallow merge where keys of `right` replace keys of `left`.
pub fn merge_json(left: &Map<String, Value>, right: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = left.clone();
    for (key, value) in right {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(text) => out.push_str(text),
        other => out.push_str(&other.to_string()),
    }
}

fn display_string(value: &Value) -> String {
    let mut text = String::new();
    write_value(value, &mut text);
    text
}

/// Template engine for rendering dynamic responses.
///
/// Stateless: every render call parses its template and starts from an
/// empty set of bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        TemplateEngine
    }

    /// Render a template string with the given context.
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let nodes = directive::parse(template)?;
        let mut render_ctx = RenderContext::new(ctx);
        let mut out = String::with_capacity(template.len());
        self.render_nodes(&nodes, &mut render_ctx, &mut out)?;
        Ok(out)
    }

    /// Render a JSON value with templates in string fields.
    pub fn render_json(&self, json: &Value, ctx: &TemplateContext) -> Result<Value, TemplateError> {
        match json {
            Value::String(s) => {
                // Check if it contains template syntax
                if s.contains("{{") {
                    Ok(Value::String(self.render(s, ctx)?))
                } else {
                    Ok(json.clone())
                }
            }
            Value::Array(arr) => arr
                .iter()
                .map(|v| self.render_json(v, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(obj) => {
                let mut rendered = Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json(v, ctx)?);
                }
                Ok(Value::Object(rendered))
            }
            _ => Ok(json.clone()),
        }
    }

    /// Produce the body bytes of a response for the given request.
    ///
    /// Bodies of non-template responses are emitted unchanged.
    pub fn render_body(
        &self,
        response: &ResponseDefinition,
        request: &IncomingRequest,
        match_ctx: &MatchContext,
    ) -> Result<Option<Vec<u8>>, ResponseError> {
        let Some(body) = &response.body else {
            return Ok(None);
        };
        if !response.template {
            return Ok(Some(body.to_bytes()?));
        }

        let ctx = TemplateContext::new(request, match_ctx);
        let bytes = match body {
            ResponseBody::Text { content } => self.render(content, &ctx)?.into_bytes(),
            ResponseBody::Json { content } => serde_json::to_vec(&self.render_json(content, &ctx)?)?,
            other => other.to_bytes()?,
        };
        Ok(Some(bytes))
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        ctx: &mut RenderContext,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Literal(text) => out.push_str(text),
                Node::Emit(expr) => {
                    let value = self.evaluate(expr, ctx)?;
                    write_value(&value, out);
                }
                Node::Assign { name, expr } => {
                    let value = self.evaluate(expr, ctx)?;
                    ctx.bindings.insert(name.clone(), value);
                }
                Node::BlockAssign { name, body } => {
                    let mut captured = String::new();
                    self.render_nodes(body, ctx, &mut captured)?;
                    ctx.bindings.insert(name.clone(), Value::String(captured));
                }
            }
        }
        Ok(())
    }

    fn evaluate(&self, expr: &Expr, ctx: &RenderContext) -> Result<Value, TemplateError> {
        match expr {
            Expr::Value(operand) => ctx.resolve(operand),
            Expr::Merge(left, right) => {
                let l = as_object(ctx.resolve(left)?, left)?;
                let r = as_object(ctx.resolve(right)?, right)?;
                Ok(Value::Object(merge_json(&l, &r)))
            }
            Expr::Format { value, style } => {
                let json = as_json(ctx.resolve(value)?, value)?;
                let formatted = match style {
                    FormatStyle::Compact => serde_json::to_string(&json),
                    FormatStyle::Pretty => serde_json::to_string_pretty(&json),
                };
                formatted
                    .map(Value::String)
                    .map_err(|e| TemplateError::InvalidJson {
                        binding: value.describe(),
                        message: e.to_string(),
                    })
            }
            Expr::Helper { helper, args } => self.call_helper(*helper, args, ctx),
        }
    }

    fn call_helper(
        &self,
        helper: Helper,
        args: &[Operand],
        ctx: &RenderContext,
    ) -> Result<Value, TemplateError> {
        match helper {
            Helper::Uuid => Ok(Value::String(random_uuid())),
            Helper::Now => {
                let format = match args.first() {
                    Some(arg) => display_string(&ctx.resolve(arg)?),
                    None => "%Y-%m-%dT%H:%M:%S%.3fZ".to_string(),
                };
                let mut rendered = String::new();
                write!(rendered, "{}", chrono::Utc::now().format(&format))
                    .map_err(|_| TemplateError::arguments("now", format!("invalid format `{format}`")))?;
                Ok(Value::String(rendered))
            }
            Helper::Random => {
                let bound = |index: usize, fallback: i64| -> Result<i64, TemplateError> {
                    match args.get(index) {
                        None => Ok(fallback),
                        Some(arg) => ctx.resolve(arg)?.as_i64().ok_or_else(|| {
                            TemplateError::arguments("random", "bounds must be integers")
                        }),
                    }
                };
                let min = bound(0, 0)?;
                let max = bound(1, 100)?;
                if min > max {
                    return Err(TemplateError::arguments(
                        "random",
                        format!("empty range {min}..={max}"),
                    ));
                }
                use rand::Rng;
                Ok(Value::from(rand::thread_rng().gen_range(min..=max)))
            }
            Helper::Default => {
                let (value, fallback) = match args {
                    [value, fallback] => (value, fallback),
                    _ => return Err(TemplateError::arguments("default", "expected 2 arguments")),
                };
                match ctx.lookup(value) {
                    Some(Value::Null) | None => ctx.resolve(fallback),
                    Some(Value::String(s)) if s.is_empty() => ctx.resolve(fallback),
                    Some(found) => Ok(found),
                }
            }
            Helper::Upper | Helper::Lower => {
                let arg = args
                    .first()
                    .ok_or_else(|| TemplateError::arguments("upper", "expected 1 argument"))?;
                let text = display_string(&ctx.resolve(arg)?);
                Ok(Value::String(if helper == Helper::Upper {
                    text.to_uppercase()
                } else {
                    text.to_lowercase()
                }))
            }
        }
    }
}
