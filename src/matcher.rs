//! Request matching logic.
//!
//! A [`RequestMatcher`] from the configuration is compiled once into a
//! [`RequestPredicate`]; evaluating the predicate is pure and never fails.

use crate::config::{BodyMatcher, HeaderMatcher, PathMatcher, QueryMatcher, RequestMatcher};
use crate::error::StubError;
use crate::request::IncomingRequest;
use hyper::Method;
use regex::Regex;
use std::collections::HashMap;

/// Context captured during matching (for template variables).
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Path parameters extracted from template matching
    pub path_params: HashMap<String, String>,
    /// Query parameters
    pub query_params: HashMap<String, String>,
    /// Regex capture groups
    pub captures: HashMap<String, String>,
}

/// Compiled request predicate.
#[derive(Debug, Clone)]
pub struct RequestPredicate {
    source: RequestMatcher,
    /// Empty = any method
    methods: Vec<Method>,
    path: Option<CompiledPathMatcher>,
    query: Vec<(String, CompiledValueMatcher)>,
    headers: Vec<(String, CompiledValueMatcher)>,
    body: Option<CompiledBodyMatcher>,
}

#[derive(Debug, Clone)]
enum CompiledPathMatcher {
    Exact(String),
    Prefix(String),
    Regex(Regex),
    Glob(globset::GlobMatcher),
    Template(PathTemplate),
}

/// Query and header conditions share one shape.
#[derive(Debug, Clone)]
enum CompiledValueMatcher {
    Exact(String),
    Regex(Regex),
    Present,
    Absent,
    Contains(String),
}

#[derive(Debug, Clone)]
enum CompiledBodyMatcher {
    Exact(String),
    Regex(Regex),
    JsonPath(HashMap<String, serde_json::Value>),
    Contains(String),
    Json,
    Empty,
}

#[derive(Debug, Clone)]
struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

#[derive(Debug, Clone)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut in_param = false;
        let mut param_name = String::new();

        for ch in template.chars() {
            if ch == '{' && !in_param {
                if !current.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut current)));
                }
                in_param = true;
                param_name.clear();
            } else if ch == '}' && in_param {
                segments.push(TemplateSegment::Param(std::mem::take(&mut param_name)));
                in_param = false;
            } else if in_param {
                param_name.push(ch);
            } else {
                current.push(ch);
            }
        }

        if !current.is_empty() {
            segments.push(TemplateSegment::Literal(current));
        }

        Self { segments }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut remaining = path;

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                TemplateSegment::Literal(lit) => {
                    remaining = remaining.strip_prefix(lit.as_str())?;
                }
                TemplateSegment::Param(name) => {
                    // A parameter runs up to the following literal, or to the next slash
                    let end_pos = match self.segments.get(i + 1) {
                        Some(TemplateSegment::Literal(next_lit)) => {
                            remaining.find(next_lit.as_str()).unwrap_or(remaining.len())
                        }
                        _ => remaining.find('/').unwrap_or(remaining.len()),
                    };

                    if end_pos == 0 {
                        return None;
                    }

                    params.insert(name.clone(), remaining[..end_pos].to_string());
                    remaining = &remaining[end_pos..];
                }
            }
        }

        // Must consume entire path
        remaining.is_empty().then_some(params)
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, StubError> {
    Regex::new(pattern).map_err(|source| StubError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Path regexes must match the whole path.
fn compile_path_regex(pattern: &str) -> Result<Regex, StubError> {
    // The bare pattern must parse on its own, e.g. `)(` is rejected
    compile_regex(pattern)?;
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| StubError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn parse_method(method: &str) -> Result<Option<Method>, StubError> {
    let upper = method.trim().to_uppercase();
    if upper == "ANY" || upper == "*" {
        return Ok(None);
    }
    Method::from_bytes(upper.as_bytes())
        .map(Some)
        .map_err(|_| StubError::InvalidMethod(method.to_string()))
}

/// Evaluate a JSON path expression against a document.
fn find_json_path(
    json: &serde_json::Value,
    expression: &str,
) -> Result<serde_json::Value, String> {
    use jsonpath_rust::JsonPath;

    let path = JsonPath::try_from(expression).map_err(|e| e.to_string())?;
    Ok(path.find(json))
}

impl CompiledValueMatcher {
    fn from_query(matcher: &QueryMatcher) -> Result<Self, StubError> {
        Ok(match matcher {
            QueryMatcher::Exact { value } => Self::Exact(value.clone()),
            QueryMatcher::Regex { pattern } => Self::Regex(compile_regex(pattern)?),
            QueryMatcher::Present => Self::Present,
            QueryMatcher::Absent => Self::Absent,
        })
    }

    fn from_header(matcher: &HeaderMatcher) -> Result<Self, StubError> {
        Ok(match matcher {
            HeaderMatcher::Exact { value } => Self::Exact(value.clone()),
            HeaderMatcher::Regex { pattern } => Self::Regex(compile_regex(pattern)?),
            HeaderMatcher::Present => Self::Present,
            HeaderMatcher::Absent => Self::Absent,
            HeaderMatcher::Contains { value } => Self::Contains(value.clone()),
        })
    }

    fn matches(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (Self::Present, found) => found.is_some(),
            (Self::Absent, found) => found.is_none(),
            (Self::Exact(expected), Some(v)) => v == expected,
            (Self::Regex(regex), Some(v)) => regex.is_match(v),
            (Self::Contains(needle), Some(v)) => v.contains(needle.as_str()),
            (_, None) => false,
        }
    }
}

impl RequestPredicate {
    /// Compile a request matcher, validating every pattern it contains.
    pub fn compile(source: RequestMatcher) -> Result<Self, StubError> {
        let mut methods = Vec::new();
        for method in &source.method {
            match parse_method(method)? {
                Some(m) => methods.push(m),
                None => {
                    methods.clear();
                    break;
                }
            }
        }

        let path = match &source.path {
            None => None,
            Some(PathMatcher::Exact { value }) => Some(CompiledPathMatcher::Exact(value.clone())),
            Some(PathMatcher::Prefix { value }) => {
                Some(CompiledPathMatcher::Prefix(value.clone()))
            }
            Some(PathMatcher::Regex { pattern }) => {
                Some(CompiledPathMatcher::Regex(compile_path_regex(pattern)?))
            }
            Some(PathMatcher::Glob { pattern }) => {
                let glob = globset::Glob::new(pattern).map_err(|source| StubError::InvalidGlob {
                    pattern: pattern.clone(),
                    source,
                })?;
                Some(CompiledPathMatcher::Glob(glob.compile_matcher()))
            }
            Some(PathMatcher::Template { template }) => {
                Some(CompiledPathMatcher::Template(PathTemplate::parse(template)))
            }
        };

        let query = source
            .query
            .iter()
            .map(|(name, m)| Ok((name.clone(), CompiledValueMatcher::from_query(m)?)))
            .collect::<Result<Vec<_>, StubError>>()?;

        let headers = source
            .headers
            .iter()
            .map(|(name, m)| Ok((name.to_ascii_lowercase(), CompiledValueMatcher::from_header(m)?)))
            .collect::<Result<Vec<_>, StubError>>()?;

        let body = match &source.body {
            None => None,
            Some(BodyMatcher::Exact { value }) => Some(CompiledBodyMatcher::Exact(value.clone())),
            Some(BodyMatcher::Regex { pattern }) => {
                Some(CompiledBodyMatcher::Regex(compile_regex(pattern)?))
            }
            Some(BodyMatcher::JsonPath { expressions }) => {
                for expression in expressions.keys() {
                    find_json_path(&serde_json::Value::Null, expression).map_err(|message| {
                        StubError::InvalidJsonPath {
                            expression: expression.clone(),
                            message,
                        }
                    })?;
                }
                Some(CompiledBodyMatcher::JsonPath(expressions.clone()))
            }
            Some(BodyMatcher::Contains { value }) => {
                Some(CompiledBodyMatcher::Contains(value.clone()))
            }
            Some(BodyMatcher::Json) => Some(CompiledBodyMatcher::Json),
            Some(BodyMatcher::Empty) => Some(CompiledBodyMatcher::Empty),
        };

        Ok(Self {
            source,
            methods,
            path,
            query,
            headers,
            body,
        })
    }

    /// Method plus exact path.
    pub fn exact(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            source: RequestMatcher::new(method.as_str(), PathMatcher::exact(path.clone())),
            methods: vec![method],
            path: Some(CompiledPathMatcher::Exact(path)),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Method plus regex over the path.
    pub fn regex(method: Method, pattern: &str) -> Result<Self, StubError> {
        Self::compile(RequestMatcher::new(method.as_str(), PathMatcher::regex(pattern)))
    }

    /// The matcher this predicate was compiled from.
    pub fn source(&self) -> &RequestMatcher {
        &self.source
    }

    /// Whether the request satisfies every condition of this predicate.
    pub fn matches(&self, request: &IncomingRequest) -> bool {
        self.evaluate(request).is_some()
    }

    /// Match the request, capturing path parameters, regex groups, and query values.
    pub fn evaluate(&self, request: &IncomingRequest) -> Option<MatchContext> {
        let mut context = MatchContext::default();

        // Check method
        if !self.methods.is_empty() && !self.methods.contains(&request.method) {
            return None;
        }

        // Check path
        if let Some(path_matcher) = &self.path {
            if !matches_path(path_matcher, &request.path, &mut context) {
                return None;
            }
        }

        // Check query parameters
        context.query_params = request.query_params();
        for (name, qm) in &self.query {
            if !qm.matches(context.query_params.get(name).map(String::as_str)) {
                return None;
            }
        }

        // Check headers
        for (name, hm) in &self.headers {
            if !hm.matches(request.header(name)) {
                return None;
            }
        }

        // Check body
        if let Some(bm) = &self.body {
            if !matches_body(&request.body, bm) {
                return None;
            }
        }

        Some(context)
    }
}

fn matches_path(matcher: &CompiledPathMatcher, path: &str, context: &mut MatchContext) -> bool {
    match matcher {
        CompiledPathMatcher::Exact(value) => path == value,
        CompiledPathMatcher::Prefix(value) => path.starts_with(value.as_str()),
        CompiledPathMatcher::Regex(regex) => {
            let Some(captures) = regex.captures(path) else {
                return false;
            };
            for (i, cap) in captures.iter().enumerate().skip(1) {
                if let Some(m) = cap {
                    context.captures.insert(i.to_string(), m.as_str().to_string());
                }
            }
            for name in regex.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    context.captures.insert(name.to_string(), m.as_str().to_string());
                }
            }
            true
        }
        CompiledPathMatcher::Glob(glob) => glob.is_match(path),
        CompiledPathMatcher::Template(template) => match template.matches(path) {
            Some(params) => {
                context.path_params = params;
                true
            }
            None => false,
        },
    }
}

fn matches_body(body: &[u8], matcher: &CompiledBodyMatcher) -> bool {
    let body_str = std::str::from_utf8(body).ok();

    match matcher {
        CompiledBodyMatcher::Exact(value) => body_str == Some(value.as_str()),
        CompiledBodyMatcher::Regex(regex) => body_str.is_some_and(|bs| regex.is_match(bs)),
        CompiledBodyMatcher::JsonPath(expressions) => body_str
            .and_then(|bs| serde_json::from_str::<serde_json::Value>(bs).ok())
            .is_some_and(|json| matches_json_paths(&json, expressions)),
        CompiledBodyMatcher::Contains(value) => body_str.is_some_and(|bs| bs.contains(value.as_str())),
        CompiledBodyMatcher::Json => {
            body_str.is_some_and(|bs| serde_json::from_str::<serde_json::Value>(bs).is_ok())
        }
        CompiledBodyMatcher::Empty => body.is_empty(),
    }
}

fn matches_json_paths(
    json: &serde_json::Value,
    expressions: &HashMap<String, serde_json::Value>,
) -> bool {
    expressions.iter().all(|(expression, expected)| {
        let Ok(results) = find_json_path(json, expression) else {
            return false;
        };
        // A null expectation only asks for the path to resolve
        if expected.is_null() {
            !results.is_null()
        } else {
            results == *expected
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predicate(path: PathMatcher) -> RequestPredicate {
        RequestPredicate::compile(RequestMatcher {
            path: Some(path),
            ..RequestMatcher::default()
        })
        .unwrap()
    }

    fn get(path: &str) -> IncomingRequest {
        IncomingRequest::new(Method::GET, path)
    }

    #[test]
    fn test_exact_path_matching() {
        let p = RequestPredicate::exact(Method::GET, "/api/users");

        assert!(p.matches(&get("/api/users")));
        assert!(!p.matches(&get("/api/posts")));
        assert!(!p.matches(&get("/api/users/")));
        assert!(!p.matches(&IncomingRequest::new(Method::POST, "/api/users")));
    }

    #[test]
    fn test_prefix_path_matching() {
        let p = predicate(PathMatcher::Prefix {
            value: "/api/".to_string(),
        });

        assert!(p.matches(&get("/api/users")));
        assert!(p.matches(&get("/api/posts/123")));
        assert!(!p.matches(&get("/other")));
    }

    #[test]
    fn test_regex_path_matching() {
        let p = RequestPredicate::regex(Method::GET, r"^/orders/(?P<order>\d+)$").unwrap();

        let ctx = p.evaluate(&get("/orders/42")).unwrap();
        assert_eq!(ctx.captures.get("1"), Some(&"42".to_string()));
        assert_eq!(ctx.captures.get("order"), Some(&"42".to_string()));

        assert!(!p.matches(&get("/orders/abc")));
    }

    #[test]
    fn test_regex_path_must_match_whole_path() {
        let p = RequestPredicate::regex(Method::GET, "/test").unwrap();
        assert!(p.matches(&get("/test")));
        assert!(!p.matches(&get("/other/test/extra")));
        assert!(!p.matches(&get("/test/extra")));

        let p = RequestPredicate::regex(Method::GET, "/a|/b").unwrap();
        assert!(p.matches(&get("/b")));
        assert!(!p.matches(&get("/b/c")));

        let p = RequestPredicate::regex(Method::GET, "/api/(.*)").unwrap();
        let ctx = p.evaluate(&get("/api/users/7")).unwrap();
        assert_eq!(ctx.captures.get("1"), Some(&"users/7".to_string()));
    }

    #[test]
    fn test_invalid_regex() {
        let err = RequestPredicate::regex(Method::GET, "(").unwrap_err();
        assert!(matches!(err, StubError::InvalidRegex { .. }));
        let err = RequestPredicate::regex(Method::GET, ")(").unwrap_err();
        assert!(matches!(err, StubError::InvalidRegex { pattern, .. } if pattern == ")("));
    }

    #[test]
    fn test_glob_path_matching() {
        let p = predicate(PathMatcher::Glob {
            pattern: "/static/*.css".to_string(),
        });

        assert!(p.matches(&get("/static/site.css")));
        assert!(!p.matches(&get("/static/site.js")));
    }

    #[test]
    fn test_template_path_matching() {
        let p = predicate(PathMatcher::Template {
            template: "/users/{id}/posts/{post}".to_string(),
        });

        let ctx = p.evaluate(&get("/users/123/posts/7")).unwrap();
        assert_eq!(ctx.path_params.get("id"), Some(&"123".to_string()));
        assert_eq!(ctx.path_params.get("post"), Some(&"7".to_string()));

        assert!(!p.matches(&get("/users//posts/7")));
        assert!(!p.matches(&get("/users/123/posts/7/extra")));
    }

    #[test]
    fn test_method_matching() {
        let mut matcher = RequestMatcher::new("get", PathMatcher::exact("/api/users"));
        matcher.method.push("POST".to_string());
        let p = RequestPredicate::compile(matcher).unwrap();

        assert!(p.matches(&get("/api/users")));
        assert!(p.matches(&IncomingRequest::new(Method::POST, "/api/users")));
        assert!(!p.matches(&IncomingRequest::new(Method::DELETE, "/api/users")));
    }

    #[test]
    fn test_method_wildcard() {
        for wildcard in ["ANY", "*"] {
            let p = RequestPredicate::compile(RequestMatcher::new(
                wildcard,
                PathMatcher::exact("/x"),
            ))
            .unwrap();
            assert!(p.matches(&IncomingRequest::new(Method::PATCH, "/x")));
        }

        let p = predicate(PathMatcher::exact("/x"));
        assert!(p.matches(&IncomingRequest::new(Method::DELETE, "/x")));
    }

    #[test]
    fn test_invalid_method() {
        let err = RequestPredicate::compile(RequestMatcher::new("GE T", PathMatcher::exact("/")))
            .unwrap_err();
        assert!(matches!(err, StubError::InvalidMethod(_)));
    }

    #[test]
    fn test_query_matching() {
        let mut matcher = RequestMatcher::new("GET", PathMatcher::exact("/api/users"));
        matcher.query.insert(
            "page".to_string(),
            QueryMatcher::Exact {
                value: "1".to_string(),
            },
        );
        matcher.query.insert("debug".to_string(), QueryMatcher::Absent);
        let p = RequestPredicate::compile(matcher).unwrap();

        let ctx = p.evaluate(&get("/api/users").with_query("page=1")).unwrap();
        assert_eq!(ctx.query_params.get("page"), Some(&"1".to_string()));

        assert!(!p.matches(&get("/api/users").with_query("page=2")));
        assert!(!p.matches(&get("/api/users").with_query("page=1&debug")));
    }

    #[test]
    fn test_header_matching() {
        let mut matcher = RequestMatcher::new("GET", PathMatcher::exact("/api/users"));
        matcher
            .headers
            .insert("Authorization".to_string(), HeaderMatcher::Present);
        matcher.headers.insert(
            "accept".to_string(),
            HeaderMatcher::Contains {
                value: "json".to_string(),
            },
        );
        let p = RequestPredicate::compile(matcher).unwrap();

        let request = get("/api/users")
            .with_header("authorization", "Bearer token")
            .with_header("Accept", "application/json");
        assert!(p.matches(&request));

        assert!(!p.matches(&get("/api/users").with_header("Accept", "application/json")));
    }

    #[test]
    fn test_body_json_matching() {
        let mut matcher = RequestMatcher::new("POST", PathMatcher::exact("/api/users"));
        matcher.body = Some(BodyMatcher::Json);
        let p = RequestPredicate::compile(matcher).unwrap();

        let post = |body: &'static [u8]| {
            IncomingRequest::new(Method::POST, "/api/users").with_body(body)
        };
        assert!(p.matches(&post(br#"{"name": "John"}"#)));
        assert!(!p.matches(&post(b"not json")));
    }

    #[test]
    fn test_body_empty_and_contains() {
        let mut matcher = RequestMatcher::default();
        matcher.body = Some(BodyMatcher::Empty);
        let empty = RequestPredicate::compile(matcher).unwrap();
        assert!(empty.matches(&get("/")));
        assert!(!empty.matches(&get("/").with_body("x")));

        let mut matcher = RequestMatcher::default();
        matcher.body = Some(BodyMatcher::Contains {
            value: "needle".to_string(),
        });
        let contains = RequestPredicate::compile(matcher).unwrap();
        assert!(contains.matches(&get("/").with_body("hay needle hay")));
        assert!(!contains.matches(&get("/").with_body("hay")));
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let mut matcher = RequestMatcher::new("POST", PathMatcher::exact("/orders"));
        matcher.headers.insert(
            "content-type".to_string(),
            HeaderMatcher::Exact {
                value: "application/json".to_string(),
            },
        );
        matcher.body = Some(BodyMatcher::Regex {
            pattern: "\"qty\":\\s*\\d+".to_string(),
        });
        let p = RequestPredicate::compile(matcher).unwrap();

        let request = IncomingRequest::new(Method::POST, "/orders")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"qty": 3}"#);
        assert!(p.matches(&request));

        let wrong_type = request.clone().with_header("content-type", "text/plain");
        assert!(!p.matches(&wrong_type));
    }
}
