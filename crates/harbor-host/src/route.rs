use std::collections::HashMap;

use crate::app::{CallKind, HandlerManifest, HttpMethod};
use crate::error::{HostError, HostResult};

/// A path pattern compiled into segments. Literal segments match exactly;
/// `:name` segments capture one path segment. Leading and trailing
/// slashes are insignificant.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl RoutePattern {
    pub fn compile(pattern: &str) -> HostResult<Self> {
        if !pattern.starts_with('/') {
            return Err(HostError::invalid(format!(
                "route pattern must start with '/': {pattern}"
            )));
        }
        let mut segments = vec![];
        for part in pattern.split('/').filter(|x| !x.is_empty()) {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(HostError::invalid(format!(
                        "invalid parameter segment ({part}) in route pattern: {pattern}"
                    )));
                }
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }
        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Captured parameters on a match, `None` otherwise.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|x| !x.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

#[derive(Debug, Clone)]
struct Route {
    handler: String,
    kind: CallKind,
    method: Option<HttpMethod>,
    pattern: RoutePattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub handler: String,
    pub kind: CallKind,
    pub params: HashMap<String, String>,
}

/// Routes of one application version, built once from its declared
/// handlers and shared by every worker of that version. Traffic never
/// triggers a rebuild.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compiles routes for the `http` and `websocket` handlers of the
    /// manifest, in declaration order. A handler without a declared route
    /// is served at `/<name>`.
    pub fn build(manifest: &HandlerManifest) -> HostResult<Self> {
        let mut routes = vec![];
        for handler in manifest.iter() {
            if !matches!(handler.kind, CallKind::Http | CallKind::WebSocket) {
                continue;
            }
            let pattern = match handler.route.as_deref() {
                Some(route) => RoutePattern::compile(route)?,
                None => RoutePattern::compile(&format!("/{}", handler.name))?,
            };
            routes.push(Route {
                handler: handler.name.clone(),
                kind: handler.kind,
                method: handler.method,
                pattern,
            });
        }
        Ok(Self { routes })
    }

    /// First declared match wins; declaration order is the only
    /// precedence rule.
    pub fn match_route(&self, kinds: &[CallKind], method: &str, path: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if !kinds.contains(&route.kind) {
                continue;
            }
            if let Some(expected) = &route.method {
                if !expected.matches(method) {
                    continue;
                }
            }
            if let Some(params) = route.pattern.matches(path) {
                return Some(RouteMatch {
                    handler: route.handler.clone(),
                    kind: route.kind,
                    params,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
