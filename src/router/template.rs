//! Route templates and their path matchers
//!
//! Templates use axum's path syntax: `{name}` captures exactly one non-empty
//! segment, `{*name}` captures the remainder of the path and must come last.

use axum::http::Method;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    Wildcard,
}

/// A registered route pattern such as `/items/{id}`
///
/// Immutable once parsed. `methods == None` matches any method.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    pattern: String,
    methods: Option<Vec<Method>>,
    segments: Vec<Segment>,
}

impl RouteTemplate {
    /// Parse a template that matches any method
    pub fn parse(pattern: &str) -> AppResult<Self> {
        Self::parse_with_methods(pattern, None)
    }

    /// Parse a template restricted to `methods` (`None` = any method)
    pub fn parse_with_methods(pattern: &str, methods: Option<Vec<Method>>) -> AppResult<Self> {
        let Some(rest) = pattern.strip_prefix('/') else {
            return Err(AppError::Config(format!(
                "Route template '{}' must start with '/'",
                pattern
            )));
        };

        let raw: Vec<&str> = rest.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());

        for (index, part) in raw.iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) if inner.starts_with('*') => {
                    if inner.len() == 1 {
                        return Err(AppError::Config(format!(
                            "Route template '{}' has an unnamed wildcard",
                            pattern
                        )));
                    }
                    if index != raw.len() - 1 {
                        return Err(AppError::Config(format!(
                            "Route template '{}': wildcard must be the last segment",
                            pattern
                        )));
                    }
                    Segment::Wildcard
                }
                Some("") => {
                    return Err(AppError::Config(format!(
                        "Route template '{}' has an unnamed parameter",
                        pattern
                    )));
                }
                Some(_) => Segment::Param,
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            pattern: pattern.to_string(),
            methods,
            segments,
        })
    }

    /// The template string used as the `route` label
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn methods(&self) -> Option<&[Method]> {
        self.methods.as_deref()
    }

    /// Full match of method and path
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(methods) = &self.methods
            && !methods.contains(method)
        {
            return false;
        }
        self.matches_path(path)
    }

    /// Full match of the path only
    pub fn matches_path(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix('/') else {
            return false;
        };
        let parts: Vec<&str> = rest.split('/').collect();

        let mut index = 0;
        for segment in &self.segments {
            match segment {
                Segment::Wildcard => {
                    // Remainder must be at least one non-empty segment
                    return parts.len() > index && !parts[index].is_empty();
                }
                Segment::Param => match parts.get(index) {
                    Some(part) if !part.is_empty() => {}
                    _ => return false,
                },
                Segment::Literal(literal) => match parts.get(index) {
                    Some(part) if part == literal => {}
                    _ => return false,
                },
            }
            index += 1;
        }

        index == parts.len()
    }
}
