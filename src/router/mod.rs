//! Route template resolution
//!
//! Maps a concrete request (method + path) to the template it was registered
//! under, so request metrics are labeled `/items/{id}` rather than
//! `/items/1`, `/items/2`, ...

pub mod collapse;
pub mod template;

pub use collapse::{CollapseRule, Collapsed};
pub use template::RouteTemplate;

use std::collections::HashMap;
use std::sync::RwLock;

use axum::Router;
use axum::http::Method;
use axum::routing::MethodRouter;

use crate::error::AppResult;

/// Default number of distinct (method, path) pairs remembered by the resolver
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Ordered list of registered route templates
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteTemplate>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a template matching any method
    pub fn route(mut self, pattern: &str) -> AppResult<Self> {
        self.routes.push(RouteTemplate::parse(pattern)?);
        Ok(self)
    }

    /// Append a template restricted to `methods`
    pub fn route_with_methods(mut self, pattern: &str, methods: &[Method]) -> AppResult<Self> {
        self.routes.push(RouteTemplate::parse_with_methods(
            pattern,
            Some(methods.to_vec()),
        )?);
        Ok(self)
    }

    pub fn push(&mut self, template: RouteTemplate) {
        self.routes.push(template);
    }

    pub fn routes(&self) -> &[RouteTemplate] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Gateway namespace a request was collapsed into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayMatch {
    pub gateway: String,
    pub endpoint: String,
}

/// Outcome of resolving one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    /// Label value for the `route` label
    pub template: String,
    /// Whether a registered template matched (false = raw path fallback)
    pub matched: bool,
    /// Set when the concrete path lives under a gateway namespace
    pub gateway: Option<GatewayMatch>,
}

/// Resolves request paths to route templates
///
/// Routes are tried in declaration order; the first full match wins. An
/// unmatched path falls back to the raw path. Collapse rules then apply to
/// whichever of the two was chosen.
pub struct RouteResolver {
    table: RouteTable,
    rules: Vec<CollapseRule>,
    cache: RwLock<HashMap<(Method, String), ResolvedRoute>>,
    cache_capacity: usize,
}

impl RouteResolver {
    pub fn new(table: RouteTable, rules: Vec<CollapseRule>) -> Self {
        Self::with_cache_capacity(table, rules, DEFAULT_CACHE_CAPACITY)
    }

    /// `cache_capacity = 0` disables caching
    pub fn with_cache_capacity(
        table: RouteTable,
        rules: Vec<CollapseRule>,
        cache_capacity: usize,
    ) -> Self {
        tracing::debug!(
            route_count = table.len(),
            collapse_rules = rules.len(),
            cache_capacity,
            "RouteResolver initialized"
        );

        Self {
            table,
            rules,
            cache: RwLock::new(HashMap::new()),
            cache_capacity,
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Number of cached resolutions
    pub fn cached_entries(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Resolve `method` + `path` to the label used for the `route` label
    pub fn resolve(&self, method: &Method, path: &str) -> ResolvedRoute {
        if self.cache_capacity > 0
            && let Ok(cache) = self.cache.read()
            && let Some(hit) = cache.get(&(method.clone(), path.to_string()))
        {
            return hit.clone();
        }

        let resolved = self.resolve_uncached(method, path);

        if self.cache_capacity > 0
            && let Ok(mut cache) = self.cache.write()
            && cache.len() < self.cache_capacity
        {
            cache.insert((method.clone(), path.to_string()), resolved.clone());
        }

        resolved
    }

    fn resolve_uncached(&self, method: &Method, path: &str) -> ResolvedRoute {
        let matched = self
            .table
            .routes()
            .iter()
            .find(|route| route.matches(method, path));

        let (base, is_match) = match matched {
            Some(route) => (route.pattern(), true),
            None => (path, false),
        };

        // Route label from the chosen label, gateway endpoint from the concrete path
        let template = self
            .rules
            .iter()
            .find_map(|rule| rule.apply(base))
            .map(|collapsed| collapsed.path)
            .unwrap_or_else(|| base.to_string());
        let gateway = self
            .rules
            .iter()
            .find_map(|rule| rule.apply(path))
            .map(|collapsed| GatewayMatch {
                gateway: collapsed.gateway,
                endpoint: collapsed.endpoint,
            });

        if !is_match {
            tracing::trace!(path = %path, "No route template matched, using raw path");
        }

        ResolvedRoute {
            template,
            matched: is_match,
            gateway,
        }
    }
}

/// An axum `Router` that records every route template it is given
///
/// The recorded [`RouteTable`] is in declaration order, which is the order
/// the resolver tries templates in.
pub struct InstrumentedRouter<S = ()> {
    router: Router<S>,
    patterns: Vec<String>,
}

impl<S> Default for InstrumentedRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> InstrumentedRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            patterns: Vec::new(),
        }
    }

    pub fn route(mut self, path: &str, method_router: MethodRouter<S>) -> Self {
        self.patterns.push(path.to_string());
        self.router = self.router.route(path, method_router);
        self
    }

    /// Split into the axum router and the parsed route table
    pub fn into_parts(self) -> AppResult<(Router<S>, RouteTable)> {
        let mut table = RouteTable::new();
        for pattern in &self.patterns {
            table.push(RouteTemplate::parse(pattern)?);
        }
        Ok((self.router, table))
    }
}
