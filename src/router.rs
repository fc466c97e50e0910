//! Route registration, groups and chain resolution.
//!
//! A [`Router`] is a cheap handle onto one node of a shared route tree. The
//! root node is the router you create; [`Router::group`] adds a child node
//! whose prefix is the parent's prefix plus its own. Middleware registered on
//! a node applies to every route registered on that node or below it.
//!
//! Nothing is resolved while routes are being registered. When an engine
//! starts it freezes the tree into a [`RouteTable`]: every route gets its
//! final chain
//!
//! ```text
//! engine mw… ++ root mw… ++ group mw… (outermost first) ++ route mw… ++ handler
//! ```
//!
//! and registration problems (bad patterns, conflicting routes) surface as
//! [`Error::Config`] from `start`.
//!
//! Patterns use `:name` for a single segment and `*name` for the remainder of
//! the path:
//!
//! ```rust
//! use switchyard::{handler_fn, Router, StatusCode};
//!
//! let router = Router::new();
//! let api = router.group("/api/v1");
//! api.get("/users/:id", handler_fn(|ctx| Box::pin(async move {
//!     let id = ctx.param("id").to_owned();
//!     ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
//! })));
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use tracing::warn;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::request::Params;

/// A resolved chain: middleware in execution order, handler last.
pub(crate) type Chain = Arc<[BoxedHandler]>;

/// Handle onto one node of a route tree. Clones share the same node.
#[derive(Clone)]
pub struct Router {
    tree: Arc<Mutex<RouteTree>>,
    node: usize,
}

#[derive(Default)]
struct RouteTree {
    groups: Vec<GroupNode>,
    routes: Vec<RouteEntry>,
    frozen: bool,
}

struct GroupNode {
    prefix: String,
    parent: Option<usize>,
    middleware: Vec<BoxedHandler>,
}

struct RouteEntry {
    method: Method,
    pattern: String,
    group: usize,
    middleware: Vec<BoxedHandler>,
    handler: BoxedHandler,
}

impl Router {
    pub fn new() -> Self {
        let root = GroupNode { prefix: String::new(), parent: None, middleware: Vec::new() };
        let tree = RouteTree { groups: vec![root], ..RouteTree::default() };
        Self { tree: Arc::new(Mutex::new(tree)), node: 0 }
    }

    /// Creates a sub-router whose routes live under `prefix`.
    pub fn group(&self, prefix: &str) -> Router {
        let mut tree = self.lock();
        let prefix = join_paths(&tree.groups[self.node].prefix, prefix);
        tree.groups.push(GroupNode { prefix, parent: Some(self.node), middleware: Vec::new() });
        Router { tree: Arc::clone(&self.tree), node: tree.groups.len() - 1 }
    }

    /// The full prefix of this node.
    pub fn prefix(&self) -> String {
        self.lock().groups[self.node].prefix.clone()
    }

    /// Appends middleware for every route on this node and its groups.
    pub fn use_middleware(&self, middleware: impl Handler) -> &Self {
        let mut tree = self.lock();
        if tree.frozen {
            warn!(prefix = %tree.groups[self.node].prefix, "route table frozen, ignoring middleware");
        } else {
            tree.groups[self.node].middleware.push(Arc::new(middleware));
        }
        drop(tree);
        self
    }

    /// Registers `handler` for `method` on `path`, relative to this node.
    pub fn on(&self, method: Method, path: &str, handler: impl Handler) -> &Self {
        self.on_with(method, path, Vec::new(), handler)
    }

    /// Like [`on`](Router::on), with middleware that wraps this route only.
    pub fn on_with(&self, method: Method, path: &str, middleware: Vec<BoxedHandler>, handler: impl Handler) -> &Self {
        let mut tree = self.lock();
        let pattern = join_paths(&tree.groups[self.node].prefix, path);
        if tree.frozen {
            warn!(%method, %pattern, "route table frozen, ignoring route");
        } else {
            tree.routes.push(RouteEntry { method, pattern, group: self.node, middleware, handler: Arc::new(handler) });
        }
        drop(tree);
        self
    }

    pub fn get(&self, path: &str, handler: impl Handler) -> &Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post(&self, path: &str, handler: impl Handler) -> &Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put(&self, path: &str, handler: impl Handler) -> &Self {
        self.on(Method::Put, path, handler)
    }

    pub fn patch(&self, path: &str, handler: impl Handler) -> &Self {
        self.on(Method::Patch, path, handler)
    }

    pub fn delete(&self, path: &str, handler: impl Handler) -> &Self {
        self.on(Method::Delete, path, handler)
    }

    pub fn head(&self, path: &str, handler: impl Handler) -> &Self {
        self.on(Method::Head, path, handler)
    }

    pub fn options(&self, path: &str, handler: impl Handler) -> &Self {
        self.on(Method::Options, path, handler)
    }

    /// Serves files below `dir` at `GET {prefix}/*filepath`.
    ///
    /// Paths that try to leave `dir` answer `404`.
    pub fn static_files(&self, prefix: &str, dir: impl Into<PathBuf>) -> &Self {
        let pattern = join_paths(prefix, "*filepath");
        self.get(&pattern, StaticDir { root: dir.into() })
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    /// Resolves every route's chain and stops further registration.
    ///
    /// Freezing again rebuilds the same table, so a failed start can be retried.
    pub(crate) fn freeze(&self, global: &[BoxedHandler]) -> Result<RouteTable> {
        let mut tree = self.lock();
        tree.frozen = true;

        let mut index: HashMap<Method, matchit::Router<usize>> = HashMap::new();
        let mut routes = Vec::with_capacity(tree.routes.len());
        // Patterns must also agree across methods: backends that route by
        // path first cannot give one segment two names.
        let mut shapes = matchit::Router::new();
        let mut seen = HashSet::new();

        for entry in &tree.routes {
            if seen.insert(entry.pattern.as_str()) {
                shapes
                    .insert(matchit_pattern(&entry.pattern), ())
                    .map_err(|e| Error::Config(format!("route `{}` conflicts with another route: {e}", entry.pattern)))?;
            }
            index
                .entry(entry.method)
                .or_default()
                .insert(matchit_pattern(&entry.pattern), routes.len())
                .map_err(|e| Error::Config(format!("invalid route `{} {}`: {e}", entry.method, entry.pattern)))?;

            let mut chain: Vec<BoxedHandler> = global.to_vec();
            chain.extend(tree.ancestry(entry.group).flat_map(|node| node.middleware.iter().cloned()));
            chain.extend(entry.middleware.iter().cloned());
            chain.push(Arc::clone(&entry.handler));

            routes.push(ResolvedRoute { method: entry.method, pattern: entry.pattern.clone(), chain: chain.into() });
        }

        let mut not_found: Vec<BoxedHandler> = global.to_vec();
        not_found.push(Arc::new(NoRoute));

        Ok(RouteTable { routes, index, not_found: not_found.into() })
    }

    fn lock(&self) -> MutexGuard<'_, RouteTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTree {
    /// Group nodes from the root down to `node`.
    fn ancestry(&self, node: usize) -> impl Iterator<Item = &GroupNode> {
        let mut path = Vec::new();
        let mut next = Some(node);
        while let Some(index) = next {
            path.push(&self.groups[index]);
            next = self.groups[index].parent;
        }
        path.into_iter().rev()
    }
}

/// The immutable result of freezing a [`Router`].
pub(crate) struct RouteTable {
    routes: Vec<ResolvedRoute>,
    index: HashMap<Method, matchit::Router<usize>>,
    not_found: Chain,
}

pub(crate) struct ResolvedRoute {
    pub(crate) method: Method,
    pub(crate) pattern: String,
    pub(crate) chain: Chain,
}

/// What a request resolved to.
pub(crate) struct Matched {
    pub(crate) chain: Chain,
    pub(crate) params: Params,
    pub(crate) full_path: String,
}

impl RouteTable {
    pub(crate) fn routes(&self) -> &[ResolvedRoute] {
        &self.routes
    }

    /// Chain for unmatched requests: engine middleware, then a `404`.
    pub(crate) fn not_found(&self) -> Chain {
        Arc::clone(&self.not_found)
    }

    /// Resolves `method` + `path`. `HEAD` falls back to the `GET` route.
    pub(crate) fn lookup(&self, method: &http::Method, path: &str) -> Matched {
        let method = Method::try_from(method).ok();
        let found = method.and_then(|m| {
            self.find(m, path).or_else(|| (m == Method::Head).then(|| self.find(Method::Get, path)).flatten())
        });

        found.unwrap_or_else(|| Matched { chain: self.not_found(), params: Params::default(), full_path: String::new() })
    }

    fn find(&self, method: Method, path: &str) -> Option<Matched> {
        let matched = self.index.get(&method)?.at(path).ok()?;
        let route = &self.routes[*matched.value];
        Some(Matched {
            chain: Arc::clone(&route.chain),
            params: decode_params(&matched.params),
            full_path: route.pattern.clone(),
        })
    }
}

/// One route pattern, matched on its own.
///
/// Backends that route natively use it to capture parameters exactly the way
/// [`RouteTable::lookup`] does.
pub(crate) struct PatternMatcher(matchit::Router<()>);

impl PatternMatcher {
    pub(crate) fn new(pattern: &str) -> Result<Self> {
        let mut router = matchit::Router::new();
        router
            .insert(matchit_pattern(pattern), ())
            .map_err(|e| Error::Config(format!("invalid route `{pattern}`: {e}")))?;
        Ok(Self(router))
    }

    pub(crate) fn params(&self, path: &str) -> Params {
        self.0.at(path).map(|matched| decode_params(&matched.params)).unwrap_or_default()
    }
}

/// Percent-decodes captures. Invalid UTF-8 is replaced, never rejected.
fn decode_params(params: &matchit::Params<'_, '_>) -> Params {
    params.iter().map(|(k, v)| (k, percent_decode_str(v).decode_utf8_lossy())).collect()
}

struct NoRoute;

#[async_trait]
impl Handler for NoRoute {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        Err(Error::not_found(format!("route {} {}", ctx.method(), ctx.path())))
    }
}

struct StaticDir {
    root: PathBuf,
}

#[async_trait]
impl Handler for StaticDir {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        let relative = ctx.param("filepath").to_owned();
        let safe = !relative.is_empty() && Path::new(&relative).components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::not_found(format!("file `{relative}`")));
        }
        ctx.file(self.root.join(relative)).await
    }
}

/// Concatenates a group prefix and a relative path with exactly one `/`
/// between them. A trailing slash on `path` is kept.
pub(crate) fn join_paths(prefix: &str, path: &str) -> String {
    if path.is_empty() {
        return if prefix.is_empty() { "/".to_owned() } else { prefix.to_owned() };
    }
    format!("{}/{}", prefix.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Rewrites `:name` / `*name` segments into matchit's `{name}` / `{*name}`.
fn matchit_pattern(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.replace('{', "{{").replace('}', "}}")
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::context::testing::context_with;
    use crate::handler::{boxed, handler_fn};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn mark(log: &Log, name: &'static str) -> BoxedHandler {
        let log = Arc::clone(log);
        boxed(handler_fn(move |ctx| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(name);
                ctx.next().await
            })
        }))
    }

    fn ok() -> BoxedHandler {
        boxed(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.status(StatusCode::OK);
                Ok(())
            })
        }))
    }

    async fn run(table: &RouteTable, method: http::Method, path: &str) -> (crate::Result<()>, Context) {
        let matched = table.lookup(&method, path);
        let req = http::Request::builder().method(method).uri(path).body(Bytes::new()).unwrap();
        let mut ctx = context_with(req, matched.chain.to_vec(), matched.params, &matched.full_path);
        let result = ctx.next().await;
        (result, ctx)
    }

    #[test]
    fn join_paths_normalizes_slashes() {
        assert_eq!(join_paths("", "/users"), "/users");
        assert_eq!(join_paths("/api", "users"), "/api/users");
        assert_eq!(join_paths("/api/", "/users"), "/api/users");
        assert_eq!(join_paths("/api", "/"), "/api/");
        assert_eq!(join_paths("/api", ""), "/api");
        assert_eq!(join_paths("", ""), "/");
    }

    #[test]
    fn pattern_syntax_is_rewritten() {
        assert_eq!(matchit_pattern("/users/:id"), "/users/{id}");
        assert_eq!(matchit_pattern("/files/*path"), "/files/{*path}");
        assert_eq!(matchit_pattern("/a/:x/b/:y"), "/a/{x}/b/{y}");
        assert_eq!(matchit_pattern("/lit/{brace}"), "/lit/{{brace}}");
    }

    #[tokio::test]
    async fn chain_order_is_global_groups_route_handler() {
        let log = Log::default();
        let router = Router::new();
        router.use_middleware(mark(&log, "root"));
        let api = router.group("/api");
        let v1 = api.group("/v1");
        // registered out of order on purpose: v1 before its parent
        v1.use_middleware(mark(&log, "v1"));
        api.use_middleware(mark(&log, "api"));
        v1.on_with(Method::Get, "/users/:id", vec![mark(&log, "route")], ok());

        let table = router.freeze(&[mark(&log, "global")]).unwrap();
        let (result, ctx) = run(&table, http::Method::GET, "/api/v1/users/42").await;

        assert!(result.is_ok());
        assert_eq!(*log.lock().unwrap(), ["global", "root", "api", "v1", "route"]);
        assert_eq!(ctx.param("id"), "42");
        assert_eq!(ctx.full_path(), "/api/v1/users/:id");
    }

    #[tokio::test]
    async fn sibling_groups_do_not_share_middleware() {
        let log = Log::default();
        let router = Router::new();
        let admin = router.group("/admin");
        admin.use_middleware(mark(&log, "admin"));
        admin.get("/panel", ok());
        router.group("/public").get("/page", ok());

        let table = router.freeze(&[]).unwrap();
        let (result, _) = run(&table, http::Method::GET, "/public/page").await;

        assert!(result.is_ok());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_runs_global_then_not_found() {
        let log = Log::default();
        let router = Router::new();
        router.use_middleware(mark(&log, "root"));
        router.get("/users", ok());

        let table = router.freeze(&[mark(&log, "global")]).unwrap();
        for (method, path) in [(http::Method::GET, "/nope"), (http::Method::POST, "/users")] {
            let (result, ctx) = run(&table, method, path).await;
            assert!(matches!(result, Err(Error::NotFound(_))));
            assert_eq!(ctx.full_path(), "");
        }
        assert_eq!(*log.lock().unwrap(), ["global", "global"]);
    }

    #[test]
    fn head_falls_back_to_get() {
        let router = Router::new();
        router.get("/page", ok());
        let table = router.freeze(&[]).unwrap();

        assert_eq!(table.lookup(&http::Method::HEAD, "/page").full_path, "/page");
        assert_eq!(table.lookup(&http::Method::DELETE, "/page").full_path, "");
    }

    #[test]
    fn params_are_percent_decoded() {
        let router = Router::new();
        router.get("/users/:name", ok());
        let table = router.freeze(&[]).unwrap();

        let matched = table.lookup(&http::Method::GET, "/users/a%20b");
        assert_eq!(matched.params.get("name"), Some("a b"));
    }

    #[test]
    fn invalid_utf8_params_decode_lossily() {
        let router = Router::new();
        router.get("/users/:id", ok());
        let table = router.freeze(&[]).unwrap();

        let matched = table.lookup(&http::Method::GET, "/users/%FF");
        assert_eq!(matched.params.get("id"), Some("\u{FFFD}"));
        assert_eq!(PatternMatcher::new("/users/:id").unwrap().params("/users/%FF").get("id"), Some("\u{FFFD}"));
    }

    #[test]
    fn parameter_names_must_agree_across_methods() {
        let router = Router::new();
        router.get("/items/:id", ok()).post("/items/:item", ok());
        assert!(matches!(router.freeze(&[]), Err(Error::Config(_))));

        let router = Router::new();
        router.get("/items/:id", ok()).delete("/items/:id", ok()).post("/items", ok());
        assert!(router.freeze(&[]).is_ok());
    }

    #[test]
    fn conflicting_routes_fail_at_freeze() {
        let router = Router::new();
        router.get("/users/:id", ok()).get("/users/:name", ok());
        assert!(matches!(router.freeze(&[]), Err(Error::Config(_))));

        let router = Router::new();
        router.get("/files/*rest/more", ok());
        assert!(matches!(router.freeze(&[]), Err(Error::Config(_))));
    }

    #[test]
    fn registration_after_freeze_is_ignored() {
        let router = Router::new();
        router.get("/a", ok());
        router.freeze(&[]).unwrap();
        assert!(router.is_frozen());

        router.get("/b", ok());
        let table = router.freeze(&[]).unwrap();
        assert_eq!(table.routes().len(), 1);
    }

    #[tokio::test]
    async fn static_files_reject_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.css"), "body{}").unwrap();

        let router = Router::new();
        router.static_files("/assets", dir.path());
        let table = router.freeze(&[]).unwrap();

        let (result, ctx) = run(&table, http::Method::GET, "/assets/app.css").await;
        assert!(result.is_ok());
        assert_eq!(ctx.response().headers()["content-type"], "text/css; charset=utf-8");

        let (result, _) = run(&table, http::Method::GET, "/assets/../Cargo.toml").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn group_prefixes_concatenate() {
        let router = Router::new();
        let v2 = router.group("/api").group("v2/");
        assert_eq!(v2.prefix(), "/api/v2/");
    }
}
