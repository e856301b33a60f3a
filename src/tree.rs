//! Radix tree of path segments.
//!
//! The tree goes through three stages, each a one-way gate:
//!
//! ```text
//! RouteTree::new ──add_route──▶ optimize ──add_hook──▶ freeze ──▶ CompiledRouteTree
//!   (building)                (optimized)   (hooked)               (read-only)
//! ```
//!
//! [`RouteTree`] is the mutable builder. [`CompiledRouteTree`] is what the
//! dispatcher serves from: it has no mutating methods at all, so it can be
//! shared behind an `Arc` across every in-flight request without locking.
//!
//! Both walk with explicit work stacks rather than recursion; path depth is
//! attacker-controlled on the lookup side.

use std::sync::Arc;

use tracing::debug;

use crate::error::RouteError;
use crate::lookup::{self, RouteMatch};
use crate::method::Method;
use crate::path;

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// What a node matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Literal text. After optimization this may span several segments
    /// joined by `/` (e.g. `a/simple/route`).
    Static(String),
    /// `:name`: one non-empty segment, bound to `name`.
    Parameter(String),
    /// `*`: any run of segments up to whatever follows it.
    Wildcard,
}

impl NodeKind {
    fn parse(segment: &str, pattern: &str) -> Result<Self, RouteError> {
        if segment == "*" {
            return Ok(Self::Wildcard);
        }
        match segment.strip_prefix(':') {
            Some("") => Err(RouteError::InvalidPattern {
                pattern: pattern.to_owned(),
                reason: "parameter segments need a name",
            }),
            Some(name) => Ok(Self::Parameter(name.to_owned())),
            None => Ok(Self::Static(segment.to_owned())),
        }
    }
}

/// A terminal route: one registered `(method, pattern)` and its hooks.
#[derive(Clone, Debug)]
pub struct Endpoint<H> {
    pub(crate) method: Method,
    pub(crate) pattern: String,
    pub(crate) handler: H,
    pub(crate) before_hooks: Vec<H>,
    pub(crate) after_hooks: Vec<H>,
}

impl<H> Endpoint<H> {
    pub fn method(&self) -> Method {
        self.method
    }

    /// The registered pattern in canonical form (`/user/:id`, `/static/*`, `/`).
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Before-hooks in registration order.
    pub fn before_hooks(&self) -> &[H] {
        &self.before_hooks
    }

    /// After-hooks in registration order.
    pub fn after_hooks(&self) -> &[H] {
        &self.after_hooks
    }
}

#[derive(Debug)]
pub(crate) struct Node<H> {
    pub(crate) kind: NodeKind,
    /// Insertion order is lookup order.
    pub(crate) children: Vec<Node<H>>,
    /// At most one per method, in registration order.
    pub(crate) endpoints: Vec<Arc<Endpoint<H>>>,
}

impl<H> Node<H> {
    fn new(kind: NodeKind) -> Self {
        Self { kind, children: Vec::new(), endpoints: Vec::new() }
    }

    fn root() -> Self {
        Self::new(NodeKind::Static(String::new()))
    }

    pub(crate) fn endpoint_for(&self, method: Method) -> Option<&Arc<Endpoint<H>>> {
        self.endpoints.iter().find(|e| e.method.serves(method))
    }

    /// A handler-less static node whose only child is static too.
    fn can_absorb_child(&self) -> bool {
        matches!(self.kind, NodeKind::Static(_))
            && self.endpoints.is_empty()
            && self.children.len() == 1
            && matches!(self.children[0].kind, NodeKind::Static(_))
    }
}

/// Rejects a static segment next to a parameter sibling of the same name, or
/// the reverse: `/user/:id/info` and `/user/id/anyway` must not coexist.
fn check_parameter_conflict<H>(
    siblings: &[Node<H>],
    kind: &NodeKind,
    pattern: &str,
) -> Result<(), RouteError> {
    let clash = siblings.iter().find_map(|sibling| match (&sibling.kind, kind) {
        (NodeKind::Parameter(name), NodeKind::Static(text))
        | (NodeKind::Static(text), NodeKind::Parameter(name))
            if name == text =>
        {
            Some(name)
        }
        _ => None,
    });

    match clash {
        Some(name) => Err(RouteError::ParameterConflict {
            pattern: pattern.to_owned(),
            parameter: name.clone(),
        }),
        None => Ok(()),
    }
}

fn node_count<H>(root: &Node<H>) -> usize {
    let mut count = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.children.iter());
    }
    count
}

fn endpoints<H>(root: &Node<H>) -> Vec<&Arc<Endpoint<H>>> {
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        found.extend(node.endpoints.iter());
        stack.extend(node.children.iter().rev());
    }
    found
}

// ── Builder ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stage {
    Building,
    Optimized,
    Hooked,
}

/// Mutable route tree, used during startup only.
///
/// ```rust
/// use waypost::{Method, RouteTree};
///
/// let mut tree = RouteTree::new();
/// tree.add_route(Method::Get, "/user/:id/profile/:section", "profile").unwrap();
/// tree.add_route(Method::Get, "/static/*", "assets").unwrap();
///
/// let tree = tree.freeze();
/// let found = tree.find_route(Method::Get, "/user/42/profile/bio").unwrap();
/// assert_eq!(*found.handler(), "profile");
/// assert_eq!(found.params().get("id"), Some("42"));
/// assert_eq!(found.params().get("section"), Some("bio"));
/// ```
#[derive(Debug)]
pub struct RouteTree<H> {
    pub(crate) root: Node<H>,
    pub(crate) stage: Stage,
}

impl<H> RouteTree<H> {
    pub fn new() -> Self {
        Self { root: Node::root(), stage: Stage::Building }
    }

    /// Inserts a route, creating intermediate nodes as needed.
    ///
    /// Shared prefixes reuse existing nodes. A trailing `/` is ignored; a
    /// `*` segment becomes a wildcard, `:name` a parameter.
    ///
    /// # Errors
    ///
    /// - [`RouteError::Duplicate`] if `(method, pattern)` is already registered.
    /// - [`RouteError::ParameterConflict`] if a static segment would sit next
    ///   to a parameter of the same name.
    /// - [`RouteError::InvalidPattern`] for an unnamed `:` segment.
    /// - [`RouteError::AlreadyOptimized`] once [`optimize`](Self::optimize) ran.
    pub fn add_route(&mut self, method: Method, pattern: &str, handler: H) -> Result<(), RouteError> {
        let canonical = canonical_pattern(pattern);

        if self.stage != Stage::Building {
            return Err(RouteError::AlreadyOptimized { method, pattern: canonical });
        }

        let kinds = path::segments(pattern)
            .map(|segment| NodeKind::parse(segment, &canonical))
            .collect::<Result<Vec<_>, _>>()?;

        let mut node = &mut self.root;
        for kind in kinds {
            check_parameter_conflict(&node.children, &kind, &canonical)?;

            let index = match node.children.iter().position(|child| child.kind == kind) {
                Some(index) => index,
                None => {
                    node.children.push(Node::new(kind));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index];
        }

        if node.endpoints.iter().any(|e| e.method == method) {
            return Err(RouteError::Duplicate { method, pattern: canonical });
        }

        debug!(%method, pattern = %canonical, "route added");
        node.endpoints.push(Arc::new(Endpoint {
            method,
            pattern: canonical,
            handler,
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
        }));
        Ok(())
    }

    /// Collapses chains of handler-less static nodes into single nodes.
    ///
    /// Lookup results are identical before and after; only traversal depth
    /// changes. Parameter and wildcard nodes are never merged. Calling it
    /// again before any hook is attached is a no-op.
    ///
    /// # Errors
    ///
    /// [`RouteError::OptimizeAfterHooks`] once a hook has been attached.
    pub fn optimize(&mut self) -> Result<(), RouteError> {
        match self.stage {
            Stage::Hooked => Err(RouteError::OptimizeAfterHooks),
            Stage::Optimized => Ok(()),
            Stage::Building => {
                let before = node_count(&self.root);
                merge_static_chains(&mut self.root);
                self.stage = Stage::Optimized;
                debug!(nodes_before = before, nodes_after = node_count(&self.root), "route tree optimized");
                Ok(())
            }
        }
    }

    /// Whether [`optimize`](Self::optimize) has run.
    pub fn is_optimized(&self) -> bool {
        self.stage != Stage::Building
    }

    /// Looks up a route. Works at every stage; results do not depend on
    /// whether the tree has been optimized.
    pub fn find_route<'t, 'p>(&'t self, method: Method, path: &'p str) -> Option<RouteMatch<'t, 'p, H>> {
        lookup::find(&self.root, method, path)
    }

    /// Optimizes (if that has not happened yet) and seals the tree.
    pub fn freeze(mut self) -> CompiledRouteTree<H> {
        if self.stage == Stage::Building {
            let before = node_count(&self.root);
            merge_static_chains(&mut self.root);
            debug!(nodes_before = before, nodes_after = node_count(&self.root), "route tree optimized");
        }
        CompiledRouteTree { root: self.root }
    }

    /// Every registered endpoint, depth-first in registration order.
    pub fn endpoints(&self) -> Vec<&Arc<Endpoint<H>>> {
        endpoints(&self.root)
    }
}

impl<H> Default for RouteTree<H> {
    fn default() -> Self { Self::new() }
}

fn canonical_pattern(pattern: &str) -> String {
    let mut canonical = String::with_capacity(pattern.len() + 1);
    for segment in path::segments(pattern) {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() {
        canonical.push('/');
    }
    canonical
}

fn merge_static_chains<H>(root: &mut Node<H>) {
    // The root itself is never merged: it matches the empty path.
    let mut stack: Vec<&mut Node<H>> = root.children.iter_mut().collect();

    while let Some(node) = stack.pop() {
        while node.can_absorb_child() {
            let Some(child) = node.children.pop() else { break };
            let Node { kind, children, endpoints } = child;
            if let (NodeKind::Static(text), NodeKind::Static(child_text)) = (&mut node.kind, kind) {
                text.push('/');
                text.push_str(&child_text);
            }
            node.children = children;
            node.endpoints = endpoints;
        }
        stack.extend(node.children.iter_mut());
    }
}

// ── Compiled ──────────────────────────────────────────────────────────────────

/// Read-only route tree, produced by [`RouteTree::freeze`].
#[derive(Debug)]
pub struct CompiledRouteTree<H> {
    root: Node<H>,
}

impl<H> CompiledRouteTree<H> {
    /// Finds the endpoint serving `method` at `path` and binds its parameters.
    ///
    /// `path` is a pathname (no query string). It is normalized the same way
    /// patterns are: trailing `/` and a trailing `*` are ignored.
    pub fn find_route<'t, 'p>(&'t self, method: Method, path: &'p str) -> Option<RouteMatch<'t, 'p, H>> {
        lookup::find(&self.root, method, path)
    }

    /// Every registered endpoint, depth-first in registration order.
    pub fn endpoints(&self) -> Vec<&Arc<Endpoint<H>>> {
        endpoints(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(node: &Node<&'static str>) -> Vec<String> {
        node.children
            .iter()
            .map(|c| match &c.kind {
                NodeKind::Static(t) => t.clone(),
                NodeKind::Parameter(n) => format!(":{n}"),
                NodeKind::Wildcard => "*".to_owned(),
            })
            .collect()
    }

    #[test]
    fn shared_prefixes_reuse_nodes() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/api/users", "list").unwrap();
        tree.add_route(Method::Post, "/api/users", "create").unwrap();
        tree.add_route(Method::Get, "/api/posts", "posts").unwrap();

        assert_eq!(texts(&tree.root), ["api"]);
        assert_eq!(texts(&tree.root.children[0]), ["users", "posts"]);
        assert_eq!(tree.root.children[0].children[0].endpoints.len(), 2);
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/a/b", "first").unwrap();
        let err = tree.add_route(Method::Get, "/a/b/", "second").unwrap_err();
        assert_eq!(err, RouteError::Duplicate { method: Method::Get, pattern: "/a/b".into() });

        // Same pattern, other method: fine.
        tree.add_route(Method::Post, "/a/b", "post").unwrap();
        tree.add_route(Method::All, "/a/b", "all").unwrap();
        assert!(tree.add_route(Method::All, "/a/b", "again").is_err());
    }

    #[test]
    fn static_next_to_same_named_parameter_conflicts() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/user/:id/info", "info").unwrap();
        let err = tree.add_route(Method::Get, "/user/id/anyway", "anyway").unwrap_err();
        assert_eq!(
            err,
            RouteError::ParameterConflict { pattern: "/user/id/anyway".into(), parameter: "id".into() }
        );

        let mut reverse = RouteTree::new();
        reverse.add_route(Method::Get, "/user/id/anyway", "anyway").unwrap();
        assert!(matches!(
            reverse.add_route(Method::Get, "/user/:id/info", "info"),
            Err(RouteError::ParameterConflict { .. })
        ));
    }

    #[test]
    fn differently_named_static_and_parameter_coexist() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/users/me", "me").unwrap();
        tree.add_route(Method::Get, "/users/:id", "user").unwrap();
        assert_eq!(texts(&tree.root.children[0]), ["me", ":id"]);
    }

    #[test]
    fn conflict_leaves_tree_untouched() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/user/:id", "user").unwrap();
        let before = node_count(&tree.root);
        assert!(tree.add_route(Method::Get, "/user/id/deeper/path", "x").is_err());
        assert_eq!(node_count(&tree.root), before);
    }

    #[test]
    fn unnamed_parameter_is_invalid() {
        let mut tree: RouteTree<()> = RouteTree::new();
        assert!(matches!(
            tree.add_route(Method::Get, "/a/:/b", ()),
            Err(RouteError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn root_route_lives_on_the_root() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/", "home").unwrap();
        assert_eq!(tree.root.endpoints[0].pattern(), "/");
        assert!(tree.root.children.is_empty());
    }

    #[test]
    fn optimize_merges_static_chains() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/a/simple/route", "simple").unwrap();
        tree.add_route(Method::Get, "/b/:id/deep/static/tail", "tail").unwrap();
        tree.optimize().unwrap();

        assert_eq!(texts(&tree.root), ["a/simple/route", "b"]);
        let merged = &tree.root.children[0];
        assert_eq!(merged.endpoints[0].handler, "simple");

        // `b` keeps its parameter child; the static run below it merges.
        let b = &tree.root.children[1];
        assert_eq!(texts(b), [":id"]);
        assert_eq!(texts(&b.children[0]), ["deep/static/tail"]);
    }

    #[test]
    fn optimize_stops_at_nodes_with_handlers() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/a/b", "ab").unwrap();
        tree.add_route(Method::Get, "/a/b/c/d", "abcd").unwrap();
        tree.optimize().unwrap();

        assert_eq!(texts(&tree.root), ["a/b"]);
        assert_eq!(texts(&tree.root.children[0]), ["c/d"]);
    }

    #[test]
    fn optimize_is_idempotent_until_hooks_attach() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/x/y/z", "xyz").unwrap();
        tree.optimize().unwrap();
        let once = texts(&tree.root);
        tree.optimize().unwrap();
        assert_eq!(texts(&tree.root), once);

        tree.stage = Stage::Hooked;
        assert_eq!(tree.optimize(), Err(RouteError::OptimizeAfterHooks));
    }

    #[test]
    fn routes_cannot_be_added_after_optimize() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/a", "a").unwrap();
        tree.optimize().unwrap();
        assert!(matches!(
            tree.add_route(Method::Get, "/b", "b"),
            Err(RouteError::AlreadyOptimized { .. })
        ));
    }

    #[test]
    fn freeze_optimizes_unoptimized_trees() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/one/two/three", "deep").unwrap();
        let compiled = tree.freeze();
        assert_eq!(node_count(&compiled.root), 2);
        assert!(compiled.find_route(Method::Get, "/one/two/three").is_some());
    }

    #[test]
    fn endpoints_are_listed_in_registration_order() {
        let mut tree = RouteTree::new();
        tree.add_route(Method::Get, "/", "home").unwrap();
        tree.add_route(Method::Get, "/b", "b").unwrap();
        tree.add_route(Method::Get, "/a", "a").unwrap();
        let patterns: Vec<_> = tree.endpoints().iter().map(|e| e.pattern().to_owned()).collect();
        assert_eq!(patterns, ["/", "/b", "/a"]);
    }
}
