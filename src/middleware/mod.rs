//! Hook registry.
//!
//! Hooks are middleware attached directly to endpoints of an optimized
//! [`RouteTree`]. Each endpoint keeps two ordered lists, before and after,
//! and the dispatcher runs them around the handler.
//!
//! Which endpoints a hook lands on is decided by [`pattern_matches`], a
//! segment-wise glob over the *registered* route pattern, not over request
//! paths:
//!
//! | Hook pattern  | Attaches to                                   |
//! |---------------|-----------------------------------------------|
//! | `*`           | every endpoint                                |
//! | `/test/*`     | `/test/a`, `/test/a/b`, `/test/:id`; not `/test` |
//! | `/test/*/v1`  | `/test/a/v1`, `/test/a/b/v1`; not `/test/a/v1/extra` |
//! | `/users/:id`  | exactly `/users/:id`                          |

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::RouteError;
use crate::method::Method;
use crate::path;
use crate::tree::{Node, RouteTree, Stage};

/// When a hook runs relative to the handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HookPhase {
    Before,
    After,
    /// The same hook is pushed onto both lists.
    BeforeAndAfter,
}

impl HookPhase {
    fn before(self) -> bool {
        matches!(self, Self::Before | Self::BeforeAndAfter)
    }

    fn after(self) -> bool {
        matches!(self, Self::After | Self::BeforeAndAfter)
    }
}

/// Whether hook pattern `pattern` covers the route registered as `route`.
///
/// `*` alone matches everything. Otherwise both sides are compared segment
/// by segment; a `*` segment in `pattern` consumes one or more route segments
/// and the rest of the pattern must then line up exactly.
///
/// ```rust
/// use waypost::middleware::pattern_matches;
///
/// assert!(pattern_matches("/test/*", "/test/a/b"));
/// assert!(pattern_matches("/test/*/v1", "/test/a/v1"));
/// assert!(!pattern_matches("/test/*/v1", "/test/a/v1/extra"));
/// assert!(!pattern_matches("/test/*", "/other"));
/// ```
pub fn pattern_matches(pattern: &str, route: &str) -> bool {
    if pattern.trim_matches('/') == "*" {
        return true;
    }

    let pattern: Vec<&str> = path::segments(pattern).collect();
    let route: Vec<&str> = path::segments(route).collect();

    // Iterative glob with single-star backtracking. `star` remembers the last
    // `*` seen and how far the route had got when it started consuming.
    let (mut p, mut r) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while r < route.len() {
        match pattern.get(p) {
            Some(&"*") => {
                // Mandatory first segment.
                star = Some((p, r + 1));
                p += 1;
                r += 1;
            }
            Some(literal) if *literal == route[r] => {
                p += 1;
                r += 1;
            }
            _ => match star {
                Some((star_p, consumed)) => {
                    star = Some((star_p, consumed + 1));
                    p = star_p + 1;
                    r = consumed + 1;
                }
                None => return false,
            },
        }
    }

    p == pattern.len()
}

impl<H: Clone> RouteTree<H> {
    /// Attaches `hook` to every endpoint whose pattern matches `pattern`.
    ///
    /// With `method` = [`Method::All`] the hook lands on endpoints of every
    /// method; otherwise only on endpoints registered for that exact method.
    /// Returns how many endpoints received the hook.
    ///
    /// Hooks attach to the final node shapes, so the tree must already be
    /// optimized.
    ///
    /// # Errors
    ///
    /// [`RouteError::HooksBeforeOptimize`] if [`optimize`](Self::optimize)
    /// has not run.
    pub fn add_hook(
        &mut self,
        phase: HookPhase,
        method: Method,
        pattern: &str,
        hook: H,
    ) -> Result<usize, RouteError> {
        if self.stage == Stage::Building {
            return Err(RouteError::HooksBeforeOptimize { pattern: pattern.to_owned() });
        }
        self.stage = Stage::Hooked;

        let mut attached = 0;
        let mut stack: Vec<&mut Node<H>> = vec![&mut self.root];
        while let Some(node) = stack.pop() {
            for endpoint in &mut node.endpoints {
                let method_ok = method == Method::All || endpoint.method == method;
                if !method_ok || !pattern_matches(pattern, &endpoint.pattern) {
                    continue;
                }
                let endpoint = Arc::make_mut(endpoint);
                if phase.before() {
                    endpoint.before_hooks.push(hook.clone());
                }
                if phase.after() {
                    endpoint.after_hooks.push(hook.clone());
                }
                attached += 1;
            }
            stack.extend(node.children.iter_mut());
        }

        if attached == 0 {
            warn!(%method, pattern, "hook matches no route");
        } else {
            debug!(%method, pattern, ?phase, endpoints = attached, "hook attached");
        }
        Ok(attached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_everything() {
        assert!(pattern_matches("*", "/"));
        assert!(pattern_matches("*", "/a/b/c"));
        assert!(pattern_matches("/*", "/a"));
    }

    #[test]
    fn trailing_star_is_a_prefix_rule() {
        assert!(pattern_matches("/test/*", "/test/a"));
        assert!(pattern_matches("/test/*", "/test/a/b"));
        assert!(pattern_matches("/test/*", "/test/:id"));
        assert!(!pattern_matches("/test/*", "/test"));
        assert!(!pattern_matches("/test/*", "/other"));
        assert!(!pattern_matches("/test/*", "/testing/a"));
    }

    #[test]
    fn interior_star_resyncs() {
        assert!(pattern_matches("/test/*/v1", "/test/a/v1"));
        assert!(pattern_matches("/test/*/v1", "/test/a/b/v1"));
        assert!(pattern_matches("/test/*/v1", "/test/v1/v1"));
        assert!(!pattern_matches("/test/*/v1", "/test/a/v1/extra"));
        assert!(!pattern_matches("/test/*/v1", "/test/v1"));
    }

    #[test]
    fn several_stars() {
        assert!(pattern_matches("/a/*/b/*", "/a/x/b/y"));
        assert!(pattern_matches("/a/*/b/*", "/a/x/b/y/z"));
        assert!(pattern_matches("/a/*/b/*", "/a/x/y/b/z"));
        assert!(pattern_matches("/*/x/*", "/x/x/x"));
        assert!(!pattern_matches("/a/*/b/*", "/a/x/y/b"));
        assert!(!pattern_matches("/a/*/b/*", "/a/b/c"));
        assert!(!pattern_matches("/a/*/b/*", "/b/x/b/y"));
    }

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(pattern_matches("/users/:id", "/users/:id"));
        assert!(pattern_matches("/users/", "/users"));
        assert!(!pattern_matches("/users/:id", "/users/:id/posts"));
        assert!(!pattern_matches("/users", "/users/:id"));
        assert!(pattern_matches("/", "/"));
    }

    fn optimized(routes: &[(Method, &str)]) -> RouteTree<&'static str> {
        let mut tree = RouteTree::new();
        for (method, pattern) in routes {
            tree.add_route(*method, pattern, "handler").unwrap();
        }
        tree.optimize().unwrap();
        tree
    }

    #[test]
    fn hooks_require_an_optimized_tree() {
        let mut tree: RouteTree<&'static str> = RouteTree::new();
        tree.add_route(Method::Get, "/a", "a").unwrap();
        assert!(matches!(
            tree.add_hook(HookPhase::Before, Method::All, "*", "h"),
            Err(RouteError::HooksBeforeOptimize { .. })
        ));
    }

    #[test]
    fn optimize_after_hooks_fails_fast() {
        let mut tree = optimized(&[(Method::Get, "/a")]);
        tree.add_hook(HookPhase::Before, Method::All, "*", "h").unwrap();
        assert_eq!(tree.optimize(), Err(RouteError::OptimizeAfterHooks));
    }

    #[test]
    fn hooks_land_on_merged_endpoints_in_order() {
        let mut tree = optimized(&[(Method::Get, "/a/simple/route"), (Method::Get, "/other")]);
        tree.add_hook(HookPhase::Before, Method::All, "*", "global").unwrap();
        tree.add_hook(HookPhase::Before, Method::All, "/a/*", "scoped").unwrap();
        tree.add_hook(HookPhase::BeforeAndAfter, Method::All, "/a/simple/route", "both").unwrap();

        let m = tree.find_route(Method::Get, "/a/simple/route").unwrap();
        assert_eq!(m.before_hooks(), ["global", "scoped", "both"]);
        assert_eq!(m.after_hooks(), ["both"]);

        let other = tree.find_route(Method::Get, "/other").unwrap();
        assert_eq!(other.before_hooks(), ["global"]);
        assert!(other.after_hooks().is_empty());
    }

    #[test]
    fn method_scoped_hooks() {
        let mut tree = optimized(&[
            (Method::Get, "/items"),
            (Method::Post, "/items"),
            (Method::All, "/anything"),
        ]);
        let n = tree.add_hook(HookPhase::After, Method::Post, "*", "post-only").unwrap();
        assert_eq!(n, 1);

        assert!(tree.find_route(Method::Get, "/items").unwrap().after_hooks().is_empty());
        assert_eq!(tree.find_route(Method::Post, "/items").unwrap().after_hooks(), ["post-only"]);
        assert!(tree.find_route(Method::Post, "/anything").unwrap().after_hooks().is_empty());
    }

    #[test]
    fn unmatched_hook_reports_zero() {
        let mut tree = optimized(&[(Method::Get, "/a")]);
        assert_eq!(tree.add_hook(HookPhase::Before, Method::All, "/b/*", "h").unwrap(), 0);
    }
}
