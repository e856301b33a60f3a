//! Route lookup.
//!
//! Depth-first walk over the tree with an explicit stack. Children are tried
//! in registration order and the first one whose subtree yields a complete
//! match (whole path consumed, endpoint serving the method) wins. A node's own
//! endpoint is tried before its children.
//!
//! Interior wildcards backtrack over their candidate ends. Once a wildcard has
//! failed every end from some start, any later start is skipped, since its
//! ends are a subset. Each wildcard's candidates are therefore scanned about
//! once per lookup, which keeps hostile paths like `/y/y/y/...` against
//! `/*/*/*/z` linear in path length.
//!
//! Nothing here allocates unless a path is deeper than the inline stack
//! capacity, binds more than four parameters or walks more than four
//! wildcards.

use std::collections::HashMap;
use std::ptr;
use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::method::Method;
use crate::path;
use crate::tree::{Endpoint, Node, NodeKind};

/// Parameter bindings of one match, borrowed from the tree (names) and the
/// request path (values).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params<'t, 'p>(SmallVec<[(&'t str, &'p str); 4]>);

impl<'t, 'p> Params<'t, 'p> {
    /// Value bound to `name`. If a pattern repeats a name, the last binding wins.
    pub fn get(&self, name: &str) -> Option<&'p str> {
        self.0.iter().rev().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }

    /// Bindings in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&'t str, &'p str)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Owned copy, for storing on a request context.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect()
    }
}

/// A successful lookup: the endpoint plus its parameter bindings.
#[derive(Debug)]
pub struct RouteMatch<'t, 'p, H> {
    endpoint: &'t Arc<Endpoint<H>>,
    params: Params<'t, 'p>,
}

impl<'t, 'p, H> RouteMatch<'t, 'p, H> {
    pub fn endpoint(&self) -> &'t Arc<Endpoint<H>> {
        self.endpoint
    }

    pub fn handler(&self) -> &'t H {
        &self.endpoint.handler
    }

    pub fn before_hooks(&self) -> &'t [H] {
        &self.endpoint.before_hooks
    }

    pub fn after_hooks(&self) -> &'t [H] {
        &self.endpoint.after_hooks
    }

    pub fn params(&self) -> &Params<'t, 'p> {
        &self.params
    }

    pub fn into_params(self) -> Params<'t, 'p> {
        self.params
    }
}

struct Frame<'t, H> {
    node: &'t Node<H>,
    /// Start of the next unconsumed segment's text.
    pos: usize,
    /// Next child to try.
    child: usize,
    /// Last end tried by a wildcard child; `None` before its first try.
    resume: Option<usize>,
    /// Bindings that belong to the path up to this frame.
    params_len: usize,
}

/// Wildcards with every candidate end already failed, with the smallest
/// start that happened from.
struct Spent<'t, H>(SmallVec<[(&'t Node<H>, usize); 4]>);

impl<'t, H> Spent<'t, H> {
    fn covers(&self, node: &Node<H>, pos: usize) -> bool {
        self.0.iter().any(|(n, from)| ptr::eq(*n, node) && *from <= pos)
    }

    fn record(&mut self, node: &'t Node<H>, pos: usize) {
        match self.0.iter_mut().find(|(n, _)| ptr::eq(*n, node)) {
            Some((_, from)) => *from = (*from).min(pos),
            None => self.0.push((node, pos)),
        }
    }
}

pub(crate) fn find<'t, 'p, H>(
    root: &'t Node<H>,
    method: Method,
    path: &'p str,
) -> Option<RouteMatch<'t, 'p, H>> {
    let path = path::trim_trailing(path);
    let len = path.len();
    // A missing leading slash is treated as present.
    let start = usize::from(path.starts_with('/')).min(len);

    if start == len {
        return root
            .endpoint_for(method)
            .map(|endpoint| RouteMatch { endpoint, params: Params::default() })
            .or_else(|| find_below(root, method, path, start));
    }
    find_below(root, method, path, start)
}

fn find_below<'t, 'p, H>(
    root: &'t Node<H>,
    method: Method,
    path: &'p str,
    start: usize,
) -> Option<RouteMatch<'t, 'p, H>> {
    let len = path.len();
    let mut spent = Spent(SmallVec::new());
    let mut params: SmallVec<[(&'t str, &'p str); 4]> = SmallVec::new();
    let mut stack: SmallVec<[Frame<'t, H>; 16]> = smallvec![Frame {
        node: root,
        pos: start,
        child: 0,
        resume: None,
        params_len: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        let node = frame.node;
        let Some(child) = node.children.get(frame.child) else {
            stack.pop();
            continue;
        };
        params.truncate(frame.params_len);
        let pos = frame.pos;

        let end = match &child.kind {
            NodeKind::Static(text) => {
                frame.child += 1;
                match_static(path, pos, text)
            }
            NodeKind::Parameter(name) => {
                frame.child += 1;
                let end = match_segment(path, pos);
                if let Some(end) = end {
                    params.push((name.as_str(), &path[pos..end]));
                }
                end
            }
            NodeKind::Wildcard if frame.resume.is_none() && spent.covers(child, pos) => {
                frame.child += 1;
                None
            }
            NodeKind::Wildcard => match wildcard_end(child, path, pos, frame.resume) {
                Some(end) => {
                    frame.resume = Some(end);
                    Some(end)
                }
                None => {
                    // An empty first segment tried nothing, so proves nothing
                    // about later starts.
                    if frame.resume.is_some() {
                        spent.record(child, pos);
                    }
                    frame.resume = None;
                    frame.child += 1;
                    None
                }
            },
        };

        let Some(end) = end else { continue };

        if end == len {
            if let Some(endpoint) = child.endpoint_for(method) {
                return Some(RouteMatch { endpoint, params: Params(params) });
            }
        }

        if !child.children.is_empty() {
            let params_len = params.len();
            stack.push(Frame {
                node: child,
                pos: next_segment(path, end),
                child: 0,
                resume: None,
                params_len,
            });
        }
    }
    None
}

/// Position of the segment after one ending at `end`.
fn next_segment(path: &str, end: usize) -> usize {
    if end < path.len() { end + 1 } else { end }
}

/// End of the segment starting at `pos`.
fn segment_end(path: &str, pos: usize) -> usize {
    path[pos..].find('/').map_or(path.len(), |i| pos + i)
}

fn match_static(path: &str, pos: usize, text: &str) -> Option<usize> {
    let end = pos + text.len();
    let at_boundary = end == path.len() || path.as_bytes().get(end) == Some(&b'/');
    (pos < path.len() && path[pos..].starts_with(text) && at_boundary).then_some(end)
}

/// One non-empty segment.
fn match_segment(path: &str, pos: usize) -> Option<usize> {
    if pos >= path.len() {
        return None;
    }
    let end = segment_end(path, pos);
    (end > pos).then_some(end)
}

/// Successive candidate ends for a wildcard starting at `pos`, shortest first.
///
/// A trailing wildcard (no children) swallows the whole remainder, including
/// an empty one. An interior wildcard consumes one or more whole segments,
/// the first of which must not be empty.
fn wildcard_end<H>(node: &Node<H>, path: &str, pos: usize, prev: Option<usize>) -> Option<usize> {
    let len = path.len();
    if node.children.is_empty() {
        return prev.is_none().then_some(len);
    }

    let from = match prev {
        None => pos,
        Some(prev) if prev < len => prev + 1,
        Some(_) => return None,
    };
    if from >= len {
        return (prev.is_none() && !node.endpoints.is_empty()).then_some(len);
    }
    let end = segment_end(path, from);
    (prev.is_some() || end > from).then_some(end)
}
