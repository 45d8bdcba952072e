use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DispatchError;

/// A route competing for a given trie slot, ordered by descending priority
/// (stable on insertion order within a priority class).
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub route_id: Arc<str>,
    pub priority: i32,
}

/// One matching candidate returned from a lookup: the route it names, the
/// parameters bound along the path, and the priority used to order it
/// against other candidates from different trie slots.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route_id: Arc<str>,
    pub params: Vec<(String, String)>,
    pub priority: i32,
}

#[derive(Debug, Default)]
struct Node {
    literal: HashMap<String, Node>,
    param: Option<(String, Box<Node>)>,
    wildcard: Option<Box<Node>>,
    candidates: Vec<RouteCandidate>,
}

impl Node {
    fn push_candidate(&mut self, route_id: Arc<str>, priority: i32) {
        self.candidates.push(RouteCandidate { route_id, priority });
        self.candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    }
}

/// A hand-rolled radix trie over `/`-delimited URI paths. Supports literal
/// segments, `:name` parameter segments, and a trailing `*` wildcard segment
/// that matches the remainder of the path (including the empty remainder).
#[derive(Debug, Default)]
pub struct Trie {
    root: Node,
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `pattern` bound to `route_id` at `priority`. Patterns must be
    /// absolute (`/`-rooted); a segment literally equal to `*` must be the
    /// final segment.
    pub fn insert(&mut self, pattern: &str, route_id: Arc<str>, priority: i32) -> Result<(), DispatchError> {
        let segments = split_segments(pattern);
        let mut node = &mut self.root;

        for (i, seg) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;
            if *seg == "*" {
                if !is_last {
                    return Err(DispatchError::InvalidPattern(
                        pattern.to_string(),
                        "`*` wildcard must be the final path segment".to_string(),
                    ));
                }
                node = node.wildcard.get_or_insert_with(|| Box::new(Node::default()));
            } else if let Some(name) = seg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(DispatchError::InvalidPattern(
                        pattern.to_string(),
                        "`:` parameter segment must have a name".to_string(),
                    ));
                }
                match &mut node.param {
                    Some((existing, child)) if existing == name => {
                        node = child;
                    }
                    Some((existing, _)) => {
                        return Err(DispatchError::InvalidPattern(
                            pattern.to_string(),
                            format!("conflicting parameter name `{}` (expected `{}`)", name, existing),
                        ));
                    }
                    None => {
                        node.param = Some((name.to_string(), Box::new(Node::default())));
                        node = &mut node.param.as_mut().unwrap().1;
                    }
                }
            } else {
                node = node.literal.entry(seg.to_string()).or_default();
            }
        }

        node.push_candidate(route_id, priority);
        Ok(())
    }

    /// Collect every candidate whose pattern matches `path`, merged across
    /// literal/param/wildcard slots and sorted by descending priority
    /// (stable within a priority class in the order slots were visited:
    /// literal before param before wildcard, shallower before deeper).
    pub fn matches(&self, path: &str) -> Vec<RouteMatch> {
        let segments = split_segments(path);
        let mut out = Vec::new();
        let mut params = Vec::new();
        Self::collect(&self.root, &segments, &mut params, &mut out);
        out.sort_by(|a, b| b.priority.cmp(&a.priority));
        out
    }

    fn collect(node: &Node, remaining: &[&str], params: &mut Vec<(String, String)>, out: &mut Vec<RouteMatch>) {
        // Literal and param candidates are collected before this node's
        // wildcard so that, after the stable sort in `matches`, equal-priority
        // ties resolve literal > param > wildcard (SPEC_FULL.md §4.1.1).
        match remaining.split_first() {
            None => {
                for c in &node.candidates {
                    out.push(RouteMatch {
                        route_id: c.route_id.clone(),
                        params: params.clone(),
                        priority: c.priority,
                    });
                }
            }
            Some((seg, rest)) => {
                if let Some(child) = node.literal.get(*seg) {
                    Self::collect(child, rest, params, out);
                }
                if let Some((name, child)) = &node.param {
                    params.push((name.clone(), (*seg).to_string()));
                    Self::collect(child, rest, params, out);
                    params.pop();
                }
            }
        }

        // A wildcard child matches the rest of the path unconditionally,
        // including when `remaining` is empty; it is the least specific of
        // the three slot kinds, so it is collected last.
        if let Some(wc) = &node.wildcard {
            for c in &wc.candidates {
                out.push(RouteMatch {
                    route_id: c.route_id.clone(),
                    params: params.clone(),
                    priority: c.priority,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn exact_match() {
        let mut t = Trie::new();
        t.insert("/foo/bar", id("r1"), 0).unwrap();
        let m = t.matches("/foo/bar");
        assert_eq!(m.len(), 1);
        assert_eq!(&*m[0].route_id, "r1");
    }

    #[test]
    fn no_match_for_unknown_path() {
        let mut t = Trie::new();
        t.insert("/foo/bar", id("r1"), 0).unwrap();
        assert!(t.matches("/foo/baz").is_empty());
    }

    #[test]
    fn parametric_segment_binds_value() {
        let mut t = Trie::new();
        t.insert("/users/:id", id("r1"), 0).unwrap();
        let m = t.matches("/users/42");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn trailing_wildcard_matches_remainder_including_empty() {
        let mut t = Trie::new();
        t.insert("/assets/*", id("r1"), 0).unwrap();
        assert_eq!(t.matches("/assets/js/a.js").len(), 1);
        assert_eq!(t.matches("/assets").len(), 1); // trailing `*` matches an empty remainder too
        assert_eq!(t.matches("/assets/").len(), 1);
    }

    #[test]
    fn priority_orders_candidates_from_different_slots() {
        let mut t = Trie::new();
        t.insert("/users/:id", id("param"), 0).unwrap();
        t.insert("/users/*", id("wild"), 5).unwrap();
        let m = t.matches("/users/42");
        assert_eq!(m.len(), 2);
        assert_eq!(&*m[0].route_id, "wild");
        assert_eq!(&*m[1].route_id, "param");
    }

    #[test]
    fn conflicting_param_names_at_same_slot_rejected() {
        let mut t = Trie::new();
        t.insert("/users/:id", id("r1"), 0).unwrap();
        let err = t.insert("/users/:name", id("r2"), 0).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPattern(_, _)));
    }

    #[test]
    fn non_final_wildcard_rejected() {
        let mut t = Trie::new();
        let err = t.insert("/*/bar", id("r1"), 0).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPattern(_, _)));
    }

    #[test]
    fn equal_priority_ties_prefer_literal_then_param_then_wildcard() {
        let mut t = Trie::new();
        t.insert("/users/*", id("wild"), 0).unwrap();
        t.insert("/users/:id", id("param"), 0).unwrap();
        t.insert("/users/42", id("literal"), 0).unwrap();
        let m = t.matches("/users/42");
        assert_eq!(m.len(), 3);
        assert_eq!(&*m[0].route_id, "literal");
        assert_eq!(&*m[1].route_id, "param");
        assert_eq!(&*m[2].route_id, "wild");
    }

    #[test]
    fn same_priority_candidates_are_stable_by_insertion_order() {
        let mut t = Trie::new();
        t.insert("/foo", id("first"), 1).unwrap();
        t.insert("/foo", id("second"), 1).unwrap();
        let m = t.matches("/foo");
        assert_eq!(&*m[0].route_id, "first");
        assert_eq!(&*m[1].route_id, "second");
    }
}
