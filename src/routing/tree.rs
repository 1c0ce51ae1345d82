//! Per-method radix tree.
//!
//! # Responsibilities
//! - Store patterns (`/static`, `/:param`, `/*catchall`) compressed by prefix
//! - Resolve a request path to a value plus captured parameters
//! - Report when the opposite trailing-slash form would have matched
//! - Resolve case-insensitive spellings of a registered path
//!
//! # Design Decisions
//! - Node paths are stored as bytes; patterns are compared byte-wise
//! - Children are kept sorted by priority so hot subtrees are tried first
//! - A failed insert leaves the tree exactly as it was

use axum::http::Method;
use thiserror::Error;

use super::params::Params;

/// Errors raised while building the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("path must begin with '/' in pattern '{pattern}'")]
    MissingLeadingSlash { pattern: String },

    #[error("wildcard '{segment}' in pattern '{pattern}' conflicts with an existing route")]
    PatternConflict { pattern: String, segment: String },

    #[error("wildcards must be named with a non-empty name in pattern '{pattern}'")]
    EmptyName { pattern: String },

    #[error("catch-all routes are only allowed at the end of the path in pattern '{pattern}'")]
    CatchAllPosition { pattern: String },

    #[error("a handle is already registered for pattern '{pattern}'")]
    DuplicateRoute { pattern: String },

    #[error("unknown http method '{method}'")]
    UnknownMethod { method: String },

    #[error("route '{pattern}' has no handlers")]
    EmptyChain { pattern: String },

    #[error("route '{pattern}' has {count} handlers, at most {limit} are allowed")]
    TooManyHandlers {
        pattern: String,
        count: usize,
        limit: usize,
    },

    #[error("url parameters can not be used when serving a static file: '{pattern}'")]
    WildcardInStatic { pattern: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum NodeKind {
    #[default]
    Static,
    Root,
    Param,
    CatchAll,
}

/// A node of the radix tree.
#[derive(Debug, Clone)]
pub struct Node<T> {
    path: Vec<u8>,
    wild_child: bool,
    kind: NodeKind,
    max_params: usize,
    priority: u32,
    indices: Vec<u8>,
    children: Vec<Node<T>>,
    value: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            path: Vec::new(),
            wild_child: false,
            kind: NodeKind::Static,
            max_params: 0,
            priority: 0,
            indices: Vec::new(),
            children: Vec::new(),
            value: None,
        }
    }
}

/// Result of a tree lookup.
#[derive(Debug)]
pub struct Lookup<'n, T> {
    /// The value registered for the matched pattern.
    pub value: Option<&'n T>,
    /// Trailing-slash recommendation: the same path with the trailing
    /// slash added or removed would match.
    pub tsr: bool,
}

impl<T> Default for Lookup<'_, T> {
    fn default() -> Self {
        Self {
            value: None,
            tsr: false,
        }
    }
}

fn count_params(path: &[u8]) -> usize {
    path.iter().filter(|&&b| b == b':' || b == b'*').count()
}

fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl<T: Clone> Node<T> {
    /// Register `value` under `pattern`.
    ///
    /// On error the tree is restored to its state before the call.
    pub fn insert(&mut self, pattern: &str, value: T) -> Result<(), RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash {
                pattern: pattern.to_string(),
            });
        }
        let snapshot = self.clone();
        let result = self.add_route(pattern, value);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }
}

impl<T> Node<T> {
    /// Upper bound of parameters any match below this node can capture.
    pub fn max_params(&self) -> usize {
        self.max_params
    }

    fn add_route(&mut self, full_path: &str, value: T) -> Result<(), RouteError> {
        let mut path: &[u8] = full_path.as_bytes();
        let mut num_params = count_params(path);
        self.priority += 1;

        if self.path.is_empty() && self.children.is_empty() {
            self.insert_child(num_params, path, full_path, value)?;
            self.kind = NodeKind::Root;
            return Ok(());
        }

        let mut n: &mut Node<T> = self;
        loop {
            if num_params > n.max_params {
                n.max_params = num_params;
            }

            let i = longest_common_prefix(path, &n.path);

            // Split the edge.
            if i < n.path.len() {
                let mut child = Node {
                    path: n.path[i..].to_vec(),
                    wild_child: n.wild_child,
                    kind: NodeKind::Static,
                    max_params: 0,
                    priority: n.priority.saturating_sub(1),
                    indices: std::mem::take(&mut n.indices),
                    children: std::mem::take(&mut n.children),
                    value: n.value.take(),
                };
                child.max_params = child
                    .children
                    .iter()
                    .map(|c| c.max_params)
                    .max()
                    .unwrap_or(0);

                n.indices = vec![n.path[i]];
                n.children = vec![child];
                n.path.truncate(i);
                n.wild_child = false;
            }

            if i == path.len() {
                if n.value.is_some() {
                    return Err(RouteError::DuplicateRoute {
                        pattern: full_path.to_string(),
                    });
                }
                n.value = Some(value);
                return Ok(());
            }

            path = &path[i..];

            if n.wild_child {
                n = &mut n.children[0];
                n.priority += 1;
                if num_params > n.max_params {
                    n.max_params = num_params;
                }
                num_params = num_params.saturating_sub(1);

                if n.kind == NodeKind::CatchAll && path == &n.path[..] && n.value.is_some() {
                    return Err(RouteError::DuplicateRoute {
                        pattern: full_path.to_string(),
                    });
                }

                let wild_len = n.path.len();
                let same_wildcard = path.len() >= wild_len
                    && n.path[..] == path[..wild_len]
                    && n.kind != NodeKind::CatchAll
                    && (wild_len >= path.len() || path[wild_len] == b'/');
                if same_wildcard {
                    continue;
                }

                let segment = match n.kind {
                    NodeKind::CatchAll => lossy(path),
                    _ => lossy(path.split(|&b| b == b'/').next().unwrap_or_default()),
                };
                return Err(RouteError::PatternConflict {
                    pattern: full_path.to_string(),
                    segment,
                });
            }

            let c = path[0];

            // `/` after a param
            if n.kind == NodeKind::Param && c == b'/' && n.children.len() == 1 {
                n = &mut n.children[0];
                n.priority += 1;
                continue;
            }

            if let Some(pos) = n.indices.iter().position(|&b| b == c) {
                let pos = n.increment_child_prio(pos);
                n = &mut n.children[pos];
                continue;
            }

            if c != b':' && c != b'*' {
                n.indices.push(c);
                n.children.push(Node {
                    max_params: num_params,
                    ..Node::default()
                });
                let pos = n.increment_child_prio(n.indices.len() - 1);
                n = &mut n.children[pos];
            }
            return n.insert_child(num_params, path, full_path, value);
        }
    }

    fn increment_child_prio(&mut self, pos: usize) -> usize {
        self.children[pos].priority += 1;
        let prio = self.children[pos].priority;

        let mut new_pos = pos;
        while new_pos > 0 && self.children[new_pos - 1].priority < prio {
            self.children.swap(new_pos - 1, new_pos);
            new_pos -= 1;
        }

        if new_pos != pos {
            let c = self.indices.remove(pos);
            self.indices.insert(new_pos, c);
        }
        new_pos
    }

    fn insert_child(
        &mut self,
        mut num_params: usize,
        path: &[u8],
        full_path: &str,
        value: T,
    ) -> Result<(), RouteError> {
        let mut n: &mut Node<T> = self;
        let mut offset = 0;
        let max = path.len();
        let mut i = 0;

        while num_params > 0 && i < max {
            let c = path[i];
            if c != b':' && c != b'*' {
                i += 1;
                continue;
            }

            let mut end = i + 1;
            while end < max && path[end] != b'/' {
                if path[end] == b':' || path[end] == b'*' {
                    return Err(RouteError::PatternConflict {
                        pattern: full_path.to_string(),
                        segment: lossy(&path[i..]),
                    });
                }
                end += 1;
            }

            if !n.children.is_empty() {
                return Err(RouteError::PatternConflict {
                    pattern: full_path.to_string(),
                    segment: lossy(&path[i..end]),
                });
            }

            if end - i < 2 {
                return Err(RouteError::EmptyName {
                    pattern: full_path.to_string(),
                });
            }

            if c == b':' {
                if i > 0 {
                    n.path = path[offset..i].to_vec();
                    offset = i;
                }

                n.children = vec![Node {
                    kind: NodeKind::Param,
                    max_params: num_params,
                    ..Node::default()
                }];
                n.wild_child = true;
                n = &mut n.children[0];
                n.priority += 1;
                num_params -= 1;

                if end < max {
                    n.path = path[offset..end].to_vec();
                    offset = end;

                    n.children = vec![Node {
                        max_params: num_params,
                        priority: 1,
                        ..Node::default()
                    }];
                    n = &mut n.children[0];
                }
            } else {
                if end != max || num_params > 1 {
                    return Err(RouteError::CatchAllPosition {
                        pattern: full_path.to_string(),
                    });
                }

                if n.path.last() == Some(&b'/') {
                    return Err(RouteError::PatternConflict {
                        pattern: full_path.to_string(),
                        segment: lossy(&path[i..]),
                    });
                }

                if i == 0 || path[i - 1] != b'/' {
                    return Err(RouteError::CatchAllPosition {
                        pattern: full_path.to_string(),
                    });
                }
                let slash = i - 1;

                n.path = path[offset..slash].to_vec();

                let leaf = Node {
                    path: path[slash..].to_vec(),
                    kind: NodeKind::CatchAll,
                    max_params: 1,
                    priority: 1,
                    value: Some(value),
                    ..Node::default()
                };
                let catch_all = Node {
                    wild_child: true,
                    kind: NodeKind::CatchAll,
                    max_params: 1,
                    priority: 1,
                    children: vec![leaf],
                    ..Node::default()
                };
                if n.max_params < 1 {
                    n.max_params = 1;
                }
                n.children = vec![catch_all];
                n.indices = vec![path[slash]];
                return Ok(());
            }

            i += 1;
        }

        n.path = path[offset..].to_vec();
        n.value = Some(value);
        Ok(())
    }

    /// Look up `path`.
    ///
    /// Captured parameters are appended to `params` when it is supplied.
    /// When nothing matches, [`Lookup::tsr`] tells whether the path with
    /// the trailing slash added or removed would.
    pub fn get_value<'n>(&'n self, path: &str, mut params: Option<&mut Params>) -> Lookup<'n, T> {
        let mut path: &[u8] = path.as_bytes();
        let mut n = self;

        loop {
            if path.len() > n.path.len() {
                if path[..n.path.len()] == n.path[..] {
                    path = &path[n.path.len()..];

                    if !n.wild_child {
                        let c = path[0];
                        if let Some(pos) = n.indices.iter().position(|&b| b == c) {
                            n = &n.children[pos];
                            continue;
                        }
                        return Lookup {
                            value: None,
                            tsr: path == b"/" && n.value.is_some(),
                        };
                    }

                    n = &n.children[0];
                    match n.kind {
                        NodeKind::Param => {
                            let end = path.iter().position(|&b| b == b'/').unwrap_or(path.len());

                            if let Some(p) = params.as_mut() {
                                p.push(lossy(&n.path[1..]), lossy(&path[..end]));
                            }

                            if end < path.len() {
                                if let Some(next) = n.children.first() {
                                    path = &path[end..];
                                    n = next;
                                    continue;
                                }
                                return Lookup {
                                    value: None,
                                    tsr: path.len() == end + 1,
                                };
                            }

                            if let Some(value) = n.value.as_ref() {
                                return Lookup {
                                    value: Some(value),
                                    tsr: false,
                                };
                            }

                            let tsr = n.children.len() == 1
                                && n.children[0].path == b"/"
                                && n.children[0].value.is_some();
                            return Lookup { value: None, tsr };
                        }
                        NodeKind::CatchAll => {
                            if let Some(p) = params.as_mut() {
                                p.push(lossy(n.path.get(2..).unwrap_or_default()), lossy(path));
                            }
                            return Lookup {
                                value: n.value.as_ref(),
                                tsr: false,
                            };
                        }
                        _ => return Lookup::default(),
                    }
                }
            } else if path == &n.path[..] {
                if let Some(value) = n.value.as_ref() {
                    return Lookup {
                        value: Some(value),
                        tsr: false,
                    };
                }

                if path == b"/" && n.wild_child && n.kind != NodeKind::Root {
                    return Lookup {
                        value: None,
                        tsr: true,
                    };
                }

                let tsr = n
                    .indices
                    .iter()
                    .position(|&b| b == b'/')
                    .map(|pos| n.children[pos].has_slash_leaf())
                    .unwrap_or(false);
                return Lookup { value: None, tsr };
            }

            let tsr = path == b"/"
                || (n.path.len() == path.len() + 1
                    && n.path[path.len()] == b'/'
                    && path == &n.path[..path.len()]
                    && n.value.is_some());
            return Lookup { value: None, tsr };
        }
    }

    fn has_slash_leaf(&self) -> bool {
        (self.path.len() == 1 && self.value.is_some())
            || (self.kind == NodeKind::CatchAll
                && self.children.first().is_some_and(|c| c.value.is_some()))
    }

    /// Case-insensitive lookup.
    ///
    /// Returns the registered spelling of `path` when exactly one
    /// registered path matches it ignoring ASCII case. With
    /// `fix_trailing_slash` a missing or extra trailing slash is also
    /// corrected.
    pub fn find_case_insensitive_path(&self, path: &str, fix_trailing_slash: bool) -> Option<String> {
        let mut found = Vec::new();
        self.collect_case_insensitive(
            path.as_bytes(),
            Vec::with_capacity(path.len() + 1),
            fix_trailing_slash,
            &mut found,
        );
        found.sort();
        found.dedup();
        if found.len() != 1 {
            return None;
        }
        found.pop().and_then(|p| String::from_utf8(p).ok())
    }

    fn collect_case_insensitive(
        &self,
        path: &[u8],
        mut ci_path: Vec<u8>,
        fix: bool,
        out: &mut Vec<Vec<u8>>,
    ) {
        if out.len() > 1 {
            return;
        }
        let n = self;

        if path.len() >= n.path.len() && path[..n.path.len()].eq_ignore_ascii_case(&n.path) {
            let rest = &path[n.path.len()..];
            ci_path.extend_from_slice(&n.path);

            if rest.is_empty() {
                if n.value.is_some() {
                    out.push(ci_path);
                    return;
                }
                if fix {
                    let slash_leaf = n
                        .indices
                        .iter()
                        .position(|&b| b == b'/')
                        .map(|pos| n.children[pos].has_slash_leaf())
                        .unwrap_or(false);
                    if slash_leaf {
                        ci_path.push(b'/');
                        out.push(ci_path);
                    }
                }
                return;
            }

            if !n.wild_child {
                let lower = rest[0].to_ascii_lowercase();
                for (pos, &index) in n.indices.iter().enumerate() {
                    if index.to_ascii_lowercase() == lower {
                        n.children[pos].collect_case_insensitive(rest, ci_path.clone(), fix, out);
                    }
                }
                if fix && rest == b"/" && n.value.is_some() {
                    out.push(ci_path);
                }
                return;
            }

            let wild = &n.children[0];
            match wild.kind {
                NodeKind::Param => {
                    let end = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
                    ci_path.extend_from_slice(&rest[..end]);

                    if end < rest.len() {
                        if let Some(next) = wild.children.first() {
                            next.collect_case_insensitive(&rest[end..], ci_path, fix, out);
                        } else if fix && rest.len() == end + 1 {
                            out.push(ci_path);
                        }
                        return;
                    }

                    if wild.value.is_some() {
                        out.push(ci_path);
                    } else if fix
                        && wild.children.len() == 1
                        && wild.children[0].path == b"/"
                        && wild.children[0].value.is_some()
                    {
                        ci_path.push(b'/');
                        out.push(ci_path);
                    }
                }
                NodeKind::CatchAll => {
                    ci_path.extend_from_slice(rest);
                    out.push(ci_path);
                }
                _ => {}
            }
            return;
        }

        if fix {
            if path == b"/" {
                out.push(ci_path);
                return;
            }
            if path.len() + 1 == n.path.len()
                && n.path[path.len()] == b'/'
                && path.eq_ignore_ascii_case(&n.path[..path.len()])
                && n.value.is_some()
            {
                ci_path.extend_from_slice(&n.path);
                out.push(ci_path);
            }
        }
    }

    /// Visit every registered pattern below this node.
    pub fn walk<'n>(&'n self, f: &mut dyn FnMut(&str, &'n T)) {
        let mut prefix = Vec::new();
        self.walk_inner(&mut prefix, f);
    }

    fn walk_inner<'n>(&'n self, prefix: &mut Vec<u8>, f: &mut dyn FnMut(&str, &'n T)) {
        let len = prefix.len();
        prefix.extend_from_slice(&self.path);
        if let Some(value) = self.value.as_ref() {
            f(&String::from_utf8_lossy(prefix), value);
        }
        for child in &self.children {
            child.walk_inner(prefix, f);
        }
        prefix.truncate(len);
    }
}

/// The full routing table: one tree per method, in registration order.
#[derive(Debug, Clone)]
pub struct Trees<T> {
    trees: Vec<(Method, Node<T>)>,
}

impl<T> Default for Trees<T> {
    fn default() -> Self {
        Self { trees: Vec::new() }
    }
}

impl<T: Clone> Trees<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` for `method` + `pattern`.
    pub fn add(&mut self, method: &Method, pattern: &str, value: T) -> Result<(), RouteError> {
        let index = match self.trees.iter().position(|(m, _)| m == method) {
            Some(index) => index,
            None => {
                self.trees.push((method.clone(), Node::default()));
                self.trees.len() - 1
            }
        };
        let result = self.trees[index].1.insert(pattern, value);
        if result.is_err() && self.trees[index].1.value.is_none() && self.trees[index].1.children.is_empty() {
            self.trees.remove(index);
        }
        result
    }
}

impl<T> Trees<T> {
    pub fn get(&self, method: &Method) -> Option<&Node<T>> {
        self.trees.iter().find(|(m, _)| m == method).map(|(_, n)| n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Method, &Node<T>)> {
        self.trees.iter().map(|(m, n)| (m, n))
    }

    /// Largest number of parameters any route can capture.
    pub fn max_params(&self) -> usize {
        self.trees.iter().map(|(_, n)| n.max_params).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(routes: &[&str]) -> Node<String> {
        let mut root = Node::default();
        for route in routes {
            root.insert(route, route.to_string()).unwrap();
        }
        root
    }

    fn lookup(root: &Node<String>, path: &str) -> (Option<String>, Params) {
        let mut params = Params::default();
        let found = root.get_value(path, Some(&mut params)).value.cloned();
        (found, params)
    }

    #[test]
    fn test_static_and_param_lookup() {
        let root = tree(&[
            "/",
            "/cmd/:tool/:sub",
            "/cmd/:tool/",
            "/src/*filepath",
            "/search/",
            "/search/:query",
            "/user_:name",
            "/user_:name/about",
            "/files/:dir/*filepath",
            "/info/:user/public",
            "/info/:user/project/:project",
        ]);

        let (value, params) = lookup(&root, "/cmd/test/3");
        assert_eq!(value.as_deref(), Some("/cmd/:tool/:sub"));
        assert_eq!(params.get("tool"), Some("test"));
        assert_eq!(params.get("sub"), Some("3"));

        let (value, params) = lookup(&root, "/src/some/file.png");
        assert_eq!(value.as_deref(), Some("/src/*filepath"));
        assert_eq!(params.get("filepath"), Some("/some/file.png"));

        let (value, params) = lookup(&root, "/user_gopher/about");
        assert_eq!(value.as_deref(), Some("/user_:name/about"));
        assert_eq!(params.get("name"), Some("gopher"));

        let (value, params) = lookup(&root, "/files/js/inc/framework.js");
        assert_eq!(value.as_deref(), Some("/files/:dir/*filepath"));
        assert_eq!(params.get("dir"), Some("js"));
        assert_eq!(params.get("filepath"), Some("/inc/framework.js"));

        let (value, params) = lookup(&root, "/info/gordon/project/go");
        assert_eq!(value.as_deref(), Some("/info/:user/project/:project"));
        assert_eq!(params.len(), 2);

        let (value, _) = lookup(&root, "/search/");
        assert_eq!(value.as_deref(), Some("/search/"));

        let (value, _) = lookup(&root, "/cmd/test");
        assert!(value.is_none());
    }

    #[test]
    fn test_param_value_is_never_empty_match_for_static() {
        let root = tree(&["/user/:name"]);
        let lookup = root.get_value("/user/", None);
        assert!(lookup.value.is_none());
    }

    #[test]
    fn test_wildcard_conflicts() {
        let mut root = tree(&["/cmd/:tool/:sub", "/src/*filepath"]);

        let err = root.insert("/cmd/vet", "x".into()).unwrap_err();
        assert!(matches!(err, RouteError::PatternConflict { .. }));

        let err = root.insert("/cmd/:badvar/", "x".into()).unwrap_err();
        assert!(matches!(err, RouteError::PatternConflict { .. }));

        let err = root.insert("/src/*filepathx", "x".into()).unwrap_err();
        assert!(matches!(err, RouteError::PatternConflict { .. }));

        // The failed inserts left the tree untouched.
        let (value, _) = lookup(&root, "/cmd/test/3");
        assert_eq!(value.as_deref(), Some("/cmd/:tool/:sub"));
    }

    #[test]
    fn test_invalid_patterns() {
        let mut root: Node<String> = Node::default();

        assert!(matches!(
            root.insert("user", "x".into()),
            Err(RouteError::MissingLeadingSlash { .. })
        ));
        assert!(matches!(
            root.insert("/user/:", "x".into()),
            Err(RouteError::EmptyName { .. })
        ));
        assert!(matches!(
            root.insert("/src/*filepath/x", "x".into()),
            Err(RouteError::CatchAllPosition { .. })
        ));
        assert!(matches!(
            root.insert("/src/:a:b", "x".into()),
            Err(RouteError::PatternConflict { .. })
        ));
        assert!(matches!(
            root.insert("/src*filepath", "x".into()),
            Err(RouteError::CatchAllPosition { .. })
        ));
    }

    #[test]
    fn test_duplicate_route() {
        let mut root = tree(&["/", "/doc/", "/src/*filepath", "/search/:query"]);
        for pattern in ["/", "/doc/", "/src/*filepath", "/search/:query"] {
            let err = root.insert(pattern, "again".into()).unwrap_err();
            assert_eq!(
                err,
                RouteError::DuplicateRoute {
                    pattern: pattern.to_string()
                }
            );
        }
    }

    #[test]
    fn test_trailing_slash_recommendation() {
        let root = tree(&[
            "/hi",
            "/b/",
            "/search/:query",
            "/cmd/:tool/",
            "/src/*filepath",
            "/x",
            "/x/y",
            "/y/",
            "/y/z",
            "/0/:id",
            "/0/:id/1",
            "/1/:id/",
            "/1/:id/2",
            "/aa",
            "/a/",
            "/doc",
            "/doc/go_faq.html",
            "/doc/go1.html",
            "/no/a",
            "/no/b",
            "/api/hello/:name",
        ]);

        for path in [
            "/hi/", "/b", "/search/gopher/", "/cmd/vet", "/src", "/x/", "/y", "/0/go/", "/1/go",
            "/a", "/doc/",
        ] {
            let lookup = root.get_value(path, None);
            assert!(lookup.value.is_none(), "{path} should not match");
            assert!(lookup.tsr, "{path} should recommend a redirect");
        }

        for path in ["/", "/no", "/no/", "/_", "/_/", "/api/world/abc"] {
            let lookup = root.get_value(path, None);
            assert!(lookup.value.is_none(), "{path} should not match");
            assert!(!lookup.tsr, "{path} should not recommend a redirect");
        }
    }

    #[test]
    fn test_case_insensitive_path() {
        let root = tree(&["/hi", "/b/", "/ABC/", "/search/:query", "/src/*filepath", "/doc/go1.html"]);

        assert_eq!(root.find_case_insensitive_path("/HI", false).as_deref(), Some("/hi"));
        assert_eq!(root.find_case_insensitive_path("/abc/", false).as_deref(), Some("/ABC/"));
        assert_eq!(
            root.find_case_insensitive_path("/SEARCH/QueRy", false).as_deref(),
            Some("/search/QueRy")
        );
        assert_eq!(
            root.find_case_insensitive_path("/SRC/Some/File", false).as_deref(),
            Some("/src/Some/File")
        );
        assert_eq!(root.find_case_insensitive_path("/B", false), None);
        assert_eq!(root.find_case_insensitive_path("/B", true).as_deref(), Some("/b/"));
        assert_eq!(root.find_case_insensitive_path("/HI/", true).as_deref(), Some("/hi"));
        assert_eq!(root.find_case_insensitive_path("/nope", true), None);
    }

    #[test]
    fn test_case_insensitive_ambiguity() {
        let root = tree(&["/foo", "/FOO"]);
        assert_eq!(root.find_case_insensitive_path("/Foo", false), None);
    }

    #[test]
    fn test_priorities_and_walk() {
        let root = tree(&["/a", "/b/:x", "/c", "/d/e/*rest", "/c/d"]);
        let mut seen = Vec::new();
        root.walk(&mut |pattern, value| {
            assert_eq!(pattern, value.as_str());
            seen.push(pattern.to_string());
        });
        seen.sort();
        assert_eq!(seen, vec!["/a", "/b/:x", "/c", "/c/d", "/d/e/*rest"]);
    }

    #[test]
    fn test_trees_per_method() {
        let mut trees: Trees<u8> = Trees::new();
        trees.add(&Method::GET, "/items/:id", 1).unwrap();
        trees.add(&Method::POST, "/items", 2).unwrap();

        assert!(trees.get(&Method::PUT).is_none());
        let get = trees.get(&Method::GET).unwrap();
        assert_eq!(get.get_value("/items/9", None).value, Some(&1));
        assert_eq!(trees.max_params(), 1);
    }
}
