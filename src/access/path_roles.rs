use std::collections::BTreeSet;

use crate::role::Role;

/// Splits a request path into its non-empty segments, ignoring any query or
/// fragment suffix.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end].split('/').filter(|segment| !segment.is_empty())
}

fn is_locale(segment: &str, locales: &[String]) -> bool {
    locales
        .iter()
        .any(|locale| locale.eq_ignore_ascii_case(segment))
}

/// normalize_path
///
/// Canonical form used for every route lookup: a single leading `/`, no
/// empty or trailing segments, and no leading locale segments. All leading
/// locale segments are stripped, so normalizing twice yields the same path.
pub fn normalize_path(path: &str, locales: &[String]) -> String {
    let rest: Vec<&str> = segments(path)
        .skip_while(|segment| is_locale(segment, locales))
        .collect();
    format!("/{}", rest.join("/"))
}

/// Returns the locale segment a path starts with, if any.
pub fn locale_of<'a>(path: &'a str, locales: &[String]) -> Option<&'a str> {
    segments(path)
        .next()
        .filter(|segment| is_locale(segment, locales))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// RoutePattern
///
/// A normalized path template and the roles allowed to view it. An empty
/// role set marks the route as unrestricted.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
    // Trailing `**`: matches zero or more further segments.
    tail: bool,
    roles: BTreeSet<Role>,
}

impl RoutePattern {
    pub fn new(pattern: &str, roles: impl IntoIterator<Item = Role>) -> Self {
        let mut parts: Vec<&str> = segments(pattern).collect();
        let tail = parts.last() == Some(&"**");
        if tail {
            parts.pop();
        }

        let segments = parts
            .into_iter()
            .map(|part| match part {
                "*" => Segment::Any,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect::<Vec<_>>();

        let mut raw = String::new();
        for segment in &segments {
            raw.push('/');
            match segment {
                Segment::Literal(literal) => raw.push_str(literal),
                Segment::Any => raw.push('*'),
            }
        }
        if tail {
            raw.push_str("/**");
        }
        if raw.is_empty() {
            raw.push('/');
        }

        Self {
            raw,
            segments,
            tail,
            roles: roles.into_iter().collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn is_unrestricted(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn permits(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    fn matches(&self, path_segments: &[&str]) -> bool {
        let fixed = self.segments.len();
        let length_ok = if self.tail {
            path_segments.len() >= fixed
        } else {
            path_segments.len() == fixed
        };

        length_ok
            && self
                .segments
                .iter()
                .zip(path_segments)
                .all(|(segment, actual)| match segment {
                    Segment::Literal(literal) => literal == actual,
                    Segment::Any => true,
                })
    }

    // More literal segments win, then more fixed segments, then exact
    // length over a `**` tail.
    fn specificity(&self) -> (usize, usize, bool) {
        let literals = self
            .segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Literal(_)))
            .count();
        (literals, self.segments.len(), !self.tail)
    }
}

/// PathRoleMap
///
/// Static table from route patterns to the roles permitted to view them.
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct PathRoleMap {
    locales: Vec<String>,
    patterns: Vec<RoutePattern>,
}

impl PathRoleMap {
    pub fn new(locales: Vec<String>) -> Self {
        Self {
            locales,
            patterns: Vec::new(),
        }
    }

    /// Restricts `pattern` to the given roles.
    pub fn restrict(mut self, pattern: &str, roles: impl IntoIterator<Item = Role>) -> Self {
        self.patterns.push(RoutePattern::new(pattern, roles));
        self
    }

    /// Declares `pattern` as reachable by any role, overriding a less
    /// specific restriction.
    pub fn open(self, pattern: &str) -> Self {
        self.restrict(pattern, [])
    }

    /// The route table of the administration console.
    pub fn console(locales: Vec<String>) -> Self {
        use Role::{Admin, Khoa, Pdt, Student};

        Self::new(locales)
            .restrict("/students", [Admin, Pdt, Khoa])
            .restrict("/students/*", [Admin, Pdt])
            .restrict("/classes", [Admin, Pdt, Khoa])
            .restrict("/class/*/students", [Pdt, Khoa])
            .restrict("/departments", [Admin, Pdt])
            .restrict("/degrees", [Admin, Pdt, Khoa, Student])
            .restrict("/certificates", [Admin, Pdt, Khoa, Student])
            .restrict("/wallets", [Admin])
            .restrict("/student/**", [Student])
            .open("/notifications/**")
            .open("/profile")
            .open("/logout")
            .open("/login")
            .open("/student/login")
    }

    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    pub fn normalize(&self, path: &str) -> String {
        normalize_path(path, &self.locales)
    }

    /// Finds the most specific pattern matching an already-normalized path.
    /// On equal specificity the pattern declared first wins.
    pub fn lookup(&self, normalized: &str) -> Option<&RoutePattern> {
        let path_segments: Vec<&str> = segments(normalized).collect();
        self.patterns
            .iter()
            .filter(|pattern| pattern.matches(&path_segments))
            .fold(None, |best: Option<&RoutePattern>, candidate| match best {
                Some(best) if best.specificity() >= candidate.specificity() => Some(best),
                _ => Some(candidate),
            })
    }
}
