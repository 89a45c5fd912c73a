use std::fmt;

/// QueryKey
///
/// Ordered tuple identifying one logical query: operation name first, then
/// every parameter that affects the result. Two requests with equal keys are
/// the same query regardless of which endpoint serves them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    parts: Vec<String>,
}

impl QueryKey {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            parts: vec![operation.into()],
        }
    }

    /// Appends a positional part.
    pub fn with(mut self, part: impl fmt::Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Appends a named part (`name=value`), so optional parameters cannot
    /// collide positionally.
    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.parts.push(format!("{name}={value}"));
        self
    }

    pub fn operation(&self) -> &str {
        &self.parts[0]
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// True when `prefix` equals the leading parts of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.parts.starts_with(&prefix.parts)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.parts.join(", "))
    }
}
