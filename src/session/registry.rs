/// Outcome of registering a source name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Accepted,
    /// The name is already registered; the registry is unchanged.
    Duplicate,
    /// The registry is at its bound; the registry is unchanged.
    Full { limit: usize },
}

/// Insertion-ordered list of ingested source names, bounded at a fixed
/// maximum. Files and URLs share the one counter.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    names: Vec<String>,
    limit: usize,
}

impl SourceRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            names: Vec::new(),
            limit,
        }
    }

    pub fn register(&mut self, name: &str) -> RegisterOutcome {
        if self.names.iter().any(|n| n == name) {
            return RegisterOutcome::Duplicate;
        }
        if self.names.len() >= self.limit {
            return RegisterOutcome::Full { limit: self.limit };
        }
        self.names.push(name.to_string());
        RegisterOutcome::Accepted
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Names in insertion order; exposed for display only.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
