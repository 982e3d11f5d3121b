use std::collections::VecDeque;

/// Fixed-capacity rolling cache of stream names known to exist.
///
/// When full, appending a name evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct StreamNameCache {
    capacity: usize,
    names: VecDeque<String>,
}

impl StreamNameCache {
    /// Empty cache holding at most `capacity` names.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            names: VecDeque::with_capacity(capacity),
        }
    }

    /// Whether `name` is cached.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|cached| cached == name)
    }

    /// Cache `name`, evicting the oldest entry when full.
    pub fn rolling_append(&mut self, name: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.names.len() == self.capacity {
            self.names.pop_front();
        }
        self.names.push_back(name.into());
    }

    /// Forget every name.
    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Number of cached names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
