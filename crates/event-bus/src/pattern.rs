//! Wildcard topic patterns
//!
//! A `*` matches any run of characters, including an empty one and including
//! `.` separators. Every other character matches itself literally, and the
//! pattern must cover the whole topic.

use crate::WILDCARD;

/// A compiled wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    /// The pattern string (e.g., "system.*.error")
    pattern: String,
    /// Literal runs between wildcards; `n` wildcards give `n + 1` runs
    literals: Vec<String>,
}

impl TopicPattern {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            literals: pattern.split(WILDCARD).map(str::to_string).collect(),
        }
    }

    /// Whether a topic string carries any wildcard token.
    #[must_use]
    pub fn is_pattern(topic: &str) -> bool {
        topic.contains(WILDCARD)
    }

    /// The source pattern string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Check if this pattern accepts a topic.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let (first, rest) = match self.literals.split_first() {
            Some(split) => split,
            None => return topic.is_empty(),
        };

        let Some((last, middle)) = rest.split_last() else {
            // No wildcard at all
            return topic == first;
        };

        if topic.len() < first.len() + last.len()
            || !topic.starts_with(first.as_str())
            || !topic.ends_with(last.as_str())
        {
            return false;
        }

        // Leftmost placement of each middle run is optimal for `*`-only globs
        let mut window = &topic[first.len()..topic.len() - last.len()];
        for literal in middle {
            match window.find(literal.as_str()) {
                Some(at) => window = &window[at + literal.len()..],
                None => return false,
            }
        }

        true
    }
}
