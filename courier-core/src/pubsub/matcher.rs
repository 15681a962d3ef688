//! Channel matching
//!
//! A subscription's channel pattern is either a literal name or a regular
//! expression. Both are validated and, for regexes, compiled exactly once
//! when the subscription is created; matching itself cannot fail.
//!
//! Regex patterns always match the *whole* channel name: `A.*` matches
//! `ABC` but not `xABC`.

use super::error::PubSubError;
use regex::Regex;
use std::fmt;

/// A validated channel pattern
#[derive(Clone)]
pub enum ChannelPattern {
    /// Case-sensitive exact channel name
    Literal(String),

    /// Regular expression, anchored at both ends
    Regex {
        /// Pattern text as supplied by the subscriber
        source: String,
        /// Compiled, anchored matcher
        compiled: Regex,
    },
}

impl ChannelPattern {
    /// Build a pattern, validating its length against `max_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `PatternTooLong` if the pattern is longer than `max_len`, or
    /// `InvalidPattern` if `is_regex` is set and the regex does not compile.
    pub fn new(pattern: &str, is_regex: bool, max_len: usize) -> Result<Self, PubSubError> {
        if pattern.len() > max_len {
            return Err(PubSubError::PatternTooLong {
                len: pattern.len(),
                max: max_len,
            });
        }

        if is_regex {
            Self::regex(pattern)
        } else {
            Ok(Self::literal(pattern))
        }
    }

    /// Literal pattern without length validation
    pub fn literal(name: impl Into<String>) -> Self {
        ChannelPattern::Literal(name.into())
    }

    /// Compile a regex pattern without length validation
    pub fn regex(pattern: &str) -> Result<Self, PubSubError> {
        let invalid = |e: regex::Error| PubSubError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        };

        // Unbalanced groups could otherwise close the anchoring group early
        Regex::new(pattern).map_err(invalid)?;
        let compiled = Regex::new(&format!("^(?:{})$", pattern)).map_err(invalid)?;

        Ok(ChannelPattern::Regex {
            source: pattern.to_string(),
            compiled,
        })
    }

    /// Whether `channel` matches this pattern
    #[inline]
    pub fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelPattern::Literal(name) => name == channel,
            ChannelPattern::Regex { compiled, .. } => compiled.is_match(channel),
        }
    }

    /// Pattern text as supplied at registration
    pub fn as_str(&self) -> &str {
        match self {
            ChannelPattern::Literal(name) => name,
            ChannelPattern::Regex { source, .. } => source,
        }
    }

    /// Whether this is a regex pattern
    pub fn is_regex(&self) -> bool {
        matches!(self, ChannelPattern::Regex { .. })
    }
}

impl fmt::Debug for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelPattern::Literal(name) => f.debug_tuple("Literal").field(name).finish(),
            ChannelPattern::Regex { source, .. } => f.debug_tuple("Regex").field(source).finish(),
        }
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match `candidate` against a pattern.
pub fn matches(pattern: &ChannelPattern, candidate: &str) -> bool {
    pattern.matches(candidate)
}
