//! Topic handling module
//!
//! Compiles subscription patterns (`+`, `#` and named `+name+` parameters)
//! and matches concrete topics against them.

// Submodules
pub mod error;
pub mod topic_match;
pub mod topic_pattern_item;
/// Topic pattern parsing and matching
pub mod topic_pattern_path;


// Re-export commonly used types for convenience
pub use error::TopicError;
pub use error::{limits, validation};
pub use topic_match::{TopicMatchError, TopicParams, TopicPath};
pub use topic_pattern_item::{
	InvalidPatternError, TopicPatternError, TopicPatternItem,
};
pub use topic_pattern_path::{ParameterStyle, TopicPatternPath};

/// Compiles a subscription pattern.
pub fn compile(
	pattern: &str,
) -> Result<TopicPatternPath, InvalidPatternError> {
	TopicPatternPath::new_from_string(pattern)
}

/// Matches a concrete topic against a compiled pattern.
pub fn match_topic(
	topic: &str,
	pattern: &TopicPatternPath,
) -> Option<TopicParams> {
	pattern.matches(&TopicPath::new(topic))
}
