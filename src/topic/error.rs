//! Error types and utilities for the topic module
//!
//! This module contains the composite error type and shared constants
//! for the entire topic module, while individual error types remain
//! in their respective modules.

use thiserror::Error;

use super::topic_match::TopicMatchError;
use super::topic_pattern_item::TopicPatternError;

/// Comprehensive error type for all topic-related operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
	/// Topic pattern parsing or validation error
	#[error("Topic pattern error: {0}")]
	Pattern(#[from] TopicPatternError),

	/// Topic matching operation error
	#[error("Topic match error: {0}")]
	Match(#[from] TopicMatchError),

	/// Incoming topic rejected before matching
	#[error("Invalid topic '{topic}': {reason}")]
	InvalidTopic {
		/// Offending topic, truncated for long inputs
		topic: String,
		/// Why it was rejected
		reason: &'static str,
	},
}

impl TopicError {
	/// Creates a new InvalidTopic error
	pub fn invalid_topic(topic: &str, reason: &'static str) -> Self {
		let topic = topic.chars().take(limits::MAX_REPORTED_TOPIC).collect();
		Self::InvalidTopic { topic, reason }
	}
}

/// Topic processing limits and constants
pub mod limits {
	/// Maximum topic length allowed by the MQTT protocol
	pub const MAX_TOPIC_LENGTH: usize = 65535;

	/// Characters of an invalid topic kept in error reports
	pub const MAX_REPORTED_TOPIC: usize = 128;
}

/// Validation utilities for topic operations
pub mod validation {
	use super::TopicError;
	use super::limits::*;

	/// Validates an incoming concrete topic before it is matched.
	pub fn validate_topic_path(path: &str) -> Result<(), TopicError> {
		if path.is_empty() {
			return Err(TopicError::invalid_topic(path, "topic is empty"));
		}

		if path.len() > MAX_TOPIC_LENGTH {
			return Err(TopicError::invalid_topic(path, "topic is too long"));
		}

		if path.contains('\0') {
			return Err(TopicError::invalid_topic(
				path,
				"topic contains a null byte",
			));
		}

		if path.contains(['+', '#']) {
			return Err(TopicError::invalid_topic(
				path,
				"topic contains wildcard characters",
			));
		}

		Ok(())
	}
}
