//! Subscription pattern segments and pattern parsing errors

use std::borrow::Cow;
use std::convert::TryFrom;

use arcstr::Substr;
use thiserror::Error;

/// Error types for subscription pattern compilation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicPatternError {
	/// Hash wildcard (#) used not at the end of the pattern
	#[error(
		"Invalid topic pattern '{pattern}': # wildcard can only be the last \
		 segment"
	)]
	HashPosition {
		/// The invalid pattern
		pattern: String,
	},

	/// Wildcard characters (+ or #) used incorrectly inside a segment
	#[error("Invalid wildcard usage: {usage}")]
	WildcardUsage {
		/// Description of invalid usage
		usage: String,
	},

	/// Empty topic is not valid
	#[error("Topic pattern cannot be empty")]
	EmptyTopic,

	/// Two adjacent separators produced an empty interior segment
	#[error(
		"Invalid topic pattern '{pattern}': empty segment at position \
		 {position}"
	)]
	EmptySegment {
		/// The invalid pattern
		pattern: String,
		/// Zero-based segment index
		position: usize,
	},

	/// Named parameters (`+name+`) combined with bare `+` wildcards
	#[error(
		"Invalid topic pattern '{pattern}': named parameters and positional \
		 '+' wildcards cannot be mixed"
	)]
	MixedParameterStyle {
		/// The invalid pattern
		pattern: String,
	},

	/// The same parameter name appears twice
	#[error("Invalid topic pattern '{pattern}': duplicate parameter '{name}'")]
	DuplicateParameter {
		/// The invalid pattern
		pattern: String,
		/// Repeated parameter name
		name: String,
	},
}

impl TopicPatternError {
	/// Creates a new HashPosition error
	pub fn hash_position(pattern: impl Into<String>) -> Self {
		Self::HashPosition {
			pattern: pattern.into(),
		}
	}

	/// Creates a new WildcardUsage error
	pub fn wildcard_usage(usage: impl Into<String>) -> Self {
		Self::WildcardUsage {
			usage: usage.into(),
		}
	}

	/// Creates a new EmptySegment error
	pub fn empty_segment(pattern: impl Into<String>, position: usize) -> Self {
		Self::EmptySegment {
			pattern: pattern.into(),
			position,
		}
	}

	/// Creates a new MixedParameterStyle error
	pub fn mixed_parameters(pattern: impl Into<String>) -> Self {
		Self::MixedParameterStyle {
			pattern: pattern.into(),
		}
	}

	/// Creates a new DuplicateParameter error
	pub fn duplicate_parameter(
		pattern: impl Into<String>,
		name: impl Into<String>,
	) -> Self {
		Self::DuplicateParameter {
			pattern: pattern.into(),
			name: name.into(),
		}
	}
}

/// Error raised when a subscription pattern cannot be compiled.
pub type InvalidPatternError = TopicPatternError;

/// One segment of a compiled subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPatternItem {
	/// Literal segment, must equal the topic segment exactly
	Literal(Substr),
	/// `+`: exactly one segment, reported positionally
	SingleWildcard,
	/// `#`: zero or more trailing segments
	MultiWildcard,
	/// `+name+`: exactly one segment captured under `name`
	Parameter(Substr),
}

impl TopicPatternItem {
	/// Returns the transport-native form of the segment.
	///
	/// Parameters render back to `+`, the only single-level wildcard the
	/// broker understands.
	pub fn as_str(&self) -> &str {
		match self {
			| TopicPatternItem::Literal(s) => s,
			| TopicPatternItem::SingleWildcard
			| TopicPatternItem::Parameter(_) => "+",
			| TopicPatternItem::MultiWildcard => "#",
		}
	}

	/// Returns the segment as it was written in the pattern.
	pub fn as_template(&self) -> Cow<'_, str> {
		match self {
			| TopicPatternItem::Parameter(name) => {
				Cow::Owned(format!("+{name}+"))
			}
			| other => Cow::Borrowed(other.as_str()),
		}
	}

	/// Returns parameter name for named parameters.
	pub fn param_name(&self) -> Option<&Substr> {
		match self {
			| TopicPatternItem::Parameter(name) => Some(name),
			| _ => None,
		}
	}

	/// Returns true if this item consumes a topic segment without comparing it.
	pub fn is_wildcard(&self) -> bool {
		!matches!(self, TopicPatternItem::Literal(_))
	}

	/// Returns true for segments whose value ends up in the parameter binding.
	pub fn is_capturing(&self) -> bool {
		matches!(
			self,
			TopicPatternItem::SingleWildcard | TopicPatternItem::Parameter(_)
		)
	}
}

impl std::fmt::Display for TopicPatternItem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_template())
	}
}

fn is_parameter_name(name: &str) -> bool {
	!name.is_empty()
		&& name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl TryFrom<Substr> for TopicPatternItem {
	type Error = TopicPatternError;
	fn try_from(item: Substr) -> Result<Self, Self::Error> {
		let res = match item.as_str() {
			| "+" => TopicPatternItem::SingleWildcard,
			| "#" => TopicPatternItem::MultiWildcard,
			| s if s.len() > 2 && s.starts_with('+') && s.ends_with('+') => {
				let inner = &s[1 .. s.len() - 1];
				if !is_parameter_name(inner) {
					return Err(TopicPatternError::wildcard_usage(s));
				}
				TopicPatternItem::Parameter(item.substr(1 .. s.len() - 1))
			}
			| s if s.contains(['+', '#']) => {
				return Err(TopicPatternError::wildcard_usage(s));
			}
			| _ => TopicPatternItem::Literal(item),
		};
		Ok(res)
	}
}
