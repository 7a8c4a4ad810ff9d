//! Incoming topics and the parameters extracted from them
#![allow(clippy::missing_docs_in_private_items)]
#![allow(missing_docs)]

use std::fmt;

use arcstr::{ArcStr, Substr};
use smallvec::SmallVec;
use thiserror::Error;

/// A concrete topic split into its `/`-separated segments.
///
/// Segments are views into the shared topic string, so parameters captured
/// from it never copy.
#[derive(Debug, Clone)]
pub struct TopicPath {
	pub path: ArcStr,
	pub segments: Vec<Substr>,
}

impl TopicPath {
	pub fn new(path: impl Into<ArcStr>) -> Self {
		let path = path.into();
		let segments: Vec<Substr> =
			path.split('/').map(|s| path.substr_from(s)).collect();
		Self { path, segments }
	}

	pub fn path(&self) -> ArcStr {
		self.path.clone()
	}

	pub fn len(&self) -> usize {
		self.segments.len()
	}

	pub fn is_empty(&self) -> bool {
		self.path.is_empty()
	}
}

impl fmt::Display for TopicPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.path)
	}
}

/// Why a topic did not match a pattern
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicMatchError {
	/// Topic has segments left after the pattern ended
	#[error("Topic is longer than the pattern")]
	UnexpectedEndOfPattern,
	/// Pattern has segments left after the topic ended
	#[error("Topic is shorter than the pattern")]
	UnexpectedEndOfTopic,
	/// Literal segment differs from the topic segment
	#[error(
		"Segment mismatch at position {position}: expected '{expected}', \
		 found '{found}'"
	)]
	SegmentMismatch {
		expected: String,
		found: String,
		position: usize,
	},
}

/// Parameters extracted from a matched topic.
///
/// A pattern either names all of its parameters (`+id+`) or none of them
/// (`+`), so a binding is a name map or an ordered list, never both.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TopicParams {
	/// Pattern had no capturing segments
	#[default]
	Empty,
	/// `+name+` captures in pattern order
	Named(SmallVec<[(Substr, Substr); 4]>),
	/// Bare `+` captures, left to right
	Positional(SmallVec<[Substr; 4]>),
}

impl TopicParams {
	/// Number of captured values.
	pub fn len(&self) -> usize {
		match self {
			| TopicParams::Empty => 0,
			| TopicParams::Named(values) => values.len(),
			| TopicParams::Positional(values) => values.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Value captured under `name`.
	pub fn get(&self, name: &str) -> Option<&str> {
		match self {
			| TopicParams::Named(values) => values
				.iter()
				.find(|(n, _)| n.as_str() == name)
				.map(|(_, v)| v.as_str()),
			| _ => None,
		}
	}

	/// Value captured at `index`, counting capturing segments left to right.
	///
	/// Works for both styles; named captures are indexed in pattern order.
	pub fn get_index(&self, index: usize) -> Option<&str> {
		match self {
			| TopicParams::Empty => None,
			| TopicParams::Named(values) => {
				values.get(index).map(|(_, v)| v.as_str())
			}
			| TopicParams::Positional(values) => {
				values.get(index).map(Substr::as_str)
			}
		}
	}

	/// Captured values in pattern order.
	pub fn values(&self) -> Vec<&str> {
		(0 .. self.len()).filter_map(|i| self.get_index(i)).collect()
	}

	pub fn is_named(&self) -> bool {
		matches!(self, TopicParams::Named(_))
	}
}

impl fmt::Display for TopicParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| TopicParams::Empty => write!(f, "{{}}"),
			| TopicParams::Named(values) => {
				write!(f, "{{")?;
				for (i, (name, value)) in values.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{name}: {value}")?;
				}
				write!(f, "}}")
			}
			| TopicParams::Positional(values) => {
				write!(f, "[")?;
				for (i, value) in values.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{value}")?;
				}
				write!(f, "]")
			}
		}
	}
}
