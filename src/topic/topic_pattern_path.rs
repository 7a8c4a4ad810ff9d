use std::collections::HashSet;
use std::convert::TryFrom;
use std::slice::Iter;

use arcstr::{ArcStr, Substr};
use smallvec::SmallVec;

use super::topic_pattern_item::{TopicPatternError, TopicPatternItem};
use crate::topic::topic_match::{TopicMatchError, TopicParams, TopicPath};

/// How a pattern reports the values of its capturing segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterStyle {
	/// No `+` or `+name+` segments
	None,
	/// Every capturing segment is a `+name+` parameter
	Named,
	/// Every capturing segment is a bare `+`
	Positional,
}

/// Compiled subscription pattern.
///
/// Holds the typed segments, the broker-facing filter (`+`/`#` only) and
/// the parameter style. Immutable once built.
#[derive(Debug, Clone)]
pub struct TopicPatternPath {
	template_pattern: ArcStr, // as registered: "devices/+id+/status"
	mqtt_topic_subscription: ArcStr, // broker filter: "devices/+/status"
	segments: Vec<TopicPatternItem>,
	parameter_style: ParameterStyle,
}

impl TopicPatternPath {
	/// Compiles a subscription pattern.
	pub fn new_from_string(
		topic_pattern: impl Into<ArcStr>,
	) -> Result<Self, TopicPatternError> {
		let topic_pattern = topic_pattern.into();
		if topic_pattern.is_empty() || topic_pattern.trim().is_empty() {
			return Err(TopicPatternError::EmptyTopic);
		}

		// Leading and trailing empty levels are legal MQTT and compile to
		// empty literals; only interior ones are rejected
		let last = topic_pattern.split('/').count() - 1;
		let mut segments = Vec::with_capacity(last + 1);
		for (position, raw) in topic_pattern.split('/').enumerate() {
			if raw.is_empty() && position != 0 && position != last {
				return Err(TopicPatternError::empty_segment(
					topic_pattern.as_str(),
					position,
				));
			}
			let raw = topic_pattern.substr_from(raw);
			segments.push(TopicPatternItem::try_from(raw)?);
		}

		Self::from_segments(topic_pattern, segments)
	}

	/// Validates segment structure and derives the broker filter.
	fn from_segments(
		template_pattern: ArcStr,
		segments: Vec<TopicPatternItem>,
	) -> Result<Self, TopicPatternError> {
		if let Some(hash_pos) = segments
			.iter()
			.position(|s| matches!(*s, TopicPatternItem::MultiWildcard))
		{
			if hash_pos != segments.len() - 1 {
				return Err(TopicPatternError::hash_position(
					template_pattern.as_str(),
				));
			}
		}

		let mut seen_names = HashSet::new();
		for name in segments.iter().filter_map(TopicPatternItem::param_name) {
			if !seen_names.insert(name.as_str()) {
				return Err(TopicPatternError::duplicate_parameter(
					template_pattern.as_str(),
					name.as_str(),
				));
			}
		}

		let has_named = !seen_names.is_empty();
		let has_positional = segments
			.iter()
			.any(|s| matches!(s, TopicPatternItem::SingleWildcard));
		let parameter_style = match (has_named, has_positional) {
			| (true, true) => {
				return Err(TopicPatternError::mixed_parameters(
					template_pattern.as_str(),
				));
			}
			| (true, false) => ParameterStyle::Named,
			| (false, true) => ParameterStyle::Positional,
			| (false, false) => ParameterStyle::None,
		};

		Ok(Self {
			mqtt_topic_subscription: ArcStr::from(
				Self::to_mqtt_subscription_pattern(&segments),
			),
			template_pattern,
			segments,
			parameter_style,
		})
	}

	/// Returns MQTT filter with wildcards for broker subscription.
	pub fn mqtt_pattern(&self) -> ArcStr {
		self.mqtt_topic_subscription.clone()
	}

	/// Returns the pattern as it was registered.
	pub fn topic_pattern(&self) -> ArcStr {
		self.template_pattern.clone()
	}

	/// Returns how captured values are reported.
	pub fn parameter_style(&self) -> ParameterStyle {
		self.parameter_style
	}

	/// Returns true if pattern has no segments.
	pub fn is_empty(&self) -> bool {
		self.segments.is_empty()
	}

	/// Returns iterator over pattern segments.
	pub fn iter(&self) -> Iter<'_, TopicPatternItem> {
		self.segments.iter()
	}

	/// Returns number of segments in pattern.
	pub fn len(&self) -> usize {
		self.segments.len()
	}

	/// Returns pattern segments as slice.
	pub fn slice(&self) -> &[TopicPatternItem] {
		&self.segments
	}

	/// Names of the `+name+` parameters, in pattern order.
	pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
		self.segments
			.iter()
			.filter_map(TopicPatternItem::param_name)
			.map(Substr::as_str)
	}

	fn str_len(segments: &[TopicPatternItem]) -> usize {
		if segments.is_empty() {
			return 0;
		}
		(segments.len() - 1) + // slashes count
		segments.iter().map(|s| s.as_str().len()).sum::<usize>()
	}

	fn to_mqtt_subscription_pattern(segments: &[TopicPatternItem]) -> String {
		let mut mqtt_topic = String::with_capacity(Self::str_len(segments));
		segments.iter().enumerate().for_each(|(i, segment)| {
			if i > 0 {
				mqtt_topic.push('/');
			}
			mqtt_topic.push_str(segment.as_str());
		});
		mqtt_topic
	}

	/// Matches a concrete topic, returning the extracted parameters.
	pub fn matches(&self, topic: &TopicPath) -> Option<TopicParams> {
		self.try_match(topic).ok()
	}

	/// Matches a concrete topic, explaining the mismatch on failure.
	pub fn try_match(
		&self,
		topic: &TopicPath,
	) -> Result<TopicParams, TopicMatchError> {
		let mut topic_index = 0;
		let mut named = SmallVec::new();
		let mut positional = SmallVec::new();
		for pattern_segment in self.iter() {
			match pattern_segment {
				| TopicPatternItem::Literal(expected) => {
					let found = topic
						.segments
						.get(topic_index)
						.ok_or(TopicMatchError::UnexpectedEndOfTopic)?;
					if found != expected {
						return Err(TopicMatchError::SegmentMismatch {
							expected: expected.to_string(),
							found: found.to_string(),
							position: topic_index,
						});
					}
					topic_index += 1;
				}
				| TopicPatternItem::SingleWildcard => {
					let found = topic
						.segments
						.get(topic_index)
						.ok_or(TopicMatchError::UnexpectedEndOfTopic)?;
					positional.push(found.clone());
					topic_index += 1;
				}
				| TopicPatternItem::Parameter(name) => {
					let found = topic
						.segments
						.get(topic_index)
						.ok_or(TopicMatchError::UnexpectedEndOfTopic)?;
					named.push((name.clone(), found.clone()));
					topic_index += 1;
				}
				| TopicPatternItem::MultiWildcard => {
					// Compilation guarantees # is the final segment
					topic_index = topic.segments.len();
					break;
				}
			}
		}
		if topic_index < topic.segments.len() {
			return Err(TopicMatchError::UnexpectedEndOfPattern);
		}
		Ok(match self.parameter_style {
			| ParameterStyle::Named => TopicParams::Named(named),
			| ParameterStyle::Positional => TopicParams::Positional(positional),
			| ParameterStyle::None => TopicParams::Empty,
		})
	}
}

impl std::fmt::Display for TopicPatternPath {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.template_pattern)
	}
}

impl PartialEq for TopicPatternPath {
	fn eq(&self, other: &Self) -> bool {
		self.template_pattern == other.template_pattern
	}
}

impl Eq for TopicPatternPath {}

impl TryFrom<String> for TopicPatternPath {
	type Error = TopicPatternError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new_from_string(value)
	}
}

impl TryFrom<&str> for TopicPatternPath {
	type Error = TopicPatternError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::new_from_string(value)
	}
}

impl TryFrom<ArcStr> for TopicPatternPath {
	type Error = TopicPatternError;

	fn try_from(value: ArcStr) -> Result<Self, Self::Error> {
		Self::new_from_string(value)
	}
}

impl std::str::FromStr for TopicPatternPath {
	type Err = TopicPatternError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new_from_string(s)
	}
}
