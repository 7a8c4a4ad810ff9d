use arcstr::ArcStr;
use thiserror::Error;

/// Boxed error returned by user handlers and termination hooks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// JSON decoding was requested for a payload that is not valid JSON.
///
/// Recovered by delivering the payload as raw bytes.
#[derive(Debug, Error)]
#[error("Failed to decode {len}-byte payload as JSON: {source}")]
pub struct PayloadConversionError {
	/// Payload size in bytes
	pub len: usize,
	/// Underlying decoder error
	#[source]
	pub source: serde_json::Error,
}

/// Failure of a single handler invocation.
///
/// Contained at the dispatch boundary: it is logged with its topic and
/// pattern and never reaches the transport loop or sibling handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
	/// Handler returned an error
	#[error("Handler for '{pattern}' failed on topic '{topic}': {source}")]
	Failed {
		/// Topic of the message being handled
		topic: ArcStr,
		/// Pattern the handler was registered with
		pattern: ArcStr,
		/// Error returned by the handler
		#[source]
		source: BoxError,
	},

	/// Handler panicked
	#[error("Handler for '{pattern}' panicked on topic '{topic}': {details}")]
	Panicked {
		/// Topic of the message being handled
		topic: ArcStr,
		/// Pattern the handler was registered with
		pattern: ArcStr,
		/// Panic message, when it was a string
		details: String,
	},
}

impl HandlerError {
	/// Topic of the message that failed.
	pub fn topic(&self) -> &ArcStr {
		match self {
			| HandlerError::Failed { topic, .. }
			| HandlerError::Panicked { topic, .. } => topic,
		}
	}

	/// Pattern of the failing subscription.
	pub fn pattern(&self) -> &ArcStr {
		match self {
			| HandlerError::Failed { pattern, .. }
			| HandlerError::Panicked { pattern, .. } => pattern,
		}
	}
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&'static str>() {
		(*s).to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
