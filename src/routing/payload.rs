//! Message payloads as delivered to handlers.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::error::PayloadConversionError;

/// Payload of a routed message, resolved once before the handler runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
	/// Payload decoded as JSON
	Json(serde_json::Value),
	/// Payload as received from the transport
	Raw(Bytes),
}

impl Payload {
	/// Converts a raw transport payload for one subscription.
	///
	/// With `raw_payload` unset the bytes are decoded as JSON; when that
	/// fails the raw bytes are delivered instead and the decode error is
	/// returned alongside so the caller can report it.
	pub fn convert(
		raw: &Bytes,
		raw_payload: bool,
	) -> (Payload, Option<PayloadConversionError>) {
		if raw_payload {
			return (Payload::Raw(raw.clone()), None);
		}
		match serde_json::from_slice(raw) {
			| Ok(value) => (Payload::Json(value), None),
			| Err(source) => (
				Payload::Raw(raw.clone()),
				Some(PayloadConversionError {
					len: raw.len(),
					source,
				}),
			),
		}
	}

	pub fn is_json(&self) -> bool {
		matches!(self, Payload::Json(_))
	}

	/// Decoded JSON value, if the payload was decoded.
	pub fn as_json(&self) -> Option<&serde_json::Value> {
		match self {
			| Payload::Json(value) => Some(value),
			| Payload::Raw(_) => None,
		}
	}

	/// Undecoded bytes, if the payload was delivered raw.
	pub fn as_bytes(&self) -> Option<&Bytes> {
		match self {
			| Payload::Raw(bytes) => Some(bytes),
			| Payload::Json(_) => None,
		}
	}

	/// Text view: UTF-8 raw payloads and JSON strings.
	pub fn as_text(&self) -> Option<&str> {
		match self {
			| Payload::Raw(bytes) => std::str::from_utf8(bytes).ok(),
			| Payload::Json(value) => value.as_str(),
		}
	}

	/// Deserializes the payload into a typed value.
	///
	/// Raw payloads are parsed from their bytes, so this also works for
	/// subscriptions registered with `raw_payload`.
	pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
		match self {
			| Payload::Json(value) => T::deserialize(value),
			| Payload::Raw(bytes) => serde_json::from_slice(bytes),
		}
	}
}

impl std::fmt::Display for Payload {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			| Payload::Json(value) => write!(f, "{value}"),
			| Payload::Raw(bytes) => match std::str::from_utf8(bytes) {
				| Ok(text) => write!(f, "{text}"),
				| Err(_) => write!(f, "<{} bytes>", bytes.len()),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use serde::Deserialize;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_json_payload_is_decoded() {
		let raw = Bytes::from_static(br#"{"temp": 21.5}"#);
		let (payload, err) = Payload::convert(&raw, false);

		assert!(err.is_none());
		assert_eq!(payload, Payload::Json(json!({"temp": 21.5})));
	}

	#[test]
	fn test_raw_payload_skips_decoding() {
		let raw = Bytes::from_static(br#"{"temp": 21.5}"#);
		let (payload, err) = Payload::convert(&raw, true);

		assert!(err.is_none());
		assert_eq!(payload.as_bytes(), Some(&raw));
		assert_eq!(payload.as_text(), Some(r#"{"temp": 21.5}"#));
	}

	#[test]
	fn test_invalid_json_falls_back_to_raw() {
		let raw = Bytes::from_static(b"not json at all");
		let (payload, err) = Payload::convert(&raw, false);

		let err = err.expect("conversion error should be reported");
		assert_eq!(err.len, raw.len());
		assert_eq!(payload, Payload::Raw(raw));
		assert_eq!(payload.as_text(), Some("not json at all"));
	}

	#[test]
	fn test_empty_payload_falls_back_to_raw() {
		let (payload, err) = Payload::convert(&Bytes::new(), false);
		assert!(err.is_some());
		assert_eq!(payload, Payload::Raw(Bytes::new()));
	}

	#[test]
	fn test_json_as_typed() {
		#[derive(Deserialize, Debug, PartialEq)]
		struct Reading {
			temp: f64,
		}

		let raw = Bytes::from_static(br#"{"temp": 3.0}"#);
		let (decoded, _) = Payload::convert(&raw, false);
		let (undecoded, _) = Payload::convert(&raw, true);

		let expected = Reading { temp: 3.0 };
		assert_eq!(decoded.json_as::<Reading>().unwrap(), expected);
		assert_eq!(undecoded.json_as::<Reading>().unwrap(), expected);
		let garbage = Payload::Raw(Bytes::from_static(b"x"));
		assert!(garbage.json_as::<Reading>().is_err());
	}

	#[test]
	fn test_display() {
		assert_eq!(Payload::Json(json!([1, 2])).to_string(), "[1,2]");
		assert_eq!(Payload::Raw(Bytes::from_static(b"hi")).to_string(), "hi");
		assert_eq!(
			Payload::Raw(Bytes::from_static(&[0xff, 0xfe])).to_string(),
			"<2 bytes>"
		);
	}
}
