use rumqttc::{ClientError, OptionError};

use crate::topic::TopicPatternError;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionEstablishmentError {
	#[error("Network connection failed: {0}")]
	Network(#[from] rumqttc::ConnectionError),

	#[error("Broker rejected connection: {code:?}")]
	BrokerRejected { code: rumqttc::ConnectReturnCode },

	#[error("Connection establishment timed out after {timeout_millis}ms")]
	Timeout { timeout_millis: u64 },
}

/// Errors returned by router registration and connection calls.
///
/// Dispatch-time failures never show up here; they are logged.
#[derive(Debug, thiserror::Error)]
pub enum MqttRouterError {
	/// Request rejected by the rumqttc client
	#[error("Client operation failed: {0}")]
	ClientOperation(#[from] ClientError),

	/// Configuration errors when parsing MQTT options
	#[error("Configuration error: {0}")]
	Configuration(#[from] OptionError),

	/// Invalid configuration parameter values
	#[error("Invalid configuration value: {0}")]
	ConfigurationValue(String),

	/// Malformed subscription pattern
	#[error("Topic pattern error: {0}")]
	TopicPattern(#[from] TopicPatternError),

	/// Connection establishment failed
	#[error("Failed to establish connection: {0}")]
	ConnectionEstablishment(#[from] ConnectionEstablishmentError),

	/// `connect` called while a connection is active
	#[error("Router is already connected")]
	AlreadyRunning,
}

impl MqttRouterError {
	pub fn configuration_value(message: impl Into<String>) -> Self {
		MqttRouterError::ConfigurationValue(message.into())
	}
}

impl From<std::convert::Infallible> for MqttRouterError {
	fn from(never: std::convert::Infallible) -> Self {
		match never {}
	}
}
