//! MQTT router client module
//!
//! This module provides the user-facing router: handler registration,
//! connection setup and termination hooks.

pub mod config;
/// Client error types
pub mod error;
/// Router bound to an MQTT connection
pub mod router;
/// Subscription builder for flexible configuration
pub mod subscription_builder;
pub mod termination;

// Re-export commonly used types for convenience
pub use config::{
	ClientSettings, MqttRouterConfig, RouterSettings, generate_client_id,
};
pub use error::{ConnectionEstablishmentError, MqttRouterError};
pub use router::MqttRouter;
pub use subscription_builder::SubscriptionBuilder;
pub use termination::{
	ShutdownHookError, ShutdownReport, TerminationHook, TerminationHooks,
};

// Connection type is available from the root level
// Use: mqtt_router::RouterConnection
