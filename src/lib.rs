//! # MQTT Router
//!
//! Topic routing for MQTT: subscription patterns with named parameters,
//! deterministic matching with fallback routes, and concurrent handler
//! dispatch with per-handler failure isolation.
//!
//! ## Features
//!
//! - **Pattern language**: `+` (single level), `#` (trailing levels) and
//!   named parameters `+name+` that capture one level
//! - **Fallback routes**: run only when no regular route matches a topic
//! - **JSON payloads**: decoded once per handler, raw bytes on request or
//!   when decoding fails
//! - **Isolated handlers**: errors and panics are logged, never propagated
//! - **Graceful shutdown**: bounded handler drain and termination hooks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt_router::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let router = MqttRouter::new();
//!
//!     router.route("weather/+city+/temperature").handle(
//!         |_topic: ArcStr, payload: Payload, params: TopicParams| async move {
//!             println!("{:?}: {payload}", params.get("city"));
//!             Ok::<_, BoxError>(())
//!         },
//!     )?;
//!
//!     router
//!         .route("weather/#")
//!         .fallback(true)
//!         .handle_sync(|topic, _payload, _params| {
//!             println!("unhandled weather topic {topic}");
//!             Ok::<_, BoxError>(())
//!         })?;
//!
//!     router.on_shutdown(|| async {
//!         println!("bye");
//!         Ok::<_, BoxError>(())
//!     });
//!
//!     let connection = router.connect("mqtt://localhost:1883").await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     connection.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Pattern Matching
//!
//! - `sensors/+/temperature` matches one level, captured positionally
//! - `devices/+id+/status` captures the level as `id`
//! - `sensors/#` matches `sensors` and everything below it
//!
//! Bare `+` and named parameters cannot be mixed in one pattern.

#![warn(missing_docs)]

// Core modules
pub mod client;
pub mod connection;
pub mod routing;
pub mod topic;

// === Core Public API ===
pub use client::{
	MqttRouter, MqttRouterConfig, MqttRouterError, RouterSettings,
	SubscriptionBuilder,
};
pub use connection::RouterConnection;

// Handler surface
pub use routing::{
	BoxError, HandlerResult, MessageHandler, Payload, SubscriptionId,
	SubscriptionOptions, sync_handler,
};
pub use topic::{TopicParams, TopicPatternPath, compile, match_topic};

// Essential external types
pub use arcstr::ArcStr;
pub use rumqttc::{MqttOptions, QoS};

/// Result type alias for operations that may fail with MqttRouterError
pub type Result<T> = std::result::Result<T, MqttRouterError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_router::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most routing applications

	pub use crate::{
		ArcStr, BoxError, HandlerResult, MqttRouter, MqttRouterConfig,
		MqttRouterError, Payload, QoS, Result, RouterConnection,
		RouterSettings, SubscriptionOptions, TopicParams,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use mqtt_router::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::MqttRouterError;
	pub use crate::client::{ConnectionEstablishmentError, ShutdownHookError};
	pub use crate::routing::{HandlerError, PayloadConversionError};
	pub use crate::topic::{
		InvalidPatternError, TopicError, TopicMatchError, TopicPatternError,
	};
}
