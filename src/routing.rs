//! Message routing module
//!
//! This module holds the subscription registry and the dispatch engine that
//! matches incoming messages, converts payloads and runs handlers.

pub mod dispatcher;
/// Dispatch-time error types
pub mod error;
pub mod handler;
pub mod payload;
pub mod subscription;
pub mod subscription_registry;

// Re-export commonly used types for convenience
pub use dispatcher::{Dispatcher, MatchResult};
pub use error::{BoxError, HandlerError, PayloadConversionError};
pub use handler::{HandlerResult, MessageHandler, SyncHandler, sync_handler};
pub use payload::Payload;
pub use subscription::{Subscription, SubscriptionId, SubscriptionOptions};
pub use subscription_registry::{RegistrySnapshot, SubscriptionRegistry};
