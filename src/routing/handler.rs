//! Handler capability invoked for every matched message.

use std::future::Future;

use arcstr::ArcStr;
use futures::FutureExt;
use futures::future::BoxFuture;

use super::error::BoxError;
use super::payload::Payload;
use crate::topic::TopicParams;

/// Result returned by handlers and termination hooks
pub type HandlerResult = Result<(), BoxError>;

/// Something that can process a routed message.
///
/// Implemented for async closures
/// `Fn(ArcStr, Payload, TopicParams) -> impl Future<Output = Result<(), E>>`
/// and, through [`SyncHandler`], for plain closures.
pub trait MessageHandler: Send + Sync + 'static {
	/// Handles one message. `topic` is the concrete topic, `params` the
	/// values extracted by the subscription's pattern.
	fn call(
		&self,
		topic: ArcStr,
		payload: Payload,
		params: TopicParams,
	) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut, E> MessageHandler for F
where
	F: Fn(ArcStr, Payload, TopicParams) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), E>> + Send + 'static,
	E: Into<BoxError>,
{
	fn call(
		&self,
		topic: ArcStr,
		payload: Payload,
		params: TopicParams,
	) -> BoxFuture<'static, HandlerResult> {
		(self)(topic, payload, params)
			.map(|res| res.map_err(Into::into))
			.boxed()
	}
}

/// Adapter for handlers that do not need to await anything.
///
/// The closure still runs inside the scheduled handler task, so a slow
/// synchronous handler delays only itself.
pub struct SyncHandler<F>(F);

impl<F> SyncHandler<F> {
	pub fn new(f: F) -> Self {
		Self(f)
	}
}

/// Wraps a synchronous closure as a [`MessageHandler`].
pub fn sync_handler<F, E>(f: F) -> SyncHandler<F>
where
	F: Fn(ArcStr, Payload, TopicParams) -> Result<(), E>
		+ Send
		+ Sync
		+ 'static,
	E: Into<BoxError>,
{
	SyncHandler(f)
}

impl<F, E> MessageHandler for SyncHandler<F>
where
	F: Fn(ArcStr, Payload, TopicParams) -> Result<(), E>
		+ Send
		+ Sync
		+ 'static,
	E: Into<BoxError>,
{
	fn call(
		&self,
		topic: ArcStr,
		payload: Payload,
		params: TopicParams,
	) -> BoxFuture<'static, HandlerResult> {
		let res = (self.0)(topic, payload, params).map_err(Into::into);
		futures::future::ready(res).boxed()
	}
}
