//! MQTT connection management module
//!
//! This module provides the connection lifecycle management separated from
//! the router interface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rumqttc::AsyncClient;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::{MqttRouter, ShutdownReport};

/// MQTT connection handle for lifecycle management
///
/// Keep it alive for the duration of the MQTT session and finish with
/// [`shutdown`](Self::shutdown).
pub struct RouterConnection {
	router: MqttRouter,
	client: AsyncClient,
	accepting: Arc<AtomicBool>,
	event_loop_handle: Option<JoinHandle<()>>,
}

impl RouterConnection {
	pub(crate) fn new(
		router: MqttRouter,
		client: AsyncClient,
		accepting: Arc<AtomicBool>,
		event_loop_handle: JoinHandle<()>,
	) -> Self {
		Self {
			router,
			client,
			accepting,
			event_loop_handle: Some(event_loop_handle),
		}
	}

	pub fn router(&self) -> &MqttRouter {
		&self.router
	}

	/// True once the event loop has stopped, e.g. after the broker
	/// disconnected or too many consecutive errors.
	pub fn is_finished(&self) -> bool {
		self.event_loop_handle
			.as_ref()
			.is_none_or(|handle| handle.is_finished())
	}

	/// Gracefully shut down the router and its connection:
	/// 1. Stop dispatching newly received messages
	/// 2. Wait for running handlers, aborting those past the grace period
	/// 3. Run termination hooks, bounded by the hook timeout
	/// 4. Send MQTT Disconnect and wait for the event loop to finish
	/// 5. Mark the router stopped
	pub async fn shutdown(mut self) -> ShutdownReport {
		self.accepting.store(false, Ordering::Release);

		let report = self.router.trigger_shutdown().await;

		if let Err(e) = self.client.disconnect().await {
			warn!(error = %e, "Failed to disconnect MQTT client");
		}

		if let Some(handle) = self.event_loop_handle.take() {
			if let Err(e) = handle.await {
				warn!(error = %e, "Event loop task failed");
			}
		} else {
			warn!("No event loop handle available to await");
		}

		self.router.mark_stopped();
		info!(
			aborted_handlers = report.aborted_handlers,
			hooks_completed = report.completed,
			hook_errors = report.errors.len(),
			"Router stopped"
		);
		report
	}
}

impl std::fmt::Debug for RouterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RouterConnection")
			.field("accepting", &self.accepting.load(Ordering::Relaxed))
			.field("finished", &self.is_finished())
			.finish_non_exhaustive()
	}
}

impl Drop for RouterConnection {
	fn drop(&mut self) {
		if self.event_loop_handle.is_some() {
			error!(
				"RouterConnection dropped without calling shutdown(). Please \
				 call shutdown() and await its completion before dropping."
			);
		}
	}
}
