//! Hooks run once when the router shuts down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::routing::error::{BoxError, panic_message};
use crate::routing::handler::HandlerResult;

/// Failure inside a termination hook. Logged; never stops other hooks.
#[derive(Debug, Error)]
pub enum ShutdownHookError {
	/// Hook returned an error
	#[error("Termination hook #{index} failed: {source}")]
	Failed {
		/// Registration index of the hook
		index: usize,
		/// Error returned by the hook
		#[source]
		source: BoxError,
	},

	/// Hook panicked
	#[error("Termination hook #{index} panicked: {details}")]
	Panicked {
		/// Registration index of the hook
		index: usize,
		/// Panic message
		details: String,
	},

	/// Hooks still running when the timeout elapsed
	#[error("{pending} termination hook(s) did not finish within {timeout:?}")]
	TimedOut {
		/// Number of unfinished hooks
		pending: usize,
		/// The timeout that elapsed
		timeout: Duration,
	},
}

/// A zero-argument async action run at most once during shutdown.
pub trait TerminationHook: Send + 'static {
	/// Consumes the hook and returns its work.
	fn run(self: Box<Self>) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut, E> TerminationHook for F
where
	F: FnOnce() -> Fut + Send + 'static,
	Fut: Future<Output = Result<(), E>> + Send + 'static,
	E: Into<BoxError>,
{
	fn run(self: Box<Self>) -> BoxFuture<'static, HandlerResult> {
		(self)().map(|res| res.map_err(Into::into)).boxed()
	}
}

/// Outcome of a shutdown
#[derive(Debug, Default)]
pub struct ShutdownReport {
	/// Handlers aborted after the grace period
	pub aborted_handlers: usize,
	/// Hooks that completed successfully
	pub completed: usize,
	/// Hook failures, timeouts included
	pub errors: Vec<ShutdownHookError>,
}

impl ShutdownReport {
	pub fn is_clean(&self) -> bool {
		self.errors.is_empty()
	}
}

/// Registry of termination hooks.
#[derive(Default)]
pub struct TerminationHooks {
	hooks: Mutex<Vec<Box<dyn TerminationHook>>>,
	triggered: AtomicBool,
}

impl TerminationHooks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a hook and returns whether it will run.
	///
	/// Hooks registered after shutdown started are dropped. The check and the
	/// push happen under the lock `trigger` takes the hooks with, so an
	/// accepted hook is never left behind.
	pub fn register<H: TerminationHook>(&self, hook: H) -> bool {
		let mut hooks = self.lock_hooks();
		if self.is_triggered() {
			warn!("Termination hook registered after shutdown, ignoring");
			return false;
		}
		hooks.push(Box::new(hook));
		true
	}

	pub fn len(&self) -> usize {
		self.lock_hooks().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_triggered(&self) -> bool {
		self.triggered.load(Ordering::Acquire)
	}

	/// Runs every hook concurrently and waits for them, at most `timeout`.
	///
	/// Only the first call runs anything; later calls return an empty report.
	pub async fn trigger(&self, timeout: Duration) -> ShutdownReport {
		let mut report = ShutdownReport::default();
		let hooks = {
			let mut hooks = self.lock_hooks();
			if self.triggered.swap(true, Ordering::AcqRel) {
				debug!("Termination hooks already triggered");
				return report;
			}
			std::mem::take(&mut *hooks)
		};
		if hooks.is_empty() {
			return report;
		}
		debug!(hooks = hooks.len(), "Running termination hooks");

		let mut tasks = JoinSet::new();
		for (index, hook) in hooks.into_iter().enumerate() {
			tasks.spawn(async move {
				let outcome = AssertUnwindSafe(hook.run()).catch_unwind().await;
				match outcome {
					| Ok(Ok(())) => Ok(()),
					| Ok(Err(source)) => {
						Err(ShutdownHookError::Failed { index, source })
					}
					| Err(panic) => Err(ShutdownHookError::Panicked {
						index,
						details: panic_message(panic.as_ref()),
					}),
				}
			});
		}

		let collect = async {
			while let Some(joined) = tasks.join_next().await {
				match joined {
					| Ok(Ok(())) => report.completed += 1,
					| Ok(Err(err)) => {
						error!(error = %err, "Termination hook failed");
						report.errors.push(err);
					}
					| Err(err) => {
						error!(error = %err, "Termination hook task failed");
					}
				}
			}
		};
		if tokio::time::timeout(timeout, collect).await.is_err() {
			let pending = tasks.len();
			warn!(
				pending = pending,
				timeout_ms = timeout.as_millis() as u64,
				"Termination hooks timed out"
			);
			report
				.errors
				.push(ShutdownHookError::TimedOut { pending, timeout });
			tasks.shutdown().await;
		}
		report
	}

	fn lock_hooks(&self) -> MutexGuard<'_, Vec<Box<dyn TerminationHook>>> {
		self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl std::fmt::Debug for TerminationHooks {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TerminationHooks")
			.field("registered", &self.len())
			.field("triggered", &self.is_triggered())
			.finish()
	}
}
