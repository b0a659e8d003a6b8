//! Step callables and predicates, resolved by name.
//!
//! A node names a step callable `(context) -> context'`; a branch may name a
//! predicate `(context) -> bool`. Both are registered explicitly in a
//! [`CallableRegistry`] at startup, so the set of valid names is closed and
//! can be checked when a graph is registered.
//!
//! The traits use RPITIT for their async methods; [`boxed`] provides the
//! object-safe counterparts stored in the registry.

pub mod boxed;
pub mod registry;

use std::future::Future;

use stepflow_types::graph::Context;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use boxed::{BoxPredicate, BoxStep, FnPredicate, FnStep, SyncFnStep};
pub use registry::{CallableRegistry, ResolvedCallables};

/// Errors raised by, or while resolving, callables.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallableError {
    /// The callable ran and reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The context did not contain what the callable expects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The callable observed its cancellation token and stopped early.
    #[error("cancelled")]
    Cancelled,

    #[error("unknown callable '{0}'")]
    Unknown(String),

    #[error("callable '{0}' is already registered")]
    Duplicate(String),
}

impl CallableError {
    pub fn failed(message: impl Into<String>) -> Self {
        CallableError::Failed(message.into())
    }
}

/// Everything a step callable receives for one invocation.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub node_id: String,
    /// A copy of the run context; the callable returns the next context.
    pub context: Context,
    /// Child of the run's cancellation token. Long-running callables may
    /// poll it to stop early; the engine never interrupts them.
    pub cancel: CancellationToken,
}

/// A node's unit of work.
pub trait StepCallable: Send + Sync {
    fn call(
        &self,
        step: StepContext,
    ) -> impl Future<Output = Result<Context, CallableError>> + Send;
}

/// A named branch condition.
pub trait Predicate: Send + Sync {
    fn check(
        &self,
        context: &Context,
    ) -> impl Future<Output = Result<bool, CallableError>> + Send;
}
