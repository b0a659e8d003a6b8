//! Object-safe wrappers for [`StepCallable`] and [`Predicate`].
//!
//! Same blanket-impl pattern as the rest of the crate's dynamic dispatch:
//! 1. An object-safe `*Dyn` trait with boxed futures
//! 2. A blanket impl of it for every implementor of the RPITIT trait
//! 3. A cheap-to-clone handle wrapping `Arc<dyn *Dyn>`
//!
//! Closure adapters ([`FnStep`], [`SyncFnStep`], [`FnPredicate`]) let simple
//! callables be registered without a named type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stepflow_types::graph::Context;

use super::{CallableError, Predicate, StepCallable, StepContext};

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Object-safe version of [`StepCallable`].
pub trait StepCallableDyn: Send + Sync {
    fn call_boxed(
        &self,
        step: StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<Context, CallableError>> + Send + '_>>;
}

impl<T: StepCallable> StepCallableDyn for T {
    fn call_boxed(
        &self,
        step: StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<Context, CallableError>> + Send + '_>> {
        Box::pin(self.call(step))
    }
}

/// Type-erased step callable.
#[derive(Clone)]
pub struct BoxStep {
    inner: Arc<dyn StepCallableDyn>,
}

impl BoxStep {
    pub fn new<T: StepCallable + 'static>(callable: T) -> Self {
        Self {
            inner: Arc::new(callable),
        }
    }

    pub async fn call(&self, step: StepContext) -> Result<Context, CallableError> {
        self.inner.call_boxed(step).await
    }
}

impl std::fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStep").finish_non_exhaustive()
    }
}

/// Async closure adapter: `FnStep::new(|step| async move { ... })`.
pub struct FnStep<F>(pub F);

impl<F, Fut> FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Context, CallableError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> StepCallable for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Context, CallableError>> + Send,
{
    fn call(
        &self,
        step: StepContext,
    ) -> impl Future<Output = Result<Context, CallableError>> + Send {
        (self.0)(step)
    }
}

/// Synchronous closure adapter over the context alone.
pub struct SyncFnStep<F>(pub F);

impl<F> SyncFnStep<F>
where
    F: Fn(Context) -> Result<Context, CallableError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> StepCallable for SyncFnStep<F>
where
    F: Fn(Context) -> Result<Context, CallableError> + Send + Sync,
{
    fn call(
        &self,
        step: StepContext,
    ) -> impl Future<Output = Result<Context, CallableError>> + Send {
        std::future::ready((self.0)(step.context))
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Object-safe version of [`Predicate`].
pub trait PredicateDyn: Send + Sync {
    fn check_boxed<'a>(
        &'a self,
        context: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CallableError>> + Send + 'a>>;
}

impl<T: Predicate> PredicateDyn for T {
    fn check_boxed<'a>(
        &'a self,
        context: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CallableError>> + Send + 'a>> {
        Box::pin(self.check(context))
    }
}

/// Type-erased predicate.
#[derive(Clone)]
pub struct BoxPredicate {
    inner: Arc<dyn PredicateDyn>,
}

impl BoxPredicate {
    pub fn new<T: Predicate + 'static>(predicate: T) -> Self {
        Self {
            inner: Arc::new(predicate),
        }
    }

    pub async fn check(&self, context: &Context) -> Result<bool, CallableError> {
        self.inner.check_boxed(context).await
    }
}

impl std::fmt::Debug for BoxPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxPredicate").finish_non_exhaustive()
    }
}

/// Synchronous closure adapter: `FnPredicate::new(|ctx| Ok(...))`.
pub struct FnPredicate<F>(pub F);

impl<F> FnPredicate<F>
where
    F: Fn(&Context) -> Result<bool, CallableError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Context) -> Result<bool, CallableError> + Send + Sync,
{
    fn check(
        &self,
        context: &Context,
    ) -> impl Future<Output = Result<bool, CallableError>> + Send {
        std::future::ready((self.0)(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn step_context(context: Context) -> StepContext {
        StepContext {
            run_id: Uuid::now_v7(),
            node_id: "n".to_string(),
            context,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_async_closure_step() {
        let step = BoxStep::new(FnStep::new(|step: StepContext| async move {
            let mut ctx = step.context;
            ctx.insert("visited".to_string(), json!(step.node_id));
            Ok::<_, CallableError>(ctx)
        }));

        let out = step.call(step_context(Context::new())).await.unwrap();
        assert_eq!(out["visited"], json!("n"));
    }

    #[tokio::test]
    async fn test_sync_closure_step_error() {
        let step = BoxStep::new(SyncFnStep::new(|_ctx| Err(CallableError::failed("boom"))));
        let err = step.call(step_context(Context::new())).await.unwrap_err();
        assert_eq!(err, CallableError::Failed("boom".to_string()));
    }

    #[tokio::test]
    async fn test_closure_predicate() {
        let predicate = BoxPredicate::new(FnPredicate::new(|ctx: &Context| {
            Ok(ctx.get("ready").and_then(|v| v.as_bool()).unwrap_or(false))
        }));
        let mut ctx = Context::new();
        assert!(!predicate.check(&ctx).await.unwrap());
        ctx.insert("ready".to_string(), json!(true));
        assert!(predicate.check(&ctx).await.unwrap());
    }

    #[test]
    fn test_debug_impls() {
        let step = BoxStep::new(SyncFnStep::new(Ok));
        assert!(format!("{step:?}").contains("BoxStep"));
    }
}
