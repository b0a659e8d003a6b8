//! Code-review demo callables.
//!
//! A submission carries `issues_open`. `review.fix` closes one issue per
//! call; the other steps pass the context through so the loop in the
//! sample graph is driven purely by the fix count.

use serde_json::Value;
use stepflow_core::callable::{CallableError, CallableRegistry, SyncFnStep};
use stepflow_types::graph::Context;

pub(super) fn register(registry: &mut CallableRegistry) -> Result<(), CallableError> {
    registry.register_step("review.submit", SyncFnStep::new(submit))?;
    registry.register_step("review.review", SyncFnStep::new(review))?;
    registry.register_step("review.fix", SyncFnStep::new(fix))?;
    registry.register_step("review.approve", SyncFnStep::new(approve))?;
    Ok(())
}

fn issues_open(context: &Context) -> Result<i64, CallableError> {
    match context.get("issues_open") {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value.as_i64().ok_or_else(|| {
            CallableError::InvalidInput(format!("issues_open must be an integer, got {value}"))
        }),
    }
}

fn submit(context: Context) -> Result<Context, CallableError> {
    issues_open(&context)?;
    Ok(context)
}

fn review(context: Context) -> Result<Context, CallableError> {
    let open = issues_open(&context)?;
    tracing::debug!(issues_open = open, "review pass");
    Ok(context)
}

fn fix(mut context: Context) -> Result<Context, CallableError> {
    let open = issues_open(&context)?;
    if open > 0 {
        context.insert("issues_open".to_string(), Value::from(open - 1));
    }
    Ok(context)
}

fn approve(context: Context) -> Result<Context, CallableError> {
    let open = issues_open(&context)?;
    if open > 0 {
        tracing::warn!(issues_open = open, "approving with open issues");
    }
    Ok(context)
}
