//! Built-in step callables.
//!
//! Graphs can only name callables that were registered explicitly, so the
//! set shipped here is the closed set the server and the CLI start with:
//!
//! - `tools.noop`: returns the context unchanged
//! - `tools.approve`: sets `approved = true`
//! - `review.*`: the code-review demo (see `graphs/code_review.json`)
//! - `quality.*`: rule-based code-quality analysis of Python source (see
//!   `graphs/code_quality.json`)

pub mod quality;
pub mod review;

use stepflow_core::callable::{CallableError, CallableRegistry, SyncFnStep};
use stepflow_types::graph::Context;

/// Register every built-in callable into `registry`.
pub fn register_builtins(registry: &mut CallableRegistry) -> Result<(), CallableError> {
    registry.register_step("tools.noop", SyncFnStep::new(noop))?;
    registry.register_step("tools.approve", SyncFnStep::new(approve))?;
    review::register(registry)?;
    quality::register(registry)?;
    Ok(())
}

/// A registry holding exactly the built-ins.
pub fn builtin_registry() -> Result<CallableRegistry, CallableError> {
    let mut registry = CallableRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

fn noop(context: Context) -> Result<Context, CallableError> {
    Ok(context)
}

fn approve(mut context: Context) -> Result<Context, CallableError> {
    context.insert("approved".to_string(), serde_json::Value::Bool(true));
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepflow_core::callable::StepContext;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry().unwrap();
        assert_eq!(
            registry.step_names(),
            vec![
                "quality.check_complexity",
                "quality.detect_basic_issues",
                "quality.evaluate_quality",
                "quality.extract_functions",
                "quality.suggest_improvements",
                "review.approve",
                "review.fix",
                "review.review",
                "review.submit",
                "tools.approve",
                "tools.noop",
            ]
        );
    }

    #[test]
    fn test_registering_twice_fails() {
        let mut registry = builtin_registry().unwrap();
        assert!(matches!(
            register_builtins(&mut registry),
            Err(CallableError::Duplicate(name)) if name == "tools.noop"
        ));
    }

    #[tokio::test]
    async fn test_approve_sets_flag() {
        let registry = builtin_registry().unwrap();
        let step = registry.step("tools.approve").unwrap();
        let mut context = Context::new();
        context.insert("x".to_string(), json!(1));
        let out = step
            .call(StepContext {
                run_id: Uuid::now_v7(),
                node_id: "approve".to_string(),
                context,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();
        assert_eq!(out["approved"], json!(true));
        assert_eq!(out["x"], json!(1));
    }
}
