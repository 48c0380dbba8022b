//! Validate, execute and report one action.

use futures::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, warn};

use super::hooks::FAILURE;
use super::{result, Action, ActionContext, EventCallback, EventHooks};
use crate::error::{Error, Result};
use crate::logging;
use crate::util::elapsed_str;
use crate::validate::ensure_valid;

/// Report of the most recent panic, with its backtrace.
static LAST_PANIC: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Record panics with a backtrace so the runner can log them.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let report = format!("{}\n{}", info, Backtrace::force_capture());
        *LAST_PANIC.lock() = Some(report);
    }));
}

/// Runs actions and maps their outcome to an exit code.
#[derive(Default)]
pub struct ActionRunner {
    result_address: Option<String>,
    callbacks: Vec<(String, EventCallback)>,
}

impl ActionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the result to this ZeroMQ address when the action succeeds.
    pub fn with_result_address(mut self, address: Option<String>) -> Self {
        self.result_address = address;
        self
    }

    /// Call `callback` whenever the action raises `event`.
    pub fn on(mut self, event: impl Into<String>, callback: EventCallback) -> Self {
        self.callbacks.push((event.into(), callback));
        self
    }

    /// Run `action` and return the process exit code.
    pub async fn run<A: Action>(&self, action: &A, ctx: &ActionContext) -> i32 {
        let start = Instant::now();
        let code = match self.run_result(action, ctx).await {
            Ok(Value::Bool(false)) => 1,
            Ok(value) => {
                if let Some(address) = &self.result_address {
                    if let Err(e) = result::publish(address, &value).await {
                        warn!("Could not publish result: {}", e);
                    }
                }
                0
            }
            Err(Error::Aborted) => {
                error!("Aborted by user");
                1
            }
            Err(e) => {
                for line in e.to_string().lines() {
                    error!("{}", line);
                }
                e.exit_code()
            }
        };
        logging::time(format!("{} finished in {}", A::NAME, elapsed_str(start.elapsed())));
        code
    }

    /// Validate then execute, with Ctrl-C and panics turned into errors.
    ///
    /// Nothing touches the network before validation has passed.
    pub async fn run_result<A: Action>(&self, action: &A, ctx: &ActionContext) -> Result<Value> {
        ensure_valid(action)?;
        action.check()?;

        let hooks = EventHooks::new(action.events());
        for (event, callback) in &self.callbacks {
            hooks.register(event, callback.clone())?;
        }

        debug!("Running {}", A::NAME);
        let guarded = AssertUnwindSafe(action.execute(ctx, &hooks)).catch_unwind();
        let outcome = tokio::select! {
            outcome = guarded => match outcome {
                Ok(outcome) => outcome,
                Err(panic) => Err(panic_error(panic)),
            },
            _ = tokio::signal::ctrl_c() => Err(Error::Aborted),
        };

        if let Err(e) = &outcome {
            if !matches!(e, Error::Argument(_) | Error::Aborted) {
                let _ = hooks.raise(FAILURE);
            }
        }
        outcome
    }
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    let err = Error::other(format!("Unhandled panic: {}", message));
    match LAST_PANIC.lock().take() {
        Some(report) => logging::exception(report, &err),
        None => logging::exception("Unhandled panic", &err),
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::OutputFormat;
    use crate::config::Config;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use validator::Validate;

    #[derive(Debug, Validate)]
    struct Probe {
        #[validate(custom(function = "crate::validate::positive_id"))]
        id: u64,
        outcome: &'static str,
    }

    #[async_trait]
    impl Action for Probe {
        const NAME: &'static str = "sample";

        fn events(&self) -> &'static [&'static str] {
            &["BEFORE_PROBE"]
        }

        async fn execute(&self, _ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
            hooks.raise("BEFORE_PROBE")?;
            match self.outcome {
                "ok" => Ok(json!(true)),
                "false" => Ok(json!(false)),
                "value" => Ok(json!({"id": self.id})),
                "panic" => panic!("sample exploded"),
                _ => Err(Error::other("sample failed")),
            }
        }
    }

    fn ctx() -> ActionContext {
        ActionContext::new(Arc::new(Config::default()), OutputFormat::Human)
    }

    #[tokio::test]
    async fn test_exit_codes() {
        let runner = ActionRunner::new();
        assert_eq!(runner.run(&Probe { id: 1, outcome: "ok" }, &ctx()).await, 0);
        assert_eq!(runner.run(&Probe { id: 1, outcome: "false" }, &ctx()).await, 1);
        assert_eq!(runner.run(&Probe { id: 1, outcome: "error" }, &ctx()).await, 1);
        assert_eq!(runner.run(&Probe { id: 0, outcome: "ok" }, &ctx()).await, 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_execute() {
        let raised = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&raised);
        let runner = ActionRunner::new().on(
            "BEFORE_PROBE",
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let err = runner.run_result(&Probe { id: 0, outcome: "ok" }, &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
        assert_eq!(raised.load(Ordering::SeqCst), 0);

        runner.run_result(&Probe { id: 2, outcome: "value" }, &ctx()).await.unwrap();
        assert_eq!(raised.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_event() {
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let runner = ActionRunner::new().on(
            FAILURE,
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(runner.run_result(&Probe { id: 1, outcome: "error" }, &ctx()).await.is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_callback_event_is_argument_error() {
        let runner = ActionRunner::new().on("NOT_AN_EVENT", Arc::new(|_| {}));
        let err = runner.run_result(&Probe { id: 1, outcome: "ok" }, &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let err = ActionRunner::new()
            .run_result(&Probe { id: 1, outcome: "panic" }, &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sample exploded"));
    }
}
