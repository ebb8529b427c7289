//! Driver loop that walks a context and interprets handler results
//!
//! Every handler returns [`ResultFlags`]. `STOP` ends the run, optionally with
//! `DISPOSE` to release the context. `SUCCESS` continues: the cursor moves to
//! the next action unless the handler moved it itself. Handler errors and
//! panics never escape; they are logged and turned into a stop-and-dispose.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use bitflags::bitflags;
use tracing::{debug, error};

use crate::context::Context;
use crate::error::RuntimeError;
use crate::scheduler::{LoopId, Scheduler};

bitflags! {
    /// Outcome of a single handler invocation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResultFlags: u8 {
        const SUCCESS = 0b001;
        const STOP = 0b010;
        const DISPOSE = 0b100;

        /// Carry on with the next action
        const CONTINUE = Self::SUCCESS.bits();
        /// End the run and release the context
        const HALT = Self::STOP.bits() | Self::DISPOSE.bits();
        /// End this run but keep the context for a scheduled continuation
        const SUSPEND = Self::STOP.bits();
    }
}

/// How a dispatcher run ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The cursor reached the end of the sequence
    Completed,
    /// A handler stopped the run without disposing the context
    Stopped,
    /// A handler stopped the run and parked a continuation on the context
    Suspended,
    /// A handler stopped the run and the context was released
    Disposed,
    /// A handler failed; the context was released
    Failed(RuntimeError),
}

/// Result of [`execute`]
#[derive(Debug)]
pub struct Execution {
    pub outcome: Outcome,
    /// Set when the context was handed to the scheduler
    pub scheduled: Option<LoopId>,
}

/// Run a context until it completes, stops or fails
pub fn run(ctx: &mut Context) -> Outcome {
    drive(ctx, true)
}

/// Run a reusable sub-context without releasing it on stop or failure
///
/// A stop-and-dispose request reports [`Outcome::Stopped`] since the context
/// stays alive; the owner disposes it once it is done with every iteration.
pub fn run_iteration(ctx: &mut Context) -> Outcome {
    drive(ctx, false)
}

/// Run a context and hand it to `scheduler` if it suspended
pub fn execute(mut ctx: Context, scheduler: &mut Scheduler, now: Instant) -> Execution {
    let outcome = run(&mut ctx);
    let scheduled = match outcome {
        Outcome::Suspended => scheduler.adopt(ctx, now).ok(),
        _ => None,
    };
    Execution { outcome, scheduled }
}

/// Execute `start..end` in place, reusing the context
///
/// Returns the flags of an inner action that stopped the run, or `None` once
/// the cursor leaves the block.
pub fn run_block(
    ctx: &mut Context,
    start: usize,
    end: usize,
) -> Result<Option<ResultFlags>, RuntimeError> {
    if start > end || end > ctx.len() {
        return Err(RuntimeError::Bounds {
            action: ctx.current().map(|a| a.id().to_string()).unwrap_or_default(),
            target: end,
            len: ctx.len(),
        });
    }

    ctx.set_index(start)?;
    while ctx.index() < end {
        let flags = step(ctx)?;
        if flags.contains(ResultFlags::STOP) {
            return Ok(Some(flags));
        }
    }
    Ok(None)
}

fn drive(ctx: &mut Context, release: bool) -> Outcome {
    if ctx.is_disposed() {
        return Outcome::Disposed;
    }

    loop {
        if ctx.is_finished() {
            debug!(target: "scripting", "{} ({}) completed", ctx.script_name(), ctx.id());
            return Outcome::Completed;
        }

        match step(ctx) {
            Ok(flags) if flags.contains(ResultFlags::STOP) => {
                if flags.contains(ResultFlags::DISPOSE) && release {
                    ctx.dispose();
                    return Outcome::Disposed;
                }
                if ctx.is_suspended() {
                    return Outcome::Suspended;
                }
                return Outcome::Stopped;
            }
            Ok(_) => {}
            Err(e) => {
                let (action, line) = ctx
                    .current()
                    .map(|a| (a.id().to_string(), a.line()))
                    .unwrap_or_default();
                error!(
                    target: "scripting",
                    "Action {} (line {}) in {} ({}) failed: {}",
                    action,
                    line,
                    ctx.script_name(),
                    ctx.id(),
                    e
                );
                if release {
                    ctx.dispose();
                }
                return Outcome::Failed(e);
            }
        }
    }
}

/// Dispatch the action under the cursor once
fn step(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let entry = ctx.index();
    ctx.sync_cursor();
    let action = ctx.current().cloned().ok_or(RuntimeError::NoCurrentAction)?;
    let handler = action.definition().handler().clone();

    let flags = match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx))) {
        Ok(result) => result?,
        Err(payload) => {
            return Err(RuntimeError::Dispatch {
                action: action.id().to_string(),
                message: panic_message(payload.as_ref()),
            });
        }
    };

    if flags.contains(ResultFlags::STOP) {
        return Ok(flags);
    }
    if !flags.contains(ResultFlags::SUCCESS) {
        return Ok(ResultFlags::HALT);
    }

    // Handlers that jump own the cursor; `set_index` already bounds-checked it
    if ctx.index() == entry {
        ctx.set_index(entry + 1)?;
    }
    Ok(flags)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::param::{ParamType, ParameterSpec};
    use crate::registry::Registry;
    use std::sync::{Arc, Mutex};

    /// `Mark <n>` records `n`, `Jump <to>` moves the cursor, `Boom` panics,
    /// `Idle` returns no flags
    fn registry(marks: &Arc<Mutex<Vec<i64>>>) -> Arc<Registry> {
        let mut builder = Registry::builder();
        let marks = marks.clone();
        builder
            .register(
                "Mark",
                "",
                vec![ParameterSpec::new("n", "", ParamType::Int)],
                move |ctx: &mut Context| {
                    marks.lock().unwrap().push(ctx.arg(0)?);
                    Ok(ResultFlags::CONTINUE)
                },
            )
            .unwrap();
        builder
            .register(
                "Jump",
                "",
                vec![ParameterSpec::new("to", "", ParamType::Int)],
                |ctx: &mut Context| {
                    let to: usize = ctx.arg(0)?;
                    ctx.set_index(to)?;
                    Ok(ResultFlags::CONTINUE)
                },
            )
            .unwrap();
        builder
            .register("Boom", "", vec![], |_: &mut Context| -> Result<ResultFlags, RuntimeError> {
                panic!("boom")
            })
            .unwrap();
        builder
            .register("Idle", "", vec![], |_: &mut Context| Ok(ResultFlags::empty()))
            .unwrap();
        Arc::new(builder.build())
    }

    fn run_source(source: &str) -> (Outcome, Context, Vec<i64>) {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let unit = compiler::compile(&registry(&marks), "test", source).unwrap();
        let mut ctx = unit.main().unwrap().context(None);
        let outcome = run(&mut ctx);
        let marks = marks.lock().unwrap().clone();
        (outcome, ctx, marks)
    }

    #[test]
    fn test_visits_in_order() {
        let (outcome, ctx, marks) = run_source("Mark 0\nMark 1\nMark 2\nMark 3\n");
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(marks, vec![0, 1, 2, 3]);
        assert_eq!(ctx.index(), 4);
        assert!(!ctx.is_disposed());
    }

    #[test]
    fn test_jump_is_respected() {
        let (outcome, _, marks) = run_source("Mark 0\nJump 3\nMark 2\nMark 3\n");
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(marks, vec![0, 3]);
    }

    #[test]
    fn test_jump_to_end_completes() {
        let (outcome, _, marks) = run_source("Jump 2\nMark 1\n");
        assert_eq!(outcome, Outcome::Completed);
        assert!(marks.is_empty());
    }

    #[test]
    fn test_jump_out_of_bounds_fails() {
        let (outcome, ctx, _) = run_source("Jump 9\nMark 1\n");
        assert!(matches!(
            outcome,
            Outcome::Failed(RuntimeError::Bounds { target: 9, len: 2, .. })
        ));
        assert!(ctx.is_disposed());
    }

    #[test]
    fn test_panic_is_contained() {
        let (outcome, ctx, marks) = run_source("Mark 0\nBoom\nMark 2\n");
        assert_eq!(
            outcome,
            Outcome::Failed(RuntimeError::Dispatch {
                action: "Boom".into(),
                message: "boom".into()
            })
        );
        assert!(ctx.is_disposed());
        assert_eq!(marks, vec![0]);
    }

    #[test]
    fn test_no_flags_halts() {
        let (outcome, ctx, marks) = run_source("Idle\nMark 1\n");
        assert_eq!(outcome, Outcome::Disposed);
        assert!(ctx.is_disposed());
        assert!(marks.is_empty());
    }

    #[test]
    fn test_iteration_halt_keeps_context() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let unit = compiler::compile(&registry(&marks), "test", "Mark 0\nIdle\nMark 2\n").unwrap();
        let mut ctx = unit.main().unwrap().context(None);

        assert_eq!(run_iteration(&mut ctx), Outcome::Stopped);
        assert!(!ctx.is_disposed());
        assert_eq!(*marks.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_handler_error_carries_through() {
        let (outcome, _, _) = run_source("Mark $missing\n");
        assert_eq!(
            outcome,
            Outcome::Failed(RuntimeError::UndefinedVariable("missing".into()))
        );
    }

    #[test]
    fn test_disposed_context_does_not_run() {
        let (_, mut ctx, _) = run_source("Mark 0\n");
        ctx.dispose();
        assert_eq!(run(&mut ctx), Outcome::Disposed);
    }

    #[test]
    fn test_run_block_in_place() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let unit = compiler::compile(&registry(&marks), "test", "Mark 0\nMark 1\nMark 2\n").unwrap();
        let mut ctx = unit.main().unwrap().context(None);

        assert_eq!(run_block(&mut ctx, 1, 3), Ok(None));
        assert_eq!(ctx.index(), 3);
        assert_eq!(*marks.lock().unwrap(), vec![1, 2]);
        assert!(matches!(
            run_block(&mut ctx, 2, 4),
            Err(RuntimeError::Bounds { .. })
        ));
    }
}
