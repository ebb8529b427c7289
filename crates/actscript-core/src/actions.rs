//! Built-in control-flow actions
//!
//! These are registered like any host action and only use the public
//! context and dispatcher contracts.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::compiler::{self, CompiledAction};
use crate::context::{Context, DEFAULT_OUTPUT};
use crate::dispatch::{self, Outcome, ResultFlags};
use crate::error::{RegistryError, RuntimeError};
use crate::param::{ParamType, ParameterSpec, VARIABLE_PREFIX};
use crate::registry::{ActionFlags, Registry, RegistryBuilder};
use crate::scheduler::Continuation;
use crate::value::{ActorId, FromValue, Value};

type HandlerFn = fn(&mut Context) -> Result<ResultFlags, RuntimeError>;

struct Builtin {
    id: &'static str,
    description: &'static str,
    params: fn() -> Vec<ParameterSpec>,
    flags: ActionFlags,
    handler: HandlerFn,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        id: "Stop",
        description: "Stop the script",
        params: Vec::new,
        flags: ActionFlags::empty(),
        handler: stop,
    },
    Builtin {
        id: "StopIf",
        description: "Stop the script when the condition is true",
        params: || {
            vec![
                ParameterSpec::new("condition", "Stop when true", ParamType::Bool)
                    .with_default(format!("{VARIABLE_PREFIX}{DEFAULT_OUTPUT}")),
            ]
        },
        flags: ActionFlags::empty(),
        handler: stop_if,
    },
    Builtin {
        id: "If",
        description: "Run the next actions only when the condition is true",
        params: || {
            vec![
                ParameterSpec::new("condition", "Run the block when true", ParamType::Bool),
                ParameterSpec::new("count", "Number of actions in the block", ParamType::Int),
            ]
        },
        flags: ActionFlags::empty(),
        handler: if_block,
    },
    Builtin {
        id: "Repeat",
        description: "Repeat the next actions, optionally with a delay between runs",
        params: || {
            vec![
                ParameterSpec::new("amount", "Number of iterations", ParamType::Int),
                ParameterSpec::new("offset", "Number of actions in the block", ParamType::Int),
                ParameterSpec::new("delay", "Milliseconds between iterations", ParamType::Int),
            ]
        },
        flags: ActionFlags::empty(),
        handler: repeat,
    },
    Builtin {
        id: "For",
        description: "Run an action for one actor",
        params: || {
            vec![
                ParameterSpec::new("actor", "Target actor", ParamType::Actor),
                ParameterSpec::new("action", "Action to run", ParamType::Str),
            ]
        },
        flags: ActionFlags::VARIADIC,
        handler: for_one,
    },
    Builtin {
        id: "ForEach",
        description: "Run an action once for every actor in a list",
        params: || {
            vec![
                ParameterSpec::new("actors", "Target actors", ParamType::List),
                ParameterSpec::new("action", "Action to run", ParamType::Str),
            ]
        },
        flags: ActionFlags::VARIADIC,
        handler: for_each,
    },
    Builtin {
        id: "RandomInt",
        description: "Random integer in an inclusive range",
        params: || {
            vec![
                ParameterSpec::new("min", "Lower bound", ParamType::Int),
                ParameterSpec::new("max", "Upper bound", ParamType::Int),
            ]
        },
        flags: ActionFlags::empty(),
        handler: random_int,
    },
    Builtin {
        id: "RandomFloat",
        description: "Random number in an inclusive range",
        params: || {
            vec![
                ParameterSpec::new("min", "Lower bound", ParamType::Float),
                ParameterSpec::new("max", "Upper bound", ParamType::Float),
            ]
        },
        flags: ActionFlags::empty(),
        handler: random_float,
    },
    Builtin {
        id: "RandomElement",
        description: "Pick one element of a list",
        params: || vec![ParameterSpec::new("list", "Collection", ParamType::List)],
        flags: ActionFlags::empty(),
        handler: random_element,
    },
    Builtin {
        id: "SelectDistinct",
        description: "Pick distinct elements of a list without replacement",
        params: || {
            vec![
                ParameterSpec::new("list", "Collection", ParamType::List),
                ParameterSpec::new("count", "Number of elements", ParamType::Int),
            ]
        },
        flags: ActionFlags::empty(),
        handler: select_distinct,
    },
    Builtin {
        id: "IsEqualTo",
        description: "Compare two values",
        params: || {
            vec![
                ParameterSpec::new("left", "", ParamType::Any),
                ParameterSpec::new("right", "", ParamType::Any),
            ]
        },
        flags: ActionFlags::empty(),
        handler: is_equal_to,
    },
    Builtin {
        id: "Not",
        description: "Negate a condition",
        params: || vec![ParameterSpec::new("value", "", ParamType::Bool)],
        flags: ActionFlags::empty(),
        handler: not,
    },
    Builtin {
        id: "Set",
        description: "Store a value",
        params: || vec![ParameterSpec::new("value", "", ParamType::Any)],
        flags: ActionFlags::empty(),
        handler: set,
    },
    Builtin {
        id: "Log",
        description: "Write a message to the log",
        params: || vec![ParameterSpec::new("message", "", ParamType::Str)],
        flags: ActionFlags::VARIADIC,
        handler: log,
    },
];

/// Register every built-in action
pub fn register_builtins(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    for builtin in BUILTINS {
        builder.register_with_flags(
            builtin.id,
            builtin.description,
            (builtin.params)(),
            builtin.flags,
            builtin.handler,
        )?;
    }
    Ok(())
}

/// Registry holding only the built-in actions
pub fn builtin_registry() -> Result<Registry, RegistryError> {
    let mut builder = Registry::builder();
    register_builtins(&mut builder)?;
    Ok(builder.build())
}

// ===== Control flow =====

fn stop(_: &mut Context) -> Result<ResultFlags, RuntimeError> {
    Ok(ResultFlags::HALT)
}

fn stop_if(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    if ctx.arg::<bool>(0)? {
        Ok(ResultFlags::HALT)
    } else {
        Ok(ResultFlags::CONTINUE)
    }
}

/// Block of `len` actions following the current one
fn block_after(ctx: &Context, len: usize) -> Result<(usize, usize), RuntimeError> {
    let start = ctx.index() + 1;
    let end = start.saturating_add(len);
    if end > ctx.len() {
        return Err(RuntimeError::Bounds {
            action: ctx.current().map(|a| a.id().to_string()).unwrap_or_default(),
            target: end,
            len: ctx.len(),
        });
    }
    Ok((start, end))
}

fn if_block(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let condition: bool = ctx.arg(0)?;
    let count: usize = ctx.arg(1)?;
    let (start, end) = block_after(ctx, count)?;

    if condition {
        if let Some(flags) = dispatch::run_block(ctx, start, end)? {
            return Ok(flags);
        }
    }

    leave_block(ctx, end)?;
    Ok(ResultFlags::CONTINUE)
}

/// Continue after a block that ran in place
///
/// An inner If may already have skipped past `end`; the cursor never moves
/// back over actions that were run or skipped.
fn leave_block(ctx: &mut Context, end: usize) -> Result<(), RuntimeError> {
    let index = end.max(ctx.index());
    ctx.set_index(index)
}

fn repeat(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let amount: usize = ctx.arg(0)?;
    let offset: usize = ctx.arg(1)?;
    let delay: usize = ctx.arg(2)?;
    let (start, end) = block_after(ctx, offset)?;

    if delay == 0 || amount == 0 {
        for _ in 0..amount {
            if let Some(flags) = dispatch::run_block(ctx, start, end)? {
                return Ok(flags);
            }
        }
        leave_block(ctx, end)?;
        return Ok(ResultFlags::CONTINUE);
    }

    ctx.set_index(end)?;
    ctx.suspend(Continuation {
        start,
        end,
        remaining: amount,
        interval: Duration::from_millis(delay as u64),
    });
    Ok(ResultFlags::SUSPEND)
}

fn for_one(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let actor: ActorId = ctx.arg(0)?;
    sub_dispatch(ctx, vec![actor])
}

fn for_each(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let actors = ctx
        .arg::<Vec<Value>>(0)?
        .into_iter()
        .map(|value| match value {
            // Plain numbers in list literals name actors by id
            Value::Int(id) if id >= 0 => Ok(ActorId(id as u64)),
            other => ActorId::from_value(other),
        })
        .collect::<Result<Vec<_>, _>>()?;
    sub_dispatch(ctx, actors)
}

/// Compile the target of a For/ForEach once per context
fn resolve_target(ctx: &mut Context) -> Result<Arc<CompiledAction>, RuntimeError> {
    let id: String = ctx.arg(1)?;
    let key = format!("sub_dispatch.target.{}", ctx.index());

    ctx.metadata_or_insert_with(&key, |ctx| {
        let overflow = ctx
            .current()
            .map(|a| a.overflow().to_vec())
            .unwrap_or_default();
        let action = compiler::compile_action(ctx.registry(), ctx.script_name(), &id, &overflow)?;
        Ok(Arc::new(action))
    })
}

fn sub_dispatch(ctx: &mut Context, actors: Vec<ActorId>) -> Result<ResultFlags, RuntimeError> {
    let target = resolve_target(ctx)?;

    let mut sequence = ctx.pool().rent();
    sequence.push(target);
    let mut sub = ctx.child(sequence);

    for actor in actors {
        sub.reset(Some(actor));
        match dispatch::run_iteration(&mut sub) {
            Outcome::Failed(e) => {
                warn!(
                    target: "scripting",
                    "Sub-dispatch for {} in {} ({}) failed: {}",
                    actor,
                    ctx.script_name(),
                    ctx.id(),
                    e
                );
            }
            Outcome::Suspended => {
                warn!(
                    target: "scripting",
                    "Sub-dispatch for {} in {} cannot suspend; continuation dropped",
                    actor,
                    ctx.script_name()
                );
            }
            _ => {}
        }
    }

    sub.dispose();
    Ok(ResultFlags::CONTINUE)
}

// ===== Random =====

fn random_int(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let min: i64 = ctx.arg(0)?;
    let max: i64 = ctx.arg(1)?;
    if min > max {
        return Err(RuntimeError::InvalidRange {
            min: min.to_string(),
            max: max.to_string(),
        });
    }

    let value = rand::thread_rng().gen_range(min..=max);
    ctx.set_memory(value);
    Ok(ResultFlags::CONTINUE)
}

fn random_float(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let min: f64 = ctx.arg(0)?;
    let max: f64 = ctx.arg(1)?;
    if min > max || min.is_nan() || max.is_nan() {
        return Err(RuntimeError::InvalidRange {
            min: min.to_string(),
            max: max.to_string(),
        });
    }

    let value = if min == max {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    };
    ctx.set_memory(value);
    Ok(ResultFlags::CONTINUE)
}

fn random_element(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let items: Vec<Value> = ctx.arg(0)?;
    let picked = items
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or(RuntimeError::EmptyCollection)?;
    ctx.set_memory(picked);
    Ok(ResultFlags::CONTINUE)
}

fn select_distinct(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let items: Vec<Value> = ctx.arg(0)?;
    let count: usize = ctx.arg(1)?;
    if count > items.len() {
        return Err(RuntimeError::InsufficientElements {
            requested: count,
            available: items.len(),
        });
    }

    let picked: Vec<Value> = items
        .choose_multiple(&mut rand::thread_rng(), count)
        .cloned()
        .collect();
    ctx.set_memory(Value::List(picked));
    Ok(ResultFlags::CONTINUE)
}

// ===== Values =====

fn is_equal_to(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let left = ctx.arg_value(0)?;
    let right = ctx.arg_value(1)?;
    ctx.set_memory(left == right);
    Ok(ResultFlags::CONTINUE)
}

fn not(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let value: bool = ctx.arg(0)?;
    ctx.set_memory(!value);
    Ok(ResultFlags::CONTINUE)
}

fn set(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let value = ctx.arg_value(0)?;
    ctx.set_memory(value);
    Ok(ResultFlags::CONTINUE)
}

fn log(ctx: &mut Context) -> Result<ResultFlags, RuntimeError> {
    let mut words = vec![ctx.arg::<String>(0)?];
    if let Some(action) = ctx.current() {
        for token in action.overflow() {
            let word = match token.text.strip_prefix(VARIABLE_PREFIX) {
                Some(name) if !token.quoted => ctx
                    .variable(name)
                    .map(Value::to_string)
                    .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?,
                _ => token.text.clone(),
            };
            words.push(word);
        }
    }

    info!(
        target: "scripting",
        script = ctx.script_name(),
        actor = ?ctx.actor(),
        "{}",
        words.join(" ")
    );
    Ok(ResultFlags::CONTINUE)
}
