use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::dispatch;

/// Unique identifier for a scheduled loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

/// Remaining work of a delayed repeat, handed from a suspended context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    /// First action of the repeated block
    pub start: usize,
    /// One past the last action of the block
    pub end: usize,
    /// Iterations still to run
    pub remaining: usize,
    pub interval: Duration,
}

/// What happened to a loop during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// One iteration ran and more remain
    Ran,
    /// The last iteration ran; the context was disposed
    Finished,
    /// An iteration stopped the script; the context was disposed
    Stopped,
    /// An iteration failed; the context was disposed
    Failed,
    /// The context was cancelled from outside and dropped untouched
    Cancelled,
}

struct ScheduledLoop {
    id: LoopId,
    context: Context,
    continuation: Continuation,
    next_fire: Instant,
}

/// Cooperative scheduler for delayed repeat loops
///
/// Owns suspended contexts and runs one iteration of each due loop per tick.
/// Before touching a context it checks the context's liveness handle, so a
/// loop cancelled from outside is never run again.
pub struct Scheduler {
    loops: Vec<ScheduledLoop>,
    next_id: u64,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        Self {
            loops: Vec::new(),
            next_id: 0,
        }
    }

    /// Take ownership of a suspended context
    ///
    /// Returns the context unchanged if it has no pending continuation.
    pub fn adopt(&mut self, mut context: Context, now: Instant) -> Result<LoopId, Context> {
        let Some(continuation) = context.take_continuation() else {
            return Err(context);
        };

        let id = LoopId(self.next_id);
        self.next_id += 1;

        debug!(
            target: "scripting",
            "Scheduling {} iteration(s) of {}..{} in {} ({}) every {:?}",
            continuation.remaining,
            continuation.start,
            continuation.end,
            context.script_name(),
            context.id(),
            continuation.interval
        );

        self.loops.push(ScheduledLoop {
            id,
            next_fire: now + continuation.interval,
            context,
            continuation,
        });
        Ok(id)
    }

    /// Cancel a loop and dispose its context
    pub fn cancel(&mut self, id: LoopId) -> bool {
        match self.loops.iter().position(|l| l.id == id) {
            Some(pos) => {
                let mut scheduled = self.loops.remove(pos);
                scheduled.context.dispose();
                true
            }
            None => false,
        }
    }

    /// Run every due loop once
    ///
    /// This should be called from the host's update loop.
    pub fn tick(&mut self, now: Instant) -> Vec<(LoopId, LoopEvent)> {
        let mut events = Vec::new();

        self.loops.retain_mut(|scheduled| {
            if !scheduled.context.liveness().is_alive() {
                warn!(
                    target: "scripting",
                    "Dropping cancelled loop in {} ({})",
                    scheduled.context.script_name(),
                    scheduled.context.id()
                );
                events.push((scheduled.id, LoopEvent::Cancelled));
                return false;
            }

            if now < scheduled.next_fire {
                return true;
            }

            let event = run_iteration(scheduled);
            if event != LoopEvent::Ran {
                scheduled.context.dispose();
            } else {
                scheduled.next_fire = now + scheduled.continuation.interval;
            }
            events.push((scheduled.id, event));
            event == LoopEvent::Ran
        });

        events
    }

    /// Get the number of active loops
    pub fn active_count(&self) -> usize {
        self.loops.len()
    }

    pub fn is_scheduled(&self, id: LoopId) -> bool {
        self.loops.iter().any(|l| l.id == id)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn run_iteration(scheduled: &mut ScheduledLoop) -> LoopEvent {
    let Continuation { start, end, .. } = scheduled.continuation;
    let context = &mut scheduled.context;

    match dispatch::run_block(context, start, end) {
        Ok(None) => {
            scheduled.continuation.remaining = scheduled.continuation.remaining.saturating_sub(1);
            if scheduled.continuation.remaining == 0 {
                LoopEvent::Finished
            } else {
                LoopEvent::Ran
            }
        }
        Ok(Some(flags)) => {
            debug!(
                target: "scripting",
                "Loop in {} ({}) stopped with {:?}",
                context.script_name(),
                context.id(),
                flags
            );
            LoopEvent::Stopped
        }
        Err(e) => {
            error!(
                target: "scripting",
                "Loop iteration in {} ({}) failed at {}: {}",
                context.script_name(),
                context.id(),
                context.current().map(|a| a.id()).unwrap_or("?"),
                e
            );
            LoopEvent::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions;
    use crate::compiler;
    use crate::dispatch::{Outcome, ResultFlags};
    use crate::param::{ParamType, ParameterSpec};
    use crate::registry::Registry;
    use std::sync::{Arc, Mutex};

    fn context(source: &str, marks: &Arc<Mutex<Vec<i64>>>) -> Context {
        let mut builder = Registry::builder();
        actions::register_builtins(&mut builder).unwrap();
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

        let unit = compiler::compile(&Arc::new(builder.build()), "loop", source).unwrap();
        unit.main().unwrap().context(None)
    }

    #[test]
    fn test_delayed_repeat_runs_once_per_interval() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let ctx = context("Repeat 3 1 50\nMark 1\nMark 2\n", &marks);
        let liveness = ctx.liveness();
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        let step = Duration::from_millis(50);

        let execution = dispatch::execute(ctx, &mut scheduler, t0);
        assert_eq!(execution.outcome, Outcome::Suspended);
        let id = execution.scheduled.unwrap();
        assert!(marks.lock().unwrap().is_empty());

        assert!(scheduler.tick(t0 + step / 2).is_empty());
        assert_eq!(scheduler.tick(t0 + step), vec![(id, LoopEvent::Ran)]);
        // A late tick still fires only one iteration
        assert_eq!(scheduler.tick(t0 + step * 10), vec![(id, LoopEvent::Ran)]);
        assert!(liveness.is_alive());
        assert_eq!(scheduler.tick(t0 + step * 11), vec![(id, LoopEvent::Finished)]);

        assert_eq!(*marks.lock().unwrap(), vec![1, 1, 1]);
        assert_eq!(scheduler.active_count(), 0);
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_cancelled_loop_never_runs() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let ctx = context("Repeat 3 1 10\nMark 1\n", &marks);
        let liveness = ctx.liveness();
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();

        let id = dispatch::execute(ctx, &mut scheduler, t0).scheduled.unwrap();
        liveness.cancel();

        assert_eq!(
            scheduler.tick(t0 + Duration::from_secs(1)),
            vec![(id, LoopEvent::Cancelled)]
        );
        assert!(marks.lock().unwrap().is_empty());
        assert!(!scheduler.is_scheduled(id));
    }

    #[test]
    fn test_cancel_by_id() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let ctx = context("Repeat 3 1 10\nMark 1\n", &marks);
        let liveness = ctx.liveness();
        let mut scheduler = Scheduler::new();

        let id = dispatch::execute(ctx, &mut scheduler, Instant::now())
            .scheduled
            .unwrap();
        assert!(scheduler.is_scheduled(id));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_inner_stop_ends_loop() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let ctx = context("Repeat 3 2 10\nMark 1\nStop\n", &marks);
        let liveness = ctx.liveness();
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();

        let id = dispatch::execute(ctx, &mut scheduler, t0).scheduled.unwrap();
        assert_eq!(
            scheduler.tick(t0 + Duration::from_millis(10)),
            vec![(id, LoopEvent::Stopped)]
        );
        assert_eq!(*marks.lock().unwrap(), vec![1]);
        assert_eq!(scheduler.active_count(), 0);
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_adopt_requires_continuation() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        let ctx = context("Mark 1\n", &marks);
        let mut scheduler = Scheduler::new();

        let execution = dispatch::execute(ctx, &mut scheduler, Instant::now());
        assert_eq!(execution.outcome, Outcome::Completed);
        assert!(execution.scheduled.is_none());
        assert_eq!(scheduler.active_count(), 0);
    }
}
