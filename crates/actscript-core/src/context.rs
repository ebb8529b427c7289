//! Mutable per-run state of a script

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::debug;

use crate::compiler::CompiledAction;
use crate::error::RuntimeError;
use crate::pool::{PooledSequence, SequencePool};
use crate::registry::Registry;
use crate::scheduler::Continuation;
use crate::value::{ActorId, FromValue, Value};

/// Variable written by `set_memory` when an action declares no output
pub const DEFAULT_OUTPUT: &str = "result";

/// Unique identity of a context, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Shared flag telling whether a context may still be run
///
/// Cloned handles let the host cancel a context it no longer owns, such as
/// one parked in the scheduler.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Liveness(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Sequence {
    Shared(Arc<[Arc<CompiledAction>]>),
    Pooled(PooledSequence),
}

impl Sequence {
    fn as_slice(&self) -> &[Arc<CompiledAction>] {
        match self {
            Sequence::Shared(actions) => &actions[..],
            Sequence::Pooled(actions) => &actions[..],
        }
    }
}

/// Execution state of one script run
pub struct Context {
    id: ContextId,
    script: Arc<str>,
    registry: Arc<Registry>,
    pool: Arc<SequencePool>,
    sequence: Sequence,
    index: usize,
    current: Option<Arc<CompiledAction>>,
    previous: Option<Arc<CompiledAction>>,
    next: Option<Arc<CompiledAction>>,
    actor: Option<ActorId>,
    memory: HashMap<String, Value>,
    /// Read-only snapshot of the parent's memory for sub-dispatch
    inherited: Option<Arc<HashMap<String, Value>>>,
    metadata: HashMap<String, Box<dyn Any + Send>>,
    parent: Option<ContextId>,
    liveness: Liveness,
    continuation: Option<Continuation>,
    disposed: bool,
}

impl Context {
    pub fn new(
        script: Arc<str>,
        actions: Arc<[Arc<CompiledAction>]>,
        registry: Arc<Registry>,
        actor: Option<ActorId>,
    ) -> Self {
        Self::with_sequence(
            script,
            Sequence::Shared(actions),
            registry,
            SequencePool::shared(),
            actor,
        )
    }

    fn with_sequence(
        script: Arc<str>,
        sequence: Sequence,
        registry: Arc<Registry>,
        pool: Arc<SequencePool>,
        actor: Option<ActorId>,
    ) -> Self {
        Self {
            id: ContextId::next(),
            script,
            registry,
            pool,
            sequence,
            index: 0,
            current: None,
            previous: None,
            next: None,
            actor,
            memory: HashMap::new(),
            inherited: None,
            metadata: HashMap::new(),
            parent: None,
            liveness: Liveness::new(),
            continuation: None,
            disposed: false,
        }
    }

    /// Use a specific pool for sub-dispatch sequences
    pub fn with_pool(mut self, pool: Arc<SequencePool>) -> Self {
        self.pool = pool;
        self
    }

    /// Create a sub-context running `sequence` on behalf of this context
    ///
    /// The child sees a snapshot of this context's variables as read-only
    /// fallbacks; its own writes never reach the parent.
    pub fn child(&self, sequence: PooledSequence) -> Context {
        let mut inherited = self
            .inherited
            .as_deref()
            .cloned()
            .unwrap_or_default();
        inherited.extend(self.memory.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut child = Self::with_sequence(
            self.script.clone(),
            Sequence::Pooled(sequence),
            self.registry.clone(),
            self.pool.clone(),
            self.actor,
        );
        child.inherited = Some(Arc::new(inherited));
        child.parent = Some(self.id);
        child
    }

    // ===== Identity =====

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn script_name(&self) -> &str {
        &self.script
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<SequencePool> {
        &self.pool
    }

    // ===== Cursor =====

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.sequence.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.len()
    }

    pub fn action_at(&self, index: usize) -> Option<&Arc<CompiledAction>> {
        self.sequence.as_slice().get(index)
    }

    /// Move the cursor; `len()` is the terminal position
    pub fn set_index(&mut self, index: usize) -> Result<(), RuntimeError> {
        if index > self.len() {
            return Err(RuntimeError::Bounds {
                action: self
                    .current
                    .as_ref()
                    .map(|a| a.id().to_string())
                    .unwrap_or_default(),
                target: index,
                len: self.len(),
            });
        }
        self.index = index;
        Ok(())
    }

    /// Refresh `current`, `previous` and `next` from the cursor
    pub(crate) fn sync_cursor(&mut self) {
        let actions = self.sequence.as_slice();
        self.current = actions.get(self.index).cloned();
        self.previous = self
            .index
            .checked_sub(1)
            .and_then(|i| actions.get(i))
            .cloned();
        self.next = actions.get(self.index + 1).cloned();
    }

    pub fn current(&self) -> Option<&Arc<CompiledAction>> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Arc<CompiledAction>> {
        self.previous.as_ref()
    }

    pub fn next(&self) -> Option<&Arc<CompiledAction>> {
        self.next.as_ref()
    }

    // ===== Actor =====

    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    pub fn set_actor(&mut self, actor: Option<ActorId>) {
        self.actor = actor;
    }

    // ===== Arguments =====

    /// Value of an argument slot of the current action
    pub fn arg_value(&self, slot: usize) -> Result<Value, RuntimeError> {
        let action = self.current.as_ref().ok_or(RuntimeError::NoCurrentAction)?;
        let param = action
            .param(slot)
            .ok_or_else(|| RuntimeError::SlotOutOfRange {
                action: action.id().to_string(),
                slot,
            })?;
        param.resolve(|name| self.variable(name).cloned())
    }

    /// Typed value of an argument slot of the current action
    pub fn arg<T: FromValue>(&self, slot: usize) -> Result<T, RuntimeError> {
        T::from_value(self.arg_value(slot)?)
    }

    // ===== Memory =====

    /// Look up a variable in this context, then in the inherited snapshot
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.memory
            .get(name)
            .or_else(|| self.inherited.as_ref().and_then(|m| m.get(name)))
    }

    /// Typed variable read; a missing name or wrong type is an error
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T, RuntimeError> {
        let value = self
            .variable(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
        T::from_value(value)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.memory.insert(name.into(), value.into());
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.memory.remove(name)
    }

    /// Write the current action's result to its output variable
    pub fn set_memory(&mut self, value: impl Into<Value>) {
        let name = self
            .current
            .as_ref()
            .and_then(|a| a.output())
            .unwrap_or(DEFAULT_OUTPUT)
            .to_string();
        self.memory.insert(name, value.into());
    }

    pub fn memory(&self) -> &HashMap<String, Value> {
        &self.memory
    }

    // ===== Metadata =====

    /// Memoized per-context value, computed by `factory` on first use
    pub fn metadata_or_insert_with<T, F>(&mut self, key: &str, factory: F) -> Result<T, RuntimeError>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut Context) -> Result<T, RuntimeError>,
    {
        if let Some(existing) = self.metadata.get(key) {
            return existing
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| RuntimeError::Metadata(key.to_string()));
        }

        let value = factory(self)?;
        self.metadata.insert(key.to_string(), Box::new(value.clone()));
        Ok(value)
    }

    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    // ===== Lifecycle =====

    /// Start a fresh pass over the sequence, keeping metadata
    pub fn reset(&mut self, actor: Option<ActorId>) {
        self.index = 0;
        self.actor = actor;
        self.memory.clear();
        self.continuation = None;
        self.sync_cursor();
    }

    /// Park the remaining iterations of a delayed loop
    pub fn suspend(&mut self, continuation: Continuation) {
        self.continuation = Some(continuation);
    }

    pub fn is_suspended(&self) -> bool {
        self.continuation.is_some()
    }

    pub(crate) fn take_continuation(&mut self) -> Option<Continuation> {
        self.continuation.take()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release the context's resources
    ///
    /// Returns `false` if the context had already been disposed.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        self.liveness.cancel();

        debug!(target: "scripting", "Disposing {} ({})", self.id, self.script);

        self.memory.clear();
        self.metadata.clear();
        self.inherited = None;
        self.continuation = None;
        self.current = None;
        self.previous = None;
        self.next = None;
        // Dropping a pooled sequence hands it back to the pool
        self.sequence = Sequence::Shared(Arc::from(Vec::new()));
        self.index = 0;
        true
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("script", &self.script)
            .field("index", &self.index)
            .field("len", &self.len())
            .field("actor", &self.actor)
            .field("memory", &self.memory)
            .field("parent", &self.parent)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}
