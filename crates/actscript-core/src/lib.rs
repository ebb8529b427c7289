/// Compiler and dispatcher for action scripts
///
/// Scripts are plain text lists of registered actions. They are compiled once
/// against a frozen [`Registry`] and executed against a per-run [`Context`].
/// Hosts register their own actions next to the built-in control flow in
/// [`actions`].
pub mod actions;
pub mod compiler;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod lexer;
pub mod param;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod value;

pub use actions::{builtin_registry, register_builtins};
pub use compiler::{CompiledAction, Script, Unit, compile, compile_action};
pub use context::{Context, ContextId, Liveness};
pub use dispatch::{Execution, Outcome, ResultFlags};
pub use error::{CompileError, RegistryError, RuntimeError};
pub use param::{ParamType, ParameterSpec, ValueParser};
pub use pool::{PooledSequence, SequencePool};
pub use registry::{ActionDefinition, ActionFlags, Handler, Registry, RegistryBuilder};
pub use scheduler::{Continuation, LoopEvent, LoopId, Scheduler};
pub use value::{ActorId, FromValue, Value};
