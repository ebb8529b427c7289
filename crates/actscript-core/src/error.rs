/// Errors raised while building or querying the action registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("action '{0}' is already registered")]
    DuplicateId(String),
    #[error("no action registered with id '{0}'")]
    NotFound(String),
    #[error("a global registry has already been installed")]
    AlreadyInstalled,
    #[error("action '{action}': required parameter '{param}' follows an optional one")]
    RequiredAfterOptional { action: String, param: String },
}

/// Errors that abort loading of a single script unit
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("{unit}:{line}: unknown action '{id}'")]
    UnknownAction { unit: String, line: usize, id: String },

    #[error("{unit}:{line}: {action} argument {slot} ({param}) cannot parse '{text}': {reason}")]
    InvalidLiteral {
        unit: String,
        line: usize,
        action: String,
        slot: usize,
        param: String,
        text: String,
        reason: String,
    },

    #[error("{unit}:{line}: {action} is missing argument {slot} ({param})")]
    MissingArgument {
        unit: String,
        line: usize,
        action: String,
        slot: usize,
        param: String,
    },

    #[error("{unit}:{line}: {action} takes {expected} argument(s), got {found}")]
    TooManyArguments {
        unit: String,
        line: usize,
        action: String,
        expected: usize,
        found: usize,
    },

    #[error("{unit}:{line}: unterminated quoted argument")]
    UnterminatedQuote { unit: String, line: usize },

    #[error("{unit}:{line}: invalid section header '{text}'")]
    InvalidSection { unit: String, line: usize, text: String },

    #[error("{unit}:{line}: section '{name}' is declared twice")]
    DuplicateSection { unit: String, line: usize, name: String },

    #[error("{unit}:{line}: invalid variable reference '{text}'")]
    InvalidVariable { unit: String, line: usize, text: String },

    #[error("{unit}:{line}: '->' must be followed by exactly one $variable")]
    InvalidOutput { unit: String, line: usize },
}

impl CompileError {
    /// Name of the unit the error was raised in
    pub fn unit(&self) -> &str {
        match self {
            CompileError::UnknownAction { unit, .. }
            | CompileError::InvalidLiteral { unit, .. }
            | CompileError::MissingArgument { unit, .. }
            | CompileError::TooManyArguments { unit, .. }
            | CompileError::UnterminatedQuote { unit, .. }
            | CompileError::InvalidSection { unit, .. }
            | CompileError::DuplicateSection { unit, .. }
            | CompileError::InvalidVariable { unit, .. }
            | CompileError::InvalidOutput { unit, .. } => unit,
        }
    }

    /// 1-based source line of the error
    pub fn line(&self) -> usize {
        match self {
            CompileError::UnknownAction { line, .. }
            | CompileError::InvalidLiteral { line, .. }
            | CompileError::MissingArgument { line, .. }
            | CompileError::TooManyArguments { line, .. }
            | CompileError::UnterminatedQuote { line, .. }
            | CompileError::InvalidSection { line, .. }
            | CompileError::DuplicateSection { line, .. }
            | CompileError::InvalidVariable { line, .. }
            | CompileError::InvalidOutput { line, .. } => *line,
        }
    }
}

/// Errors raised while a context is being dispatched
///
/// Every variant is caught at the dispatcher boundary and turned into a
/// stop-and-dispose of the failing context.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("variable '{0}' is not defined")]
    UndefinedVariable(String),

    #[error("expected {expected}, found {found} ({detail})")]
    Type {
        expected: &'static str,
        found: &'static str,
        detail: String,
    },

    #[error("action '{action}' panicked: {message}")]
    Dispatch { action: String, message: String },

    #[error("action '{action}' targets index {target} outside a sequence of {len}")]
    Bounds {
        action: String,
        target: usize,
        len: usize,
    },

    #[error("cannot select {requested} distinct element(s) from {available}")]
    InsufficientElements { requested: usize, available: usize },

    #[error("invalid range {min}..={max}")]
    InvalidRange { min: String, max: String },

    #[error("cannot select from an empty collection")]
    EmptyCollection,

    #[error("no action is currently being dispatched")]
    NoCurrentAction,

    #[error("action '{action}' has no argument slot {slot}")]
    SlotOutOfRange { action: String, slot: usize },

    #[error("metadata '{0}' holds a value of a different type")]
    Metadata(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl RuntimeError {
    pub(crate) fn type_mismatch(
        expected: &'static str,
        found: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        RuntimeError::Type {
            expected,
            found,
            detail: detail.into(),
        }
    }
}
