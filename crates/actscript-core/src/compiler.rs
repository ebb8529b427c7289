//! Compiles script text into sequences of [`CompiledAction`]s
//!
//! A unit is one source text (usually one file). Statements before the first
//! `;Section` header form the unit's default script; each section compiles
//! into its own script named `<unit>.<Section>`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::CompileError;
use crate::lexer::{self, Token};
use crate::param::{ArgKind, CompiledParameter, VARIABLE_PREFIX};
use crate::registry::{ActionDefinition, Registry};
use crate::value::ActorId;

/// Marker introducing the output variable of a statement
pub const OUTPUT_MARKER: &str = "->";

/// One argument-bound invocation of an action
pub struct CompiledAction {
    definition: Arc<ActionDefinition>,
    params: Vec<CompiledParameter>,
    output: Option<String>,
    overflow: Vec<Token>,
    line: usize,
}

impl CompiledAction {
    pub fn id(&self) -> &str {
        self.definition.id()
    }

    pub fn definition(&self) -> &Arc<ActionDefinition> {
        &self.definition
    }

    pub fn params(&self) -> &[CompiledParameter] {
        &self.params
    }

    pub fn param(&self, slot: usize) -> Option<&CompiledParameter> {
        self.params.get(slot)
    }

    /// Variable the action writes its result to, if declared
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Arguments beyond the declared schema, forwarded verbatim
    pub fn overflow(&self) -> &[Token] {
        &self.overflow
    }

    /// 1-based source line, 0 for actions built at run time
    pub fn line(&self) -> usize {
        self.line
    }

    /// Statement text that compiles back to this action
    pub fn to_source(&self) -> String {
        let mut words = vec![self.id().to_string()];
        words.extend(self.params.iter().map(CompiledParameter::to_source));
        words.extend(self.overflow.iter().map(|token| {
            if token.quoted {
                lexer::quote_if_needed(&token.text)
            } else {
                token.text.clone()
            }
        }));
        if let Some(output) = &self.output {
            words.push(OUTPUT_MARKER.to_string());
            words.push(format!("{VARIABLE_PREFIX}{output}"));
        }
        words.join(" ")
    }
}

impl fmt::Debug for CompiledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledAction")
            .field("id", &self.id())
            .field("params", &self.params)
            .field("output", &self.output)
            .field("overflow", &self.overflow)
            .field("line", &self.line)
            .finish()
    }
}

/// A named, compiled sequence of actions
#[derive(Clone)]
pub struct Script {
    name: Arc<str>,
    section: Option<String>,
    actions: Arc<[Arc<CompiledAction>]>,
    registry: Arc<Registry>,
}

impl Script {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Section header this script was declared under
    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn actions(&self) -> &[Arc<CompiledAction>] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn action_ids(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.id()).collect()
    }

    /// Fresh execution context for one run of this script
    pub fn context(&self, actor: Option<ActorId>) -> Context {
        Context::new(
            self.name.clone(),
            self.actions.clone(),
            self.registry.clone(),
            actor,
        )
    }

    pub fn to_source(&self) -> String {
        self.actions
            .iter()
            .map(|a| a.to_source())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.name)
            .field("actions", &self.action_ids())
            .finish()
    }
}

/// All scripts compiled from one source text
#[derive(Debug, Clone)]
pub struct Unit {
    name: String,
    scripts: Vec<Script>,
}

impl Unit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn into_scripts(self) -> Vec<Script> {
        self.scripts
    }

    pub fn script(&self, name: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.name() == name)
    }

    /// The unit's default (unsectioned) script
    pub fn main(&self) -> Option<&Script> {
        self.script(&self.name)
    }

    /// Look up a section script by its bare section name
    pub fn section(&self, section: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.section() == Some(section))
    }

    pub fn to_source(&self) -> String {
        let mut out = String::new();
        for script in &self.scripts {
            if let Some(section) = script.section() {
                out.push(';');
                out.push_str(section);
                out.push('\n');
            }
            let body = script.to_source();
            if !body.is_empty() {
                out.push_str(&body);
                out.push('\n');
            }
        }
        out
    }
}

struct PendingScript {
    section: Option<String>,
    actions: Vec<Arc<CompiledAction>>,
}

/// Compile one unit of script text
pub fn compile(
    registry: &Arc<Registry>,
    unit: &str,
    source: &str,
) -> Result<Unit, CompileError> {
    let mut pending = vec![PendingScript {
        section: None,
        actions: Vec::new(),
    }];
    let mut seen_sections = HashSet::new();

    for (index, raw_line) in source.lines().enumerate() {
        let line = index + 1;
        let text = raw_line.trim();

        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        if let Some(header) = text.strip_prefix(';') {
            let name = header.trim();
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(CompileError::InvalidSection {
                    unit: unit.to_string(),
                    line,
                    text: text.to_string(),
                });
            }
            if !seen_sections.insert(name.to_string()) {
                return Err(CompileError::DuplicateSection {
                    unit: unit.to_string(),
                    line,
                    name: name.to_string(),
                });
            }
            pending.push(PendingScript {
                section: Some(name.to_string()),
                actions: Vec::new(),
            });
            continue;
        }

        let tokens = lexer::tokenize(text).map_err(|_| CompileError::UnterminatedQuote {
            unit: unit.to_string(),
            line,
        })?;
        let action = compile_tokens(registry, unit, line, &tokens)?;
        if let Some(current) = pending.last_mut() {
            current.actions.push(Arc::new(action));
        }
    }

    let has_sections = pending.len() > 1;
    let scripts = pending
        .into_iter()
        .filter(|p| p.section.is_some() || !has_sections || !p.actions.is_empty())
        .map(|p| {
            let name: Arc<str> = match &p.section {
                Some(section) => format!("{unit}.{section}").into(),
                None => unit.into(),
            };
            Script {
                name,
                section: p.section,
                actions: p.actions.into(),
                registry: registry.clone(),
            }
        })
        .collect::<Vec<_>>();

    debug!(
        target: "scripting",
        "Compiled unit {} into {} script(s)",
        unit,
        scripts.len()
    );

    Ok(Unit {
        name: unit.to_string(),
        scripts,
    })
}

/// Compile a single action from an id and raw argument tokens
///
/// Used by actions that build their targets at run time.
pub fn compile_action(
    registry: &Registry,
    unit: &str,
    id: &str,
    args: &[Token],
) -> Result<CompiledAction, CompileError> {
    let mut tokens = Vec::with_capacity(args.len() + 1);
    tokens.push(Token::bare(id));
    tokens.extend_from_slice(args);
    compile_tokens(registry, unit, 0, &tokens)
}

fn compile_tokens(
    registry: &Registry,
    unit: &str,
    line: usize,
    tokens: &[Token],
) -> Result<CompiledAction, CompileError> {
    let Some((head, mut args)) = tokens.split_first() else {
        return Err(CompileError::UnknownAction {
            unit: unit.to_string(),
            line,
            id: String::new(),
        });
    };

    let definition = registry
        .lookup(&head.text)
        .map_err(|_| CompileError::UnknownAction {
            unit: unit.to_string(),
            line,
            id: head.text.clone(),
        })?;

    let invalid_output = || CompileError::InvalidOutput {
        unit: unit.to_string(),
        line,
    };

    let mut output = None;
    if let Some(pos) = args
        .iter()
        .position(|t| !t.quoted && t.text == OUTPUT_MARKER)
    {
        let [target] = &args[pos + 1..] else {
            return Err(invalid_output());
        };
        let name = match target.text.strip_prefix(VARIABLE_PREFIX) {
            Some(name) if !target.quoted && !name.is_empty() => name,
            _ => return Err(invalid_output()),
        };
        output = Some(name.to_string());
        args = &args[..pos];
    }

    let specs = definition.params();
    let mut params = Vec::with_capacity(specs.len());
    for spec in specs {
        let default_token;
        let token = match (args.get(spec.index), &spec.default) {
            (Some(token), _) => token,
            (None, Some(default)) => {
                default_token = Token::bare(default.as_str());
                &default_token
            }
            (None, None) => {
                return Err(CompileError::MissingArgument {
                    unit: unit.to_string(),
                    line,
                    action: definition.id().to_string(),
                    slot: spec.index,
                    param: spec.name.clone(),
                });
            }
        };

        let param = match variable_name(token) {
            Some("") => {
                return Err(CompileError::InvalidVariable {
                    unit: unit.to_string(),
                    line,
                    text: token.text.clone(),
                });
            }
            Some(name) => CompiledParameter::new(name, ArgKind::Variable, spec.ty.clone()),
            None => CompiledParameter::new(&token.text, ArgKind::Literal, spec.ty.clone()),
        };

        param
            .prime()
            .map_err(|reason| CompileError::InvalidLiteral {
                unit: unit.to_string(),
                line,
                action: definition.id().to_string(),
                slot: spec.index,
                param: spec.name.clone(),
                text: token.text.clone(),
                reason,
            })?;
        params.push(param);
    }

    let overflow = args.get(specs.len()..).unwrap_or_default().to_vec();
    if !overflow.is_empty() && !definition.is_variadic() {
        return Err(CompileError::TooManyArguments {
            unit: unit.to_string(),
            line,
            action: definition.id().to_string(),
            expected: specs.len(),
            found: args.len(),
        });
    }

    Ok(CompiledAction {
        definition,
        params,
        output,
        overflow,
        line,
    })
}

fn variable_name(token: &Token) -> Option<&str> {
    if token.quoted {
        return None;
    }
    token.text.strip_prefix(VARIABLE_PREFIX)
}
