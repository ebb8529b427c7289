//! Catalog of registered actions
//!
//! Actions are registered explicitly on a [`RegistryBuilder`] during host
//! initialization. Building freezes the catalog into a [`Registry`], which is
//! read-only from then on and shared between compiled scripts and contexts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;
use tracing::debug;

use crate::context::Context;
use crate::dispatch::ResultFlags;
use crate::error::{RegistryError, RuntimeError};
use crate::param::ParameterSpec;

/// Function invoked when a compiled action is dispatched
pub type Handler = Arc<dyn Fn(&mut Context) -> Result<ResultFlags, RuntimeError> + Send + Sync>;

bitflags! {
    /// Capabilities declared by an action
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActionFlags: u8 {
        /// Accepts arguments beyond its declared parameters
        const VARIADIC = 0b0000_0001;
    }
}

/// A registered action: schema plus handler
pub struct ActionDefinition {
    id: String,
    description: String,
    params: Vec<ParameterSpec>,
    flags: ActionFlags,
    handler: Handler,
}

impl ActionDefinition {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.params
    }

    pub fn flags(&self) -> ActionFlags {
        self.flags
    }

    pub fn is_variadic(&self) -> bool {
        self.flags.contains(ActionFlags::VARIADIC)
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Mutable registration phase of the registry
#[derive(Default)]
pub struct RegistryBuilder {
    actions: HashMap<String, Arc<ActionDefinition>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action with a fixed parameter list
    pub fn register<F>(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParameterSpec>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&mut Context) -> Result<ResultFlags, RuntimeError> + Send + Sync + 'static,
    {
        self.register_with_flags(id, description, params, ActionFlags::empty(), handler)
    }

    /// Register an action that also accepts overflow arguments
    pub fn register_variadic<F>(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParameterSpec>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&mut Context) -> Result<ResultFlags, RuntimeError> + Send + Sync + 'static,
    {
        self.register_with_flags(id, description, params, ActionFlags::VARIADIC, handler)
    }

    pub fn register_with_flags<F>(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        mut params: Vec<ParameterSpec>,
        flags: ActionFlags,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&mut Context) -> Result<ResultFlags, RuntimeError> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.actions.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        let mut optional_seen = false;
        for (index, spec) in params.iter_mut().enumerate() {
            spec.index = index;
            if optional_seen && !spec.is_optional() {
                return Err(RegistryError::RequiredAfterOptional {
                    action: id.clone(),
                    param: spec.name.clone(),
                });
            }
            optional_seen |= spec.is_optional();
        }

        debug!(target: "scripting", "Registering action: {} ({} params)", id, params.len());

        let definition = ActionDefinition {
            id: id.clone(),
            description: description.into(),
            params,
            flags,
            handler: Arc::new(handler),
        };
        self.actions.insert(id, Arc::new(definition));
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    /// Freeze the registration table
    pub fn build(self) -> Registry {
        Registry {
            actions: self.actions,
        }
    }
}

/// Read-only catalog of actions
#[derive(Debug)]
pub struct Registry {
    actions: HashMap<String, Arc<ActionDefinition>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<ActionDefinition>, RegistryError> {
        self.actions
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// Install the process-wide registry
///
/// Can only succeed once; the registry is read-only afterwards.
pub fn install(registry: Registry) -> Result<Arc<Registry>, RegistryError> {
    let registry = Arc::new(registry);
    GLOBAL
        .set(registry.clone())
        .map_err(|_| RegistryError::AlreadyInstalled)?;
    Ok(registry)
}

/// The process-wide registry, if one has been installed
pub fn global() -> Option<Arc<Registry>> {
    GLOBAL.get().cloned()
}
