//! Action registry
//!
//! Populated once at startup through `RegistryBuilder`, then frozen into a
//! `Registry` that is shared read-only (`Arc<Registry>`) by every dispatcher.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::schema::{ActionDefinition, Profile};
use crate::types::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action {0} is already registered")]
    DuplicateAction(String),

    #[error("profile {0} is already registered")]
    DuplicateProfile(String),
}

/// Collects action definitions before the registry is frozen
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    actions: HashMap<String, ActionDefinition>,
    profiles: Vec<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, action: ActionDefinition) -> Result<Self, RegistryError> {
        if self.actions.contains_key(&action.name) {
            return Err(RegistryError::DuplicateAction(action.name));
        }
        debug!("Registering action {}", action.name);
        self.actions.insert(action.name.clone(), action);
        Ok(self)
    }

    pub fn register_profile(mut self, profile: Profile) -> Result<Self, RegistryError> {
        if self.profiles.contains(&profile.name) {
            return Err(RegistryError::DuplicateProfile(profile.name));
        }
        self.profiles.push(profile.name);
        for action in profile.actions {
            self = self.register(action)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            actions: self.actions,
            profiles: self.profiles,
        }
    }
}

/// Immutable map from action name to its definition
#[derive(Debug)]
pub struct Registry {
    actions: HashMap<String, ActionDefinition>,
    profiles: Vec<String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn lookup(&self, action: &str) -> Option<&ActionDefinition> {
        self.actions.get(action)
    }

    /// Whether `role` may originate `action`, i.e. its peer may receive it
    pub fn is_allowed(&self, action: &str, role: Role) -> bool {
        self.lookup(action)
            .map(|def| def.allowed_on(role.peer()))
            .unwrap_or(false)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDefinition> {
        self.actions.values()
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
