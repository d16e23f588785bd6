//! Persona definitions and the persisted persona collection.
//!
//! This module provides:
//! - [`Persona`] - a named role configuration (system prompt + display identity)
//! - [`PersonaDraft`] - the editable field set used to create or edit a persona
//! - [`PersonaStore`] - ordered collection persisted to a [`KeyValueStore`]
//! - Built-in personas used when nothing is stored yet
//!
//! [`KeyValueStore`]: crate::storage::KeyValueStore

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod avatar;
mod builtin;
mod store;

pub use builtin::builtin_personas;
pub use store::PersonaStore;

/// Persona-related errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PersonaError {
    #[error("Persona {0} is required")]
    MissingField(&'static str),
    #[error("Persona not found: {0}")]
    NotFound(String),
}

/// A named AI role the user can converse with.
///
/// Serialized with the field names `id`, `name`, `profession`,
/// `systemInstruction` and `avatar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Stable identifier, assigned once at creation.
    pub id: String,
    pub name: String,
    /// Role label shown next to the name.
    pub profession: String,
    /// System prompt handed to the remote model.
    pub system_instruction: String,
    /// Avatar image as a `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Persona {
    /// Whether an avatar image is set.
    pub fn has_avatar(&self) -> bool {
        self.avatar.as_deref().is_some_and(|a| !a.is_empty())
    }

    /// Fallback avatar: up to two initials from the name.
    pub fn initials(&self) -> String {
        let initials: String = self
            .name
            .split_whitespace()
            .filter_map(|word| word.chars().find(|c| c.is_alphanumeric()))
            .take(2)
            .flat_map(char::to_uppercase)
            .collect();

        if initials.is_empty() {
            "?".to_string()
        } else {
            initials
        }
    }

    /// Editable fields of this persona.
    pub fn to_draft(&self) -> PersonaDraft {
        PersonaDraft {
            name: self.name.clone(),
            profession: self.profession.clone(),
            system_instruction: self.system_instruction.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// Fields entered in the persona editor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaDraft {
    pub name: String,
    pub profession: String,
    pub system_instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PersonaDraft {
    pub fn new(
        name: impl Into<String>,
        profession: impl Into<String>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            profession: profession.into(),
            system_instruction: system_instruction.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Check that every required field has content.
    pub fn validate(&self) -> Result<(), PersonaError> {
        if self.name.trim().is_empty() {
            return Err(PersonaError::MissingField("name"));
        }
        if self.profession.trim().is_empty() {
            return Err(PersonaError::MissingField("profession"));
        }
        if self.system_instruction.trim().is_empty() {
            return Err(PersonaError::MissingField("system instruction"));
        }
        Ok(())
    }

    /// Build a persona with the given id from this draft.
    ///
    /// An empty avatar string is stored as no avatar.
    pub(crate) fn into_persona(self, id: String) -> Persona {
        Persona {
            id,
            name: self.name,
            profession: self.profession,
            system_instruction: self.system_instruction,
            avatar: self.avatar.filter(|a| !a.is_empty()),
        }
    }
}

/// Generate a fresh persona id.
pub fn new_persona_id() -> String {
    format!("persona-{}", uuid::Uuid::new_v4())
}
