//! Ordered, persisted persona collection.

use std::sync::Arc;

use tracing::{debug, info};

use super::{builtin_personas, new_persona_id, Persona, PersonaDraft, PersonaError};
use crate::storage::{self, KeyValueStore, PERSONAS_KEY};

/// Persona collection backed by a [`KeyValueStore`].
///
/// The whole collection is written under [`PERSONAS_KEY`] after every change.
/// Lookups are linear scans; the list is small and human-curated.
pub struct PersonaStore {
    personas: Vec<Persona>,
    store: Arc<dyn KeyValueStore>,
}

impl PersonaStore {
    /// Load personas from `store`, falling back to the built-in set when
    /// nothing usable is stored. Never fails.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let personas = match storage::load_json::<Vec<Persona>>(store.as_ref(), PERSONAS_KEY) {
            Some(personas) => {
                debug!(count = personas.len(), "Loaded personas");
                personas
            }
            None => {
                info!("Using built-in personas");
                builtin_personas()
            }
        };

        Self { personas, store }
    }

    /// All personas in display order.
    pub fn list(&self) -> &[Persona] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Look up a persona by id.
    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Look up a persona by id, then by case-insensitive name.
    pub fn find(&self, query: &str) -> Option<&Persona> {
        let query = query.trim();
        self.get(query).or_else(|| {
            self.personas
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(query))
        })
    }

    /// Validate `draft`, assign it a fresh id and append it.
    pub fn add(&mut self, draft: PersonaDraft) -> Result<Persona, PersonaError> {
        draft.validate()?;
        let persona = draft.into_persona(new_persona_id());
        info!(id = %persona.id, name = %persona.name, "Adding persona");

        self.personas.push(persona.clone());
        self.persist();
        Ok(persona)
    }

    /// Replace every field except the id of the persona `id`.
    pub fn update(&mut self, id: &str, draft: PersonaDraft) -> Result<Persona, PersonaError> {
        draft.validate()?;
        let slot = self
            .personas
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))?;

        *slot = draft.into_persona(id.to_string());
        let persona = slot.clone();
        info!(id, "Updated persona");

        self.persist();
        Ok(persona)
    }

    /// Delete the persona `id`.
    ///
    /// Callers own the cascade: the conversation for this persona must be
    /// dropped as well.
    pub fn remove(&mut self, id: &str) -> Result<Persona, PersonaError> {
        let index = self
            .personas
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))?;

        let removed = self.personas.remove(index);
        info!(id, "Removed persona");

        self.persist();
        Ok(removed)
    }

    fn persist(&self) {
        storage::persist_json(self.store.as_ref(), PERSONAS_KEY, &self.personas);
    }
}
