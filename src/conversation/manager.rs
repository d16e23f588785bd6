//! Per-persona sessions, transcripts and streaming.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::{ConversationError, Message, TranscriptMap};
use crate::chat::{ChatBackend, ChatSession, ChunkStream};
use crate::messaging::{AppEvent, EventBus, EventReceiver, EventSender};
use crate::personas::{Persona, PersonaDraft, PersonaStore};
use crate::storage::{self, KeyValueStore, HISTORY_KEY};

/// Prompt sent to open a brand-new conversation.
pub const GREETING_PROMPT: &str = "Start the conversation with a greeting.";

/// Everything a view needs to draw the current screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub personas: Vec<Persona>,
    pub active_persona_id: Option<String>,
    /// Transcript of the active persona.
    pub messages: Vec<Message>,
    /// Whether the active persona has a reply streaming.
    pub is_loading: bool,
    pub error: Option<String>,
}

struct ConversationState {
    personas: PersonaStore,
    transcripts: TranscriptMap,
    sessions: HashMap<String, Arc<dyn ChatSession>>,
    active: Option<String>,
    in_flight: HashSet<String>,
    /// Bumped whenever a persona's conversation is discarded. A stream
    /// started under an older generation must not touch state.
    generations: HashMap<String, u64>,
    error: Option<String>,
}

impl ConversationState {
    fn generation(&self, persona_id: &str) -> u64 {
        self.generations.get(persona_id).copied().unwrap_or(0)
    }

    fn message_mut(&mut self, persona_id: &str, message_id: &str) -> Option<&mut Message> {
        self.transcripts
            .get_mut(persona_id)?
            .iter_mut()
            .find(|m| m.id == message_id)
    }
}

/// Owns the persona collection, every transcript and every remote session.
///
/// All methods take `&self`. State lives behind a mutex that is never held
/// across an `.await`; chunk application, persistence and publishing happen
/// under the lock so observers never see a half-applied chunk.
pub struct ConversationManager {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<ConversationState>,
    bus: EventBus,
    events: EventSender,
}

impl ConversationManager {
    /// Load personas and transcripts from `store`.
    ///
    /// Missing or corrupt data falls back to the built-in personas and an
    /// empty transcript map.
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<dyn KeyValueStore>) -> Self {
        let personas = PersonaStore::load(Arc::clone(&store));
        let transcripts: TranscriptMap =
            storage::load_json(store.as_ref(), HISTORY_KEY).unwrap_or_default();
        debug!(
            personas = personas.len(),
            transcripts = transcripts.len(),
            backend = backend.name(),
            "Conversation manager ready"
        );

        let bus = EventBus::new();
        let events = bus.sender();
        Self {
            backend,
            store,
            state: Mutex::new(ConversationState {
                personas,
                transcripts,
                sessions: HashMap::new(),
                active: None,
                in_flight: HashSet::new(),
                generations: HashMap::new(),
                error: None,
            }),
            bus,
            events,
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    /// Sender for views that want to post their own notices.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.state();
        let active = state.active.clone();
        let (messages, is_loading) = match active.as_deref() {
            Some(id) => (
                state.transcripts.get(id).cloned().unwrap_or_default(),
                state.in_flight.contains(id),
            ),
            None => (Vec::new(), false),
        };

        ChatSnapshot {
            personas: state.personas.list().to_vec(),
            active_persona_id: active,
            messages,
            is_loading,
            error: state.error.clone(),
        }
    }

    pub fn personas(&self) -> Vec<Persona> {
        self.state().personas.list().to_vec()
    }

    pub fn persona(&self, persona_id: &str) -> Option<Persona> {
        self.state().personas.get(persona_id).cloned()
    }

    /// Look up a persona by id or case-insensitive name.
    pub fn find_persona(&self, query: &str) -> Option<Persona> {
        self.state().personas.find(query).cloned()
    }

    pub fn active_persona(&self) -> Option<Persona> {
        let state = self.state();
        let id = state.active.as_deref()?;
        state.personas.get(id).cloned()
    }

    /// Transcript for `persona_id`; `None` when no conversation exists.
    pub fn transcript(&self, persona_id: &str) -> Option<Vec<Message>> {
        self.state().transcripts.get(persona_id).cloned()
    }

    pub fn is_loading(&self, persona_id: &str) -> bool {
        self.state().in_flight.contains(persona_id)
    }

    pub fn has_session(&self, persona_id: &str) -> bool {
        self.state().sessions.contains_key(persona_id)
    }

    /// The last user-visible error, if not yet dismissed.
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    // =========================================================================
    // Conversation operations
    // =========================================================================

    /// Make `persona_id` active, greeting it if it has no messages yet.
    pub async fn select_persona(&self, persona_id: &str) -> Result<(), ConversationError> {
        let needs_greeting = {
            let mut state = self.state();
            if !state.personas.contains(persona_id) {
                return Err(ConversationError::PersonaNotFound(persona_id.to_string()));
            }

            if state.active.as_deref() != Some(persona_id) {
                info!(persona = persona_id, "Selecting persona");
                state.active = Some(persona_id.to_string());
                self.events.publish(AppEvent::ActivePersonaChanged {
                    persona_id: Some(persona_id.to_string()),
                });
            }

            let empty = state
                .transcripts
                .get(persona_id)
                .map_or(true, |t| t.is_empty());
            empty && !state.in_flight.contains(persona_id)
        };

        if needs_greeting {
            self.start_conversation(persona_id).await
        } else {
            Ok(())
        }
    }

    /// Run the greeting flow, replacing any transcript with the greeting.
    ///
    /// The greeting text is kept as streamed. On failure whatever arrived
    /// stays in the transcript.
    pub async fn start_conversation(&self, persona_id: &str) -> Result<(), ConversationError> {
        let (generation, instruction) = self.begin(persona_id)?;
        info!(persona = persona_id, "Starting conversation");

        let result = self
            .run_greeting(persona_id, generation, &instruction)
            .await;
        self.finish(persona_id, generation, &result);
        result
    }

    /// Send `text` to `persona_id` and stream the reply.
    ///
    /// The user message is stored verbatim and the final reply is trimmed.
    /// If the reply fails, its placeholder is removed and the user message
    /// kept.
    pub async fn send_message(&self, persona_id: &str, text: &str) -> Result<(), ConversationError> {
        if text.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        let (generation, instruction) = self.begin(persona_id)?;
        debug!(persona = persona_id, len = text.len(), "Sending message");

        let result = self
            .run_send(persona_id, generation, &instruction, text)
            .await;
        self.finish(persona_id, generation, &result);
        result
    }

    /// Empty the transcript of `persona_id` and forget its session.
    ///
    /// A reply still streaming for this persona is abandoned.
    pub fn clear_history(&self, persona_id: &str) -> Result<(), ConversationError> {
        let mut state = self.state();
        if !state.personas.contains(persona_id) {
            return Err(ConversationError::PersonaNotFound(persona_id.to_string()));
        }

        info!(persona = persona_id, "Clearing history");
        self.reset(&mut state, persona_id);
        state.transcripts.insert(persona_id.to_string(), Vec::new());
        self.persist(&state);
        self.events.publish(AppEvent::TranscriptReset {
            persona_id: persona_id.to_string(),
        });
        Ok(())
    }

    /// Discard the conversation of an edited persona.
    ///
    /// If it is the active persona a fresh greeting is started.
    pub async fn on_persona_edited(&self, persona_id: &str) -> Result<(), ConversationError> {
        let is_active = {
            let mut state = self.state();
            self.discard(&mut state, persona_id);
            state.active.as_deref() == Some(persona_id)
        };

        if is_active {
            self.start_conversation(persona_id).await
        } else {
            Ok(())
        }
    }

    /// Discard the conversation of a deleted persona.
    pub fn on_persona_deleted(&self, persona_id: &str) {
        let mut state = self.state();
        self.discard(&mut state, persona_id);

        if state.active.as_deref() == Some(persona_id) {
            state.active = None;
            self.events
                .publish(AppEvent::ActivePersonaChanged { persona_id: None });
        }
    }

    // =========================================================================
    // Persona editing
    // =========================================================================

    /// Create a persona, make it active and greet it.
    ///
    /// Greeting failures are reported through [`error`](Self::error); the
    /// persona is kept either way.
    pub async fn add_persona(&self, draft: PersonaDraft) -> Result<Persona, ConversationError> {
        let persona = {
            let mut state = self.state();
            let persona = state.personas.add(draft)?;
            self.events.publish(AppEvent::PersonasChanged);

            state.active = Some(persona.id.clone());
            self.events.publish(AppEvent::ActivePersonaChanged {
                persona_id: Some(persona.id.clone()),
            });
            persona
        };

        if let Err(e) = self.start_conversation(&persona.id).await {
            debug!(error = %e, "Greeting for new persona failed");
        }
        Ok(persona)
    }

    /// Replace a persona's fields and restart its conversation.
    pub async fn update_persona(
        &self,
        persona_id: &str,
        draft: PersonaDraft,
    ) -> Result<Persona, ConversationError> {
        let persona = {
            let mut state = self.state();
            let persona = state.personas.update(persona_id, draft)?;
            self.events.publish(AppEvent::PersonasChanged);
            persona
        };

        if let Err(e) = self.on_persona_edited(persona_id).await {
            debug!(error = %e, "Greeting after edit failed");
        }
        Ok(persona)
    }

    /// Delete a persona together with its transcript and session.
    pub fn delete_persona(&self, persona_id: &str) -> Result<Persona, ConversationError> {
        let removed = {
            let mut state = self.state();
            let removed = state.personas.remove(persona_id)?;
            self.events.publish(AppEvent::PersonasChanged);
            removed
        };

        self.on_persona_deleted(persona_id);
        Ok(removed)
    }

    // =========================================================================
    // Flows
    // =========================================================================

    async fn run_greeting(
        &self,
        persona_id: &str,
        generation: u64,
        instruction: &str,
    ) -> Result<(), ConversationError> {
        let session = self.session_for(persona_id, generation, instruction).await?;
        let mut stream = session
            .send_message_stream(GREETING_PROMPT)
            .await
            .map_err(ConversationError::Greeting)?;

        let placeholder = Message::model_placeholder();
        {
            let mut state = self.state();
            if state.generation(persona_id) != generation {
                return Err(ConversationError::Cancelled);
            }
            state
                .transcripts
                .insert(persona_id.to_string(), vec![placeholder.clone()]);
            self.persist(&state);
            self.events.publish(AppEvent::TranscriptReset {
                persona_id: persona_id.to_string(),
            });
            self.events.publish(AppEvent::MessageAppended {
                persona_id: persona_id.to_string(),
                message: placeholder.clone(),
            });
        }

        self.consume(persona_id, generation, &placeholder.id, &mut stream)
            .await
            .map_err(|e| match e {
                ConversationError::Stream(cause) => ConversationError::Greeting(cause),
                other => other,
            })?;
        self.finalize(persona_id, generation, &placeholder.id, false)
    }

    async fn run_send(
        &self,
        persona_id: &str,
        generation: u64,
        instruction: &str,
        text: &str,
    ) -> Result<(), ConversationError> {
        let session = self.session_for(persona_id, generation, instruction).await?;

        let user = Message::user(text);
        let placeholder = Message::model_placeholder();
        {
            let mut state = self.state();
            if state.generation(persona_id) != generation {
                return Err(ConversationError::Cancelled);
            }
            let transcript = state.transcripts.entry(persona_id.to_string()).or_default();
            transcript.push(user.clone());
            transcript.push(placeholder.clone());
            self.persist(&state);

            for message in [user, placeholder.clone()] {
                self.events.publish(AppEvent::MessageAppended {
                    persona_id: persona_id.to_string(),
                    message,
                });
            }
        }

        let streamed = match session.send_message_stream(text).await {
            Ok(mut stream) => {
                self.consume(persona_id, generation, &placeholder.id, &mut stream)
                    .await
            }
            Err(e) => Err(ConversationError::Stream(e)),
        };

        match streamed {
            Ok(()) => self.finalize(persona_id, generation, &placeholder.id, true),
            Err(ConversationError::Stream(cause)) => {
                self.rollback(persona_id, generation, &placeholder.id);
                Err(ConversationError::Stream(cause))
            }
            Err(other) => Err(other),
        }
    }

    /// Get the persona's session, creating it on first use.
    async fn session_for(
        &self,
        persona_id: &str,
        generation: u64,
        instruction: &str,
    ) -> Result<Arc<dyn ChatSession>, ConversationError> {
        let existing = self.state().sessions.get(persona_id).cloned();
        if let Some(session) = existing {
            return Ok(session);
        }

        debug!(persona = persona_id, backend = self.backend.name(), "Creating session");
        let session = self
            .backend
            .create_session(instruction)
            .await
            .map_err(|e| {
                warn!(persona = persona_id, error = %e, "Session creation failed");
                ConversationError::SessionInit(e)
            })?;

        let mut state = self.state();
        if state.generation(persona_id) != generation {
            return Err(ConversationError::Cancelled);
        }
        Ok(Arc::clone(
            state
                .sessions
                .entry(persona_id.to_string())
                .or_insert(session),
        ))
    }

    /// Append every chunk of `stream` to the message `message_id`.
    async fn consume(
        &self,
        persona_id: &str,
        generation: u64,
        message_id: &str,
        stream: &mut ChunkStream,
    ) -> Result<(), ConversationError> {
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| {
                warn!(persona = persona_id, error = %e, "Reply stream failed");
                ConversationError::Stream(e)
            })?;

            let mut state = self.state();
            if state.generation(persona_id) != generation {
                debug!(persona = persona_id, "Dropping stream of discarded conversation");
                return Err(ConversationError::Cancelled);
            }
            match state.message_mut(persona_id, message_id) {
                Some(message) => message.text.push_str(&chunk.text),
                None => return Err(ConversationError::Cancelled),
            }
            self.persist(&state);
            self.events.publish(AppEvent::ChunkAppended {
                persona_id: persona_id.to_string(),
                message_id: message_id.to_string(),
                text: chunk.text,
            });
        }
        Ok(())
    }

    fn finalize(
        &self,
        persona_id: &str,
        generation: u64,
        message_id: &str,
        trim: bool,
    ) -> Result<(), ConversationError> {
        let mut state = self.state();
        if state.generation(persona_id) != generation {
            return Err(ConversationError::Cancelled);
        }

        let text = match state.message_mut(persona_id, message_id) {
            Some(message) => {
                if trim {
                    message.text = message.text.trim().to_string();
                }
                message.text.clone()
            }
            None => return Err(ConversationError::Cancelled),
        };
        if trim {
            self.persist(&state);
        }

        self.events.publish(AppEvent::MessageFinalized {
            persona_id: persona_id.to_string(),
            message_id: message_id.to_string(),
            text,
        });
        Ok(())
    }

    fn rollback(&self, persona_id: &str, generation: u64, message_id: &str) {
        let mut state = self.state();
        if state.generation(persona_id) != generation {
            return;
        }
        let Some(transcript) = state.transcripts.get_mut(persona_id) else {
            return;
        };

        let before = transcript.len();
        transcript.retain(|m| m.id != message_id);
        if transcript.len() != before {
            self.persist(&state);
            self.events.publish(AppEvent::MessageRemoved {
                persona_id: persona_id.to_string(),
                message_id: message_id.to_string(),
            });
        }
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Mark `persona_id` busy and capture its generation.
    fn begin(&self, persona_id: &str) -> Result<(u64, String), ConversationError> {
        let mut state = self.state();
        let instruction = state
            .personas
            .get(persona_id)
            .map(|p| p.system_instruction.clone())
            .ok_or_else(|| ConversationError::PersonaNotFound(persona_id.to_string()))?;

        if state.in_flight.contains(persona_id) {
            return Err(ConversationError::Busy(persona_id.to_string()));
        }

        self.set_error(&mut state, None);
        state.in_flight.insert(persona_id.to_string());
        self.events.publish(AppEvent::LoadingChanged {
            persona_id: persona_id.to_string(),
            loading: true,
        });
        Ok((state.generation(persona_id), instruction))
    }

    /// Clear the busy flag and surface the error of a flow, unless the
    /// conversation was discarded meanwhile.
    fn finish(&self, persona_id: &str, generation: u64, result: &Result<(), ConversationError>) {
        let mut state = self.state();
        if state.generation(persona_id) != generation {
            return;
        }

        if state.in_flight.remove(persona_id) {
            self.events.publish(AppEvent::LoadingChanged {
                persona_id: persona_id.to_string(),
                loading: false,
            });
        }
        if let Err(e) = result {
            if let Some(message) = e.user_message() {
                self.set_error(&mut state, Some(message));
            }
        }
    }

    /// Drop session and in-flight stream of `persona_id`.
    fn reset(&self, state: &mut ConversationState, persona_id: &str) {
        *state.generations.entry(persona_id.to_string()).or_insert(0) += 1;
        state.sessions.remove(persona_id);
        if state.in_flight.remove(persona_id) {
            self.events.publish(AppEvent::LoadingChanged {
                persona_id: persona_id.to_string(),
                loading: false,
            });
        }
    }

    /// Reset `persona_id` and remove its transcript entry altogether.
    fn discard(&self, state: &mut ConversationState, persona_id: &str) {
        self.reset(state, persona_id);
        if state.transcripts.remove(persona_id).is_some() {
            self.persist(state);
        }
        self.events.publish(AppEvent::TranscriptReset {
            persona_id: persona_id.to_string(),
        });
    }

    fn set_error(&self, state: &mut ConversationState, error: Option<String>) {
        if state.error != error {
            state.error = error.clone();
            self.events.publish(AppEvent::ErrorChanged { message: error });
        }
    }

    fn persist(&self, state: &ConversationState) {
        storage::persist_json(self.store.as_ref(), HISTORY_KEY, &state.transcripts);
    }

    fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatError, Chunk, ScriptedBackend, ScriptedReply};
    use crate::conversation::{
        Role, GREETING_FAILED_MESSAGE, SEND_FAILED_MESSAGE, SESSION_INIT_MESSAGE,
    };
    use crate::storage::MemoryStore;
    use std::time::Duration;

    const MEERA: &str = "meera-chef";
    const ZARA: &str = "zara-ceo";

    fn setup() -> (Arc<ConversationManager>, ScriptedBackend, Arc<MemoryStore>) {
        let backend = ScriptedBackend::new();
        let store = Arc::new(MemoryStore::new());
        let manager = ConversationManager::new(Arc::new(backend.clone()), store.clone());
        (Arc::new(manager), backend, store)
    }

    async fn wait_for(events: &mut EventReceiver, pred: impl Fn(&AppEvent) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return,
                    Ok(_) => {}
                    Err(e) => panic!("bus error: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event");
    }

    fn is_placeholder(event: &AppEvent) -> bool {
        matches!(event, AppEvent::MessageAppended { message, .. } if message.role == Role::Model)
    }

    fn texts(messages: &[Message]) -> Vec<(Role, &str)> {
        messages.iter().map(|m| (m.role, m.text.as_str())).collect()
    }

    // =========================================================================
    // Greeting flow
    // =========================================================================

    #[tokio::test]
    async fn test_select_new_persona_greets() {
        let (manager, backend, _) = setup();
        backend.push_chunks(&["Namaste", " ji! "]);

        manager.select_persona(MEERA).await.unwrap();

        let transcript = manager.transcript(MEERA).unwrap();
        assert_eq!(texts(&transcript), vec![(Role::Model, "Namaste ji! ")]);

        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].text, GREETING_PROMPT);
        assert_eq!(
            prompts[0].system_instruction,
            manager.persona(MEERA).unwrap().system_instruction
        );

        assert!(!manager.is_loading(MEERA));
        assert!(manager.has_session(MEERA));
        assert_eq!(manager.active_persona().map(|p| p.id), Some(MEERA.to_string()));
        assert_eq!(manager.error(), None);
    }

    #[tokio::test]
    async fn test_reselect_does_not_greet_again() {
        let (manager, backend, _) = setup();

        manager.select_persona(MEERA).await.unwrap();
        manager.select_persona(ZARA).await.unwrap();
        let before = manager.transcript(MEERA);
        manager.select_persona(MEERA).await.unwrap();

        assert_eq!(manager.transcript(MEERA), before);
        assert_eq!(backend.sessions_created(), 2);
        assert_eq!(backend.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_greeting_failure_keeps_partial_text() {
        let (manager, backend, _) = setup();
        backend.push_reply(ScriptedReply::FailAfter {
            chunks: vec!["Hel".into()],
            error: "reset".into(),
        });

        let err = manager.select_persona(MEERA).await.unwrap_err();
        assert!(matches!(err, ConversationError::Greeting(_)));

        assert_eq!(
            texts(&manager.transcript(MEERA).unwrap()),
            vec![(Role::Model, "Hel")]
        );
        assert_eq!(manager.error().as_deref(), Some(GREETING_FAILED_MESSAGE));
        assert!(!manager.is_loading(MEERA));
    }

    #[tokio::test]
    async fn test_session_init_failure_leaves_no_transcript() {
        let (manager, backend, _) = setup();
        backend.set_fail_sessions(true);

        let err = manager.select_persona(MEERA).await.unwrap_err();
        assert!(matches!(err, ConversationError::SessionInit(_)));
        assert_eq!(manager.transcript(MEERA), None);
        assert_eq!(manager.error().as_deref(), Some(SESSION_INIT_MESSAGE));
        assert!(!manager.has_session(MEERA));
        assert!(backend.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_error_cleared_by_next_operation() {
        let (manager, backend, _) = setup();
        backend.set_fail_sessions(true);
        let _ = manager.select_persona(MEERA).await;
        assert!(manager.error().is_some());

        backend.set_fail_sessions(false);
        manager.select_persona(MEERA).await.unwrap();
        assert_eq!(manager.error(), None);
        assert_eq!(manager.transcript(MEERA).map(|t| t.len()), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_persona() {
        let (manager, _, _) = setup();
        assert!(matches!(
            manager.select_persona("ghost").await,
            Err(ConversationError::PersonaNotFound(_))
        ));
        assert!(matches!(
            manager.send_message("ghost", "hi").await,
            Err(ConversationError::PersonaNotFound(_))
        ));
        assert!(manager.clear_history("ghost").is_err());
    }

    // =========================================================================
    // Send flow
    // =========================================================================

    #[tokio::test]
    async fn test_send_appends_user_and_trimmed_reply() {
        let (manager, backend, _) = setup();
        manager.select_persona(MEERA).await.unwrap();

        backend.push_chunks(&["  Hello", " there  "]);
        manager.send_message(MEERA, "  hi  ").await.unwrap();

        let transcript = manager.transcript(MEERA).unwrap();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].role, Role::User);
        assert_eq!(transcript[1].text, "  hi  ");
        assert_eq!(transcript[2].role, Role::Model);
        assert_eq!(transcript[2].text, "Hello there");

        // Same session reused
        assert_eq!(backend.sessions_created(), 1);
        assert_eq!(backend.prompts()[1].text, "  hi  ");
    }

    #[tokio::test]
    async fn test_send_failure_removes_only_placeholder() {
        let (manager, backend, _) = setup();
        manager.select_persona(MEERA).await.unwrap();
        let mut events = manager.subscribe();

        backend.push_reply(ScriptedReply::FailAfter {
            chunks: vec!["par".into()],
            error: "boom".into(),
        });
        let err = manager.send_message(MEERA, "hello").await.unwrap_err();
        assert!(matches!(err, ConversationError::Stream(ChatError::Stream(_))));

        let transcript = manager.transcript(MEERA).unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].text, "hello");
        assert!(transcript[1].is_user());
        assert_eq!(manager.error().as_deref(), Some(SEND_FAILED_MESSAGE));
        assert!(!manager.is_loading(MEERA));

        let removed = events
            .drain()
            .into_iter()
            .any(|e| matches!(e, AppEvent::MessageRemoved { .. }));
        assert!(removed);
    }

    #[tokio::test]
    async fn test_send_open_failure_rolls_back() {
        let (manager, backend, _) = setup();
        manager.select_persona(MEERA).await.unwrap();

        backend.push_reply(ScriptedReply::FailToOpen("refused".into()));
        assert!(manager.send_message(MEERA, "hello").await.is_err());

        let transcript = manager.transcript(MEERA).unwrap();
        assert_eq!(
            texts(&transcript)[1..],
            [(Role::User, "hello")]
        );
    }

    #[tokio::test]
    async fn test_send_session_failure_appends_nothing() {
        let (manager, backend, _) = setup();
        backend.set_fail_sessions(true);

        let err = manager.send_message(MEERA, "hello").await.unwrap_err();
        assert!(matches!(err, ConversationError::SessionInit(_)));
        assert_eq!(manager.transcript(MEERA), None);
        assert_eq!(manager.error().as_deref(), Some(SESSION_INIT_MESSAGE));
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let (manager, backend, _) = setup();
        assert!(matches!(
            manager.send_message(MEERA, " \n\t").await,
            Err(ConversationError::EmptyMessage)
        ));
        assert!(backend.prompts().is_empty());
        assert_eq!(manager.transcript(MEERA), None);
    }

    #[tokio::test]
    async fn test_busy_while_streaming() {
        let (manager, backend, _) = setup();
        let mut events = manager.subscribe();
        let tx = backend.push_manual();

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.send_message(MEERA, "first").await }
        });
        wait_for(&mut events, is_placeholder).await;

        assert!(manager.is_loading(MEERA));
        assert!(matches!(
            manager.send_message(MEERA, "second").await,
            Err(ConversationError::Busy(_))
        ));

        tx.send(Ok(Chunk::new("done"))).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let transcript = manager.transcript(MEERA).unwrap();
        assert_eq!(
            texts(&transcript),
            vec![(Role::User, "first"), (Role::Model, "done")]
        );
    }

    #[tokio::test]
    async fn test_chunks_are_persisted_and_published_in_order() {
        let (manager, backend, store) = setup();
        let mut events = manager.subscribe();
        let tx = backend.push_manual();

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.select_persona(MEERA).await }
        });
        wait_for(&mut events, is_placeholder).await;
        assert!(manager.snapshot().is_loading);

        tx.send(Ok(Chunk::new("Nam"))).await.unwrap();
        wait_for(&mut events, |e| matches!(e, AppEvent::ChunkAppended { .. })).await;
        let raw = store.get(HISTORY_KEY).unwrap().unwrap();
        assert!(raw.contains("\"Nam\""));

        tx.send(Ok(Chunk::new("aste"))).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let raw = store.get(HISTORY_KEY).unwrap().unwrap();
        assert!(raw.contains("\"Namaste\""));
        assert!(!manager.snapshot().is_loading);
    }

    // =========================================================================
    // Clear history
    // =========================================================================

    #[tokio::test]
    async fn test_clear_history_empties_and_drops_session() {
        let (manager, backend, store) = setup();
        manager.select_persona(MEERA).await.unwrap();
        manager.send_message(MEERA, "hello").await.unwrap();

        manager.clear_history(MEERA).unwrap();
        assert_eq!(manager.transcript(MEERA), Some(vec![]));
        assert!(!manager.has_session(MEERA));

        let stored: TranscriptMap = storage::load_json(store.as_ref(), HISTORY_KEY).unwrap();
        assert_eq!(stored.get(MEERA), Some(&vec![]));

        // Next message opens a fresh session without a greeting
        manager.send_message(MEERA, "again").await.unwrap();
        assert_eq!(backend.sessions_created(), 2);
        assert_eq!(manager.transcript(MEERA).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_select_after_clear_greets() {
        let (manager, backend, _) = setup();
        manager.select_persona(MEERA).await.unwrap();
        manager.select_persona(ZARA).await.unwrap();
        manager.clear_history(MEERA).unwrap();

        manager.select_persona(MEERA).await.unwrap();
        assert_eq!(manager.transcript(MEERA).unwrap().len(), 1);
        assert_eq!(backend.prompts().last().unwrap().text, GREETING_PROMPT);
    }

    #[tokio::test]
    async fn test_clear_mid_stream_cancels() {
        let (manager, backend, _) = setup();
        let mut events = manager.subscribe();
        let tx = backend.push_manual();

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.send_message(MEERA, "hello").await }
        });
        wait_for(&mut events, is_placeholder).await;
        tx.send(Ok(Chunk::new("partial"))).await.unwrap();
        wait_for(&mut events, |e| matches!(e, AppEvent::ChunkAppended { .. })).await;

        manager.clear_history(MEERA).unwrap();
        assert!(!manager.is_loading(MEERA));

        let _ = tx.send(Ok(Chunk::new(" more"))).await;
        drop(tx);
        let result = task.await.unwrap();

        assert!(matches!(result, Err(ConversationError::Cancelled)));
        assert_eq!(manager.transcript(MEERA), Some(vec![]));
        assert_eq!(manager.error(), None);
        assert!(!manager.is_loading(MEERA));
    }

    #[tokio::test]
    async fn test_clear_leaves_other_personas_streaming() {
        let (manager, backend, _) = setup();
        let mut events = manager.subscribe();
        let tx = backend.push_manual();

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.send_message(ZARA, "pitch?").await }
        });
        wait_for(&mut events, is_placeholder).await;

        manager.clear_history(MEERA).unwrap();
        assert!(manager.is_loading(ZARA));

        tx.send(Ok(Chunk::new("Sure"))).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();
        assert_eq!(manager.transcript(ZARA).unwrap()[1].text, "Sure");
    }

    // =========================================================================
    // Persona edits
    // =========================================================================

    fn draft(instruction: &str) -> PersonaDraft {
        PersonaDraft::new("Meera", "Baker", instruction)
    }

    #[tokio::test]
    async fn test_edit_active_persona_restarts_greeting() {
        let (manager, backend, _) = setup();
        manager.select_persona(MEERA).await.unwrap();
        manager.send_message(MEERA, "hello").await.unwrap();

        backend.push_chunks(&["Fresh start"]);
        let updated = manager
            .update_persona(MEERA, draft("You bake bread."))
            .await
            .unwrap();
        assert_eq!(updated.id, MEERA);

        assert_eq!(
            texts(&manager.transcript(MEERA).unwrap()),
            vec![(Role::Model, "Fresh start")]
        );
        assert_eq!(backend.sessions_created(), 2);
        let last = backend.prompts().pop().unwrap();
        assert_eq!(last.system_instruction, "You bake bread.");
        assert_eq!(last.text, GREETING_PROMPT);
    }

    #[tokio::test]
    async fn test_edit_inactive_persona_discards_without_greeting() {
        let (manager, backend, _) = setup();
        manager.select_persona(MEERA).await.unwrap();
        manager.select_persona(ZARA).await.unwrap();
        let prompts_before = backend.prompts().len();

        manager
            .update_persona(MEERA, draft("You bake bread."))
            .await
            .unwrap();

        assert_eq!(manager.transcript(MEERA), None);
        assert!(!manager.has_session(MEERA));
        assert_eq!(backend.prompts().len(), prompts_before);

        manager.select_persona(MEERA).await.unwrap();
        assert_eq!(backend.prompts().len(), prompts_before + 1);
    }

    #[tokio::test]
    async fn test_edit_validation_error() {
        let (manager, _, _) = setup();
        let err = manager
            .update_persona(MEERA, PersonaDraft::new("", "x", "y"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Persona(_)));
    }

    #[tokio::test]
    async fn test_delete_active_persona() {
        let (manager, _, store) = setup();
        manager.select_persona(MEERA).await.unwrap();

        let removed = manager.delete_persona(MEERA).unwrap();
        assert_eq!(removed.id, MEERA);
        assert!(manager.persona(MEERA).is_none());
        assert_eq!(manager.transcript(MEERA), None);
        assert!(manager.active_persona().is_none());

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.active_persona_id, None);
        assert!(snapshot.messages.is_empty());

        let stored: TranscriptMap = storage::load_json(store.as_ref(), HISTORY_KEY).unwrap();
        assert!(!stored.contains_key(MEERA));
    }

    #[tokio::test]
    async fn test_delete_inactive_keeps_active() {
        let (manager, _, _) = setup();
        manager.select_persona(MEERA).await.unwrap();
        manager.delete_persona(ZARA).unwrap();
        assert_eq!(manager.active_persona().map(|p| p.id), Some(MEERA.to_string()));
    }

    #[tokio::test]
    async fn test_delete_mid_greeting_cancels() {
        let (manager, backend, _) = setup();
        let mut events = manager.subscribe();
        let tx = backend.push_manual();

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.select_persona(MEERA).await }
        });
        wait_for(&mut events, is_placeholder).await;

        manager.delete_persona(MEERA).unwrap();
        let _ = tx.send(Ok(Chunk::new("late"))).await;
        drop(tx);

        assert!(matches!(
            task.await.unwrap(),
            Err(ConversationError::Cancelled)
        ));
        assert_eq!(manager.transcript(MEERA), None);
        assert!(manager.active_persona().is_none());
        assert_eq!(manager.error(), None);
    }

    #[tokio::test]
    async fn test_add_persona_activates_and_greets() {
        let (manager, backend, _) = setup();
        backend.push_chunks(&["Hi, I am Kabir"]);

        let persona = manager
            .add_persona(PersonaDraft::new("Kabir", "Poet", "Speak in verse."))
            .await
            .unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.personas.last(), Some(&persona));
        assert_eq!(snapshot.active_persona_id, Some(persona.id.clone()));
        assert_eq!(texts(&snapshot.messages), vec![(Role::Model, "Hi, I am Kabir")]);
    }

    #[tokio::test]
    async fn test_add_persona_survives_greeting_failure() {
        let (manager, backend, _) = setup();
        backend.set_fail_sessions(true);

        let persona = manager
            .add_persona(PersonaDraft::new("Kabir", "Poet", "Speak in verse."))
            .await
            .unwrap();
        assert!(manager.persona(&persona.id).is_some());
        assert_eq!(manager.error().as_deref(), Some(SESSION_INIT_MESSAGE));
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[tokio::test]
    async fn test_state_survives_reload() {
        let (manager, backend, store) = setup();
        manager.select_persona(MEERA).await.unwrap();
        manager.send_message(MEERA, "yaad rakhna").await.unwrap();
        let kabir = manager
            .add_persona(PersonaDraft::new("Kabir", "Poet", "Speak in verse."))
            .await
            .unwrap();

        let reloaded = ConversationManager::new(Arc::new(backend.clone()), store.clone());
        assert_eq!(reloaded.personas(), manager.personas());
        assert_eq!(reloaded.transcript(MEERA), manager.transcript(MEERA));
        assert_eq!(reloaded.transcript(&kabir.id), manager.transcript(&kabir.id));
        // Sessions are not persisted
        assert!(!reloaded.has_session(MEERA));
        assert!(reloaded.active_persona().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_history_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(HISTORY_KEY, "{not json").unwrap();

        let manager = ConversationManager::new(Arc::new(ScriptedBackend::new()), store);
        assert_eq!(manager.transcript(MEERA), None);
        assert_eq!(manager.personas().len(), 4);
    }
}
