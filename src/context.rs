//! Synthesis context: who is speaking, in which voice and language.
//!
//! A [`SynthesisContext`] is derived fresh for every request from the session
//! attached to the originating [`Message`]. Its `namespace` partitions the
//! sentence cache, so the same sentence spoken by two voices never collides.

use std::{cell::RefCell, collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    cache::CacheStore,
    config::CacheConfig,
    registry::CacheRegistry,
};

/// Session id that always resolves to the process default session.
pub const DEFAULT_SESSION_ID: &str = "default";

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Bus-style message that triggered a synthesis request. Opaque to the core
/// apart from `context["session"]`; it travels with every playback item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, data: Value, context: Map<String, Value>) -> Self {
        Self { msg_type: msg_type.into(), data, context }
    }

    /// Synthetic `speak` message carrying only a session id.
    pub fn speak(identifier: Option<&str>) -> Self {
        let mut context = Map::new();
        context.insert("session".to_string(), json!({ "session_id": identifier }));
        Self::new("speak", Value::Null, context)
    }

    pub fn session_value(&self) -> Option<&Value> {
        self.context.get("session")
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_value()?.get("session_id")?.as_str()
    }
}

thread_local! {
    static CURRENT_MESSAGE: RefCell<Option<Message>> = const { RefCell::new(None) };
}

/// Restores the previous ambient message when the scope ends, even on panic.
struct AmbientGuard(Option<Message>);

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT_MESSAGE.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Run `f` with `message` as this thread's in-flight message.
///
/// Handlers invoked from a bus callback use this so that synthesis requests
/// issued without an explicit message still resolve the caller's session.
pub fn with_message<R>(message: Message, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_MESSAGE.with(|slot| slot.borrow_mut().replace(message));
    let _guard = AmbientGuard(previous);
    f()
}

/// The message installed by the innermost [`with_message`] on this thread.
pub fn current_message() -> Option<Message> {
    CURRENT_MESSAGE.with(|slot| slot.borrow().clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsPreferences {
    #[serde(default)]
    pub plugin_id: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub tts_preferences: TtsPreferences,
}

fn default_lang() -> String {
    "en-us".to_string()
}

impl Session {
    pub fn new(session_id: impl Into<String>, lang: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            lang: lang.into(),
            tts_preferences: TtsPreferences { plugin_id: plugin_id.into(), config: Map::new() },
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.tts_preferences
            .config
            .insert("voice".to_string(), Value::String(voice.into()));
        self
    }

    /// Preferred voice, `"default"` when the session does not name one.
    pub fn voice(&self) -> &str {
        self.tts_preferences
            .config
            .get("voice")
            .and_then(Value::as_str)
            .unwrap_or("default")
    }
}

/// Session storage, external to the core.
pub trait SessionSource: Send + Sync {
    /// Process default session, used when a request carries no usable session.
    fn default_session(&self) -> Session;

    /// Session a message belongs to.
    fn session_for(&self, message: &Message) -> Session;
}

/// In-memory session registry.
///
/// A message carrying a full session object (anything beyond a bare
/// `session_id`) yields that session and registers it; a bare id yields the
/// registered session; unknown ids fall back to the default session.
pub struct SessionManager {
    default: RwLock<Session>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(default: Session) -> Self {
        Self { default: RwLock::new(default), sessions: RwLock::new(HashMap::new()) }
    }

    pub fn set_default(&self, session: Session) {
        *self.default.write() = session;
    }

    pub fn register(&self, session: Session) {
        self.sessions.write().insert(session.session_id.clone(), session);
    }
}

impl SessionSource for SessionManager {
    fn default_session(&self) -> Session {
        self.default.read().clone()
    }

    fn session_for(&self, message: &Message) -> Session {
        let Some(value) = message.session_value() else {
            return self.default_session();
        };
        let id = match message.session_id() {
            Some(id) if id != DEFAULT_SESSION_ID => id,
            _ => return self.default_session(),
        };

        let is_full = value.as_object().map_or(false, |obj| obj.len() > 1);
        if is_full {
            // Fields the message leaves out come from the default session.
            let mut merged = serde_json::to_value(self.default_session()).unwrap_or(Value::Null);
            merge_json(&mut merged, value);
            if let Ok(session) = serde_json::from_value::<Session>(merged) {
                self.register(session.clone());
                return session;
            }
        }

        self.sessions
            .read()
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.default_session())
    }
}

/// Overlay `patch` onto `base`, object by object. Nulls in `patch` are ignored.
fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        if !value.is_null() {
                            base.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, patch) => *base = patch.clone(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis context
// ─────────────────────────────────────────────────────────────────────────────

/// Cache namespace for a plugin / voice / language triple.
pub fn namespace(plugin_id: &str, voice: &str, lang: &str) -> String {
    format!("{plugin_id}/{voice}/{lang}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisContext {
    pub plugin_id: String,
    pub voice: String,
    pub lang: String,
    pub namespace: String,
}

impl SynthesisContext {
    pub fn new(plugin_id: impl Into<String>, voice: impl Into<String>, lang: impl Into<String>) -> Self {
        let (plugin_id, voice, lang) = (plugin_id.into(), voice.into(), lang.into());
        let namespace = namespace(&plugin_id, &voice, &lang);
        Self { plugin_id, voice, lang, namespace }
    }

    pub fn resolve(session: &Session) -> Self {
        Self::new(&session.tts_preferences.plugin_id, session.voice(), &session.lang)
    }

    /// Context for `message`, or for the default session when there is none.
    pub fn from_source(source: &dyn SessionSource, message: Option<&Message>) -> Self {
        let session = match message {
            Some(m) => source.session_for(m),
            None => source.default_session(),
        };
        Self::resolve(&session)
    }

    /// The shared cache store of this context's namespace.
    pub fn get_cache(
        &self,
        registry: &CacheRegistry,
        config: &CacheConfig,
        audio_ext: &str,
    ) -> Arc<dyn CacheStore> {
        registry.get_cache(&self.namespace, config, audio_ext)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
