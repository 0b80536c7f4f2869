//! Scripted chat turns.
//!
//! A turn is resolved from the client-supplied state label alone. When a
//! model is configured its reply is used if it parses as a turn response;
//! otherwise the fixed script for the state is returned. Nothing is kept
//! between turns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayError;

pub mod gemini;

pub use self::gemini::GeminiClient;

const STATE_IDLE: &str = "IDLE";
const STATE_GOAL_SELECTED: &str = "GOAL_SELECTED";
const STATE_OBJECTION: &str = "OBJECTION";

/// Conversation state label. Unknown labels are kept verbatim so they can be
/// echoed to the model, and script as [`TurnState::Objection`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TurnState {
    #[default]
    Idle,
    GoalSelected,
    Objection,
    Other(String),
}

impl From<String> for TurnState {
    fn from(label: String) -> Self {
        match label.as_str() {
            STATE_IDLE => TurnState::Idle,
            STATE_GOAL_SELECTED => TurnState::GoalSelected,
            STATE_OBJECTION => TurnState::Objection,
            _ => TurnState::Other(label),
        }
    }
}

impl From<TurnState> for String {
    fn from(state: TurnState) -> Self {
        match state {
            TurnState::Idle => STATE_IDLE.to_string(),
            TurnState::GoalSelected => STATE_GOAL_SELECTED.to_string(),
            TurnState::Objection => STATE_OBJECTION.to_string(),
            TurnState::Other(label) => label,
        }
    }
}

fn default_state() -> Value {
    Value::String(STATE_IDLE.to_string())
}

fn default_count() -> Value {
    Value::from(0)
}

fn default_payload() -> Value {
    Value::Object(Map::new())
}

/// Body of `/gemini/chat`. The caller resends the full context every turn.
///
/// Fields are kept as raw JSON and echoed to the model unchanged; only
/// `state` is interpreted, through [`TurnRequest::label`]. Defaults apply to
/// missing fields only, an explicit `null` is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default = "default_state")]
    pub state: Value,
    #[serde(default)]
    pub goal: Value,
    #[serde(default = "default_count")]
    pub count: Value,
    #[serde(default = "default_payload")]
    pub payload: Value,
}

impl Default for TurnRequest {
    fn default() -> Self {
        Self {
            state: default_state(),
            goal: Value::Null,
            count: default_count(),
            payload: default_payload(),
        }
    }
}

impl TurnRequest {
    /// State label driving the script. Non-string states (including `null`)
    /// are never a known label.
    pub fn label(&self) -> TurnState {
        match &self.state {
            Value::String(label) => TurnState::from(label.clone()),
            other => TurnState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub message: String,
    #[serde(default)]
    pub buttons: Vec<String>,
    pub next_state: TurnState,
    /// Any further members of a model reply, relayed as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn scripted(message: &str, buttons: &[&str], next_state: TurnState) -> TurnResponse {
    TurnResponse {
        message: message.to_string(),
        buttons: buttons.iter().map(|b| b.to_string()).collect(),
        next_state,
        extra: Map::new(),
    }
}

/// Fixed reply for a state label.
pub fn fallback(state: &TurnState) -> TurnResponse {
    match state {
        TurnState::Idle => scripted(
            "Eu sou o Especialista do Poder Supremo. Em 60s eu te digo se é para você. Qual seu objetivo agora?",
            &["Controle emocional", "Foco/Hábito", "Autoconfiança", "Influência/Carreira"],
            TurnState::Idle,
        ),
        TurnState::GoalSelected => scripted(
            "Feche os olhos 20s. Respire 4–4–4. Diga: “Eu comando a próxima decisão”. Isso é 1% do método. Quer começar hoje?",
            &["Quero meu acesso agora", "Tenho uma dúvida"],
            TurnState::GoalSelected,
        ),
        TurnState::Objection | TurnState::Other(_) => scripted(
            "Manda a real. O que te segura agora?",
            &["Preço", "Tempo", "Ceticismo", "Valores/Religião"],
            TurnState::Objection,
        ),
    }
}

/// Parses model output as a turn response. Anything that is not a JSON
/// object with `message` and `nextState` is rejected.
pub fn parse_model_reply(text: &str) -> Option<TurnResponse> {
    match serde_json::from_str::<TurnResponse>(text) {
        Ok(reply) => Some(reply),
        Err(err) => {
            tracing::debug!(error = %err, len = text.len(), "model reply is not a turn response");
            None
        }
    }
}

/// Pure transition: the parsed model reply if there is one, else the script.
pub fn resolve_turn(state: &TurnState, parsed: Option<TurnResponse>) -> TurnResponse {
    parsed.unwrap_or_else(|| fallback(state))
}

/// Text prompt sent to the model: system prompt, then the serialized turn.
pub fn compose_prompt(system_prompt: &str, req: &TurnRequest) -> Result<String, RelayError> {
    let input = serde_json::to_string(req)
        .map_err(|e| RelayError::Internal(format!("failed to encode turn: {}", e)))?;
    Ok(format!("{}\nINPUT:{}", system_prompt, input))
}

/// A text-completion backend for chat turns.
#[async_trait::async_trait]
pub trait TurnModel: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the raw text produced for `prompt` (empty when the backend
    /// produced nothing usable).
    async fn complete(&self, prompt: &str) -> Result<String, RelayError>;
}

#[derive(Clone)]
pub struct TurnOrchestrator {
    model: Option<Arc<dyn TurnModel>>,
    system_prompt: String,
}

impl TurnOrchestrator {
    pub fn new(model: Option<Arc<dyn TurnModel>>, system_prompt: impl Into<String>) -> Self {
        Self {
            model,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub async fn take_turn(&self, req: &TurnRequest) -> Result<TurnResponse, RelayError> {
        let state = req.label();
        let Some(model) = self.model.as_ref() else {
            return Ok(fallback(&state));
        };
        let prompt = compose_prompt(&self.system_prompt, req)?;
        let text = model.complete(&prompt).await?;
        let parsed = parse_model_reply(&text);
        if parsed.is_none() {
            tracing::debug!(model = %model.name(), state = ?state, "using scripted fallback");
        }
        Ok(resolve_turn(&state, parsed))
    }
}
