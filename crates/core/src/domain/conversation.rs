use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub role: Role,
    pub content: String,
}

impl HistoryItem {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Structured per-conversation context shared with every agent.
///
/// Agents and their tools fill these fields in as the caller identifies
/// themselves; the orchestrator only ever compares snapshots of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HousingContext {
    pub t_code: Option<String>,
    pub participant_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub participant_type: Option<String>,
    pub language: String,
    pub unit_address: Option<String>,
    pub inspection_id: Option<String>,
    pub inspection_date: Option<String>,
    pub inspector_name: Option<String>,
    pub door_codes: Option<String>,
    pub payment_method: Option<String>,
    pub documentation_pending: bool,
    pub hps_worker_name: Option<String>,
    pub appointment_date: Option<String>,
    pub case_type: Option<String>,
    pub account_number: Option<String>,
}

impl Default for HousingContext {
    fn default() -> Self {
        Self {
            t_code: None,
            participant_name: None,
            phone_number: None,
            email: None,
            participant_type: None,
            language: "english".to_string(),
            unit_address: None,
            inspection_id: None,
            inspection_date: None,
            inspector_name: None,
            door_codes: None,
            payment_method: None,
            documentation_pending: false,
            hps_worker_name: None,
            appointment_date: None,
            case_type: None,
            account_number: None,
        }
    }
}

impl HousingContext {
    /// Context for a brand-new conversation. The account number is a demo
    /// placeholder until real participant data is attached.
    pub fn initial() -> Self {
        let account_number = rand::thread_rng().gen_range(10_000_000u32..=99_999_999u32);
        Self { account_number: Some(account_number.to_string()), ..Self::default() }
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }
}

/// Keys of `after` whose value differs from `before`, mapped to the new value.
pub fn diff_fields(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    after
        .iter()
        .filter(|(key, value)| before.get(key.as_str()) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: ConversationId,
    pub history: Vec<HistoryItem>,
    pub context: HousingContext,
    pub current_agent: String,
    /// Write version; 0 means the state has never been persisted.
    #[serde(default)]
    pub version: u64,
}

impl ConversationState {
    pub fn new(id: ConversationId, current_agent: impl Into<String>) -> Self {
        Self {
            id,
            history: Vec::new(),
            context: HousingContext::initial(),
            current_agent: current_agent.into(),
            version: 0,
        }
    }
}
