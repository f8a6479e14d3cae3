pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod navigation;
pub mod registry;
pub mod store;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::agent::{AgentDescriptor, AgentDirectoryEntry, GuardrailKind, HandoffEdge};
pub use domain::conversation::{
    ConversationId, ConversationState, HistoryItem, HousingContext, Role,
};
pub use domain::events::{AgentEvent, AgentEventKind, GuardrailResult, TurnMessage};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use navigation::{generate_navigation_commands, NavigationCommand, NavigationKind};
pub use registry::{AgentRegistry, RegistryError};
pub use store::{ConversationStore, StoreError};
