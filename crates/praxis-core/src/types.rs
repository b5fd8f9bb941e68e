//! Domain types shared across Praxis crates.
//!
//! These describe protocol definitions and run records as the scheduler
//! sees them: opaque metadata with the handful of fields orchestration
//! needs. All types are JSON-serializable for storage at rest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON object type used for parameters, constraints, and state blobs.
pub type JsonMap = serde_json::Map<String, Value>;

/// Unique identifier for a protocol run.
pub type RunId = String;

// ── Protocol definition ────────────────────────────────────────────

/// A declared asset need on a protocol definition.
///
/// Asset *discovery* happens elsewhere; by the time the scheduler sees
/// a declaration it names a concrete, reservable resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDeclaration {
    /// Resource identifier (instrument name, consumable lot, deck slot).
    pub name: String,
    /// Type/category string, e.g. "liquid_handler" or "plate".
    pub asset_type: String,
    /// Optional free-form constraints (volume, temperature, ...).
    #[serde(default)]
    pub constraints: JsonMap,
    /// Optional assets do not block scheduling when unavailable.
    #[serde(default)]
    pub optional: bool,
}

impl AssetDeclaration {
    pub fn new(name: impl Into<String>, asset_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset_type: asset_type.into(),
            constraints: JsonMap::new(),
            optional: false,
        }
    }
}

/// Protocol definition as resolved from the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDefinition {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Assets the protocol needs exclusive use of.
    #[serde(default)]
    pub assets: Vec<AssetDeclaration>,
    /// Whether the protocol expects a pre-configured deck.
    #[serde(default)]
    pub requires_deck: bool,
    /// Name of the user parameter carrying the deck identifier.
    #[serde(default)]
    pub deck_param: Option<String>,
    /// Estimated wall-clock duration, if the author provided one.
    #[serde(default)]
    pub estimated_duration_secs: Option<u64>,
}

impl ProtocolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: None,
            assets: Vec::new(),
            requires_deck: false,
            deck_param: None,
            estimated_duration_secs: None,
        }
    }
}

// ── Run record ─────────────────────────────────────────────────────

/// Lifecycle status persisted on a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Scheduled => "SCHEDULED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Run record as handed to the scheduler by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub protocol_name: String,
    /// Resolved definition, when the caller already attached one.
    #[serde(default)]
    pub definition: Option<ProtocolDefinition>,
    pub status: RunStatus,
    /// Scheduling priority tag; higher is more urgent.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Unix timestamp (seconds) when the run was created.
    pub created_at: u64,
}

fn default_priority() -> u32 {
    1
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, protocol_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            protocol_name: protocol_name.into(),
            definition: None,
            status: RunStatus::Pending,
            priority: default_priority(),
            created_at: epoch_secs(),
        }
    }

    pub fn with_definition(mut self, definition: ProtocolDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
