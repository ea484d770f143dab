//! Agent registry.
//!
//! Agents are variants of one capability set; concrete kinds differ only by
//! their declaration here (dependencies, model tier, default tools,
//! parallelism, timeout) and by their prompt/parse behavior in
//! [`crate::agents`]. Avoids per-agent types: one enum plus a table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model cost tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Lite,
    Pro,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Lite => "lite",
            ModelTier::Pro => "pro",
        }
    }
}

/// Every agent kind the engine can schedule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    DocumentClassifier,
    EntityExtraction,
    Timeline,
    KeyFacts,
    Discrepancy,
    Risk,
    Summary,
    PrivilegeCheck,
    Relationship,
    TabularExtract,
    DraftEditor,
    DeepReason,
}

impl AgentKind {
    /// All kinds, in declaration order.
    pub const ALL: [AgentKind; 12] = [
        AgentKind::DocumentClassifier,
        AgentKind::EntityExtraction,
        AgentKind::Timeline,
        AgentKind::KeyFacts,
        AgentKind::Discrepancy,
        AgentKind::Risk,
        AgentKind::Summary,
        AgentKind::PrivilegeCheck,
        AgentKind::Relationship,
        AgentKind::TabularExtract,
        AgentKind::DraftEditor,
        AgentKind::DeepReason,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::DocumentClassifier => "document_classifier",
            AgentKind::EntityExtraction => "entity_extraction",
            AgentKind::Timeline => "timeline",
            AgentKind::KeyFacts => "key_facts",
            AgentKind::Discrepancy => "discrepancy",
            AgentKind::Risk => "risk",
            AgentKind::Summary => "summary",
            AgentKind::PrivilegeCheck => "privilege_check",
            AgentKind::Relationship => "relationship",
            AgentKind::TabularExtract => "tabular_extract",
            AgentKind::DraftEditor => "draft_editor",
            AgentKind::DeepReason => "deep_reason",
        }
    }

    /// The registry declaration for this kind.
    pub fn spec(&self) -> &'static AgentSpec {
        &SPECS[*self as usize]
    }

    /// Declared dependencies.
    pub fn depends_on(&self) -> &'static [AgentKind] {
        self.spec().depends_on
    }

    /// Whether this kind has no dependencies.
    pub fn is_independent(&self) -> bool {
        self.spec().depends_on.is_empty()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown agent kind: {s}"))
    }
}

/// Declared properties of one agent kind.
#[derive(Debug)]
pub struct AgentSpec {
    pub kind: AgentKind,

    /// Kinds whose results must be present in state before this one runs.
    pub depends_on: &'static [AgentKind],

    /// Default model tier (may be upgraded by the model selector).
    pub tier: ModelTier,

    /// Default tool names bound to the LLM call.
    pub tools: &'static [&'static str],

    /// Whether the kind may run inside a parallel fan-out.
    pub parallelizable: bool,

    /// Whether re-running with identical inputs yields identical output.
    pub idempotent: bool,

    /// Default per-run timeout in seconds.
    pub timeout_secs: u64,
}

/// The declaration table. Indexed by `AgentKind as usize`.
static SPECS: [AgentSpec; 12] = [
    AgentSpec {
        kind: AgentKind::DocumentClassifier,
        depends_on: &[],
        tier: ModelTier::Lite,
        tools: &[],
        parallelizable: true,
        idempotent: true,
        timeout_secs: 120,
    },
    AgentSpec {
        kind: AgentKind::EntityExtraction,
        depends_on: &[],
        tier: ModelTier::Lite,
        tools: &[],
        parallelizable: true,
        idempotent: true,
        timeout_secs: 120,
    },
    AgentSpec {
        kind: AgentKind::Timeline,
        depends_on: &[],
        tier: ModelTier::Lite,
        tools: &[],
        parallelizable: true,
        idempotent: true,
        timeout_secs: 120,
    },
    AgentSpec {
        kind: AgentKind::KeyFacts,
        depends_on: &[],
        tier: ModelTier::Lite,
        tools: &[],
        parallelizable: true,
        idempotent: true,
        timeout_secs: 120,
    },
    AgentSpec {
        kind: AgentKind::Discrepancy,
        depends_on: &[],
        tier: ModelTier::Pro,
        tools: &[],
        parallelizable: true,
        idempotent: true,
        timeout_secs: 180,
    },
    AgentSpec {
        kind: AgentKind::Risk,
        depends_on: &[AgentKind::Discrepancy],
        tier: ModelTier::Pro,
        tools: &[],
        parallelizable: false,
        idempotent: true,
        timeout_secs: 180,
    },
    AgentSpec {
        kind: AgentKind::Summary,
        depends_on: &[AgentKind::KeyFacts],
        tier: ModelTier::Pro,
        tools: &[],
        parallelizable: false,
        idempotent: true,
        timeout_secs: 120,
    },
    AgentSpec {
        kind: AgentKind::PrivilegeCheck,
        depends_on: &[AgentKind::DocumentClassifier],
        tier: ModelTier::Pro,
        tools: &[],
        parallelizable: false,
        idempotent: true,
        timeout_secs: 120,
    },
    AgentSpec {
        kind: AgentKind::Relationship,
        depends_on: &[AgentKind::EntityExtraction],
        tier: ModelTier::Pro,
        tools: &[],
        parallelizable: false,
        idempotent: true,
        timeout_secs: 120,
    },
    AgentSpec {
        kind: AgentKind::TabularExtract,
        depends_on: &[],
        tier: ModelTier::Lite,
        tools: &[],
        // Runs alone: the sub-graph may suspend for human input.
        parallelizable: false,
        idempotent: false,
        timeout_secs: 600,
    },
    AgentSpec {
        kind: AgentKind::DraftEditor,
        depends_on: &[],
        tier: ModelTier::Pro,
        tools: &["document_search"],
        parallelizable: true,
        idempotent: false,
        timeout_secs: 180,
    },
    AgentSpec {
        kind: AgentKind::DeepReason,
        depends_on: &[],
        tier: ModelTier::Pro,
        tools: &["document_search"],
        parallelizable: true,
        idempotent: true,
        timeout_secs: 300,
    },
];

/// Dependent agents in routing priority order.
pub const DEPENDENT_PRIORITY: [AgentKind; 3] =
    [AgentKind::Risk, AgentKind::Summary, AgentKind::Relationship];
