use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Lifecycle state of one material approval record. The stored state is the
/// single source of truth for whose turn it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    JvcPending,
    PlantPending,
    CqsPending,
    TechPending,
    Completed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::JvcPending => "JVC_PENDING",
            WorkflowState::PlantPending => "PLANT_PENDING",
            WorkflowState::CqsPending => "CQS_PENDING",
            WorkflowState::TechPending => "TECH_PENDING",
            WorkflowState::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "JVC_PENDING" => Ok(WorkflowState::JvcPending),
            "PLANT_PENDING" => Ok(WorkflowState::PlantPending),
            "CQS_PENDING" => Ok(WorkflowState::CqsPending),
            "TECH_PENDING" => Ok(WorkflowState::TechPending),
            "COMPLETED" => Ok(WorkflowState::Completed),
            other => Err(AppError::internal(format!(
                "unrecognized workflow state {other}"
            ))),
        }
    }

    pub fn allowed_transitions(&self) -> &'static [WorkflowState] {
        use WorkflowState::*;
        match self {
            JvcPending => &[PlantPending, CqsPending, TechPending],
            PlantPending => &[CqsPending, TechPending, JvcPending, Completed],
            CqsPending => &[PlantPending, TechPending, JvcPending],
            TechPending => &[PlantPending, CqsPending, JvcPending],
            Completed => &[],
        }
    }

    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// A workflow sits in a query state exactly while at least one open
    /// query of the corresponding team exists.
    pub fn is_query_state(&self) -> bool {
        matches!(
            self,
            WorkflowState::JvcPending | WorkflowState::CqsPending | WorkflowState::TechPending
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed)
    }

    /// Team whose open queries pin the workflow to this state, if any.
    pub fn pending_team(&self) -> Option<QueryTeam> {
        match self {
            WorkflowState::JvcPending => Some(QueryTeam::Jvc),
            WorkflowState::CqsPending => Some(QueryTeam::Cqs),
            WorkflowState::TechPending => Some(QueryTeam::Tech),
            _ => None,
        }
    }
}

/// Validates one edge of the transition relation; the state is left for the
/// caller to persist inside its transaction.
pub fn validate_transition(from: WorkflowState, to: WorkflowState) -> AppResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::invalid_transition(from.as_str(), to.as_str()))
    }
}

/// Team a query is addressed to (and whose pending state it forces).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryTeam {
    Cqs,
    Tech,
    Jvc,
}

impl QueryTeam {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryTeam::Cqs => "CQS",
            QueryTeam::Tech => "TECH",
            QueryTeam::Jvc => "JVC",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "CQS" => Ok(QueryTeam::Cqs),
            "TECH" => Ok(QueryTeam::Tech),
            "JVC" => Ok(QueryTeam::Jvc),
            other => Err(AppError::validation(format!("unknown query team {other}"))),
        }
    }

    pub fn pending_state(&self) -> WorkflowState {
        match self {
            QueryTeam::Cqs => WorkflowState::CqsPending,
            QueryTeam::Tech => WorkflowState::TechPending,
            QueryTeam::Jvc => WorkflowState::JvcPending,
        }
    }
}

/// Re-derives workflow state from the teams of still-open queries, ordered
/// newest first. With no open queries the record returns to the plant.
pub fn derive_state(open_teams_newest_first: &[QueryTeam]) -> WorkflowState {
    match open_teams_newest_first.first() {
        Some(team) => team.pending_state(),
        None => WorkflowState::PlantPending,
    }
}
