use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Coarse role category. Permissions hang off the category, not the role
/// name; rank is used only for dominance comparisons between two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleCategory {
    Admin,
    Jvc,
    Cqs,
    Tech,
    Plant,
    Viewer,
}

impl RoleCategory {
    pub const ALL: &'static [RoleCategory] = &[
        RoleCategory::Admin,
        RoleCategory::Jvc,
        RoleCategory::Cqs,
        RoleCategory::Tech,
        RoleCategory::Plant,
        RoleCategory::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleCategory::Admin => "ADMIN",
            RoleCategory::Jvc => "JVC",
            RoleCategory::Cqs => "CQS",
            RoleCategory::Tech => "TECH",
            RoleCategory::Plant => "PLANT",
            RoleCategory::Viewer => "VIEWER",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "ADMIN" => Ok(RoleCategory::Admin),
            "JVC" => Ok(RoleCategory::Jvc),
            "CQS" => Ok(RoleCategory::Cqs),
            "TECH" => Ok(RoleCategory::Tech),
            "PLANT" => Ok(RoleCategory::Plant),
            "VIEWER" => Ok(RoleCategory::Viewer),
            other => Err(AppError::validation(format!("unknown role {other}"))),
        }
    }

    /// Dominance rank. Not transitive permission inheritance: a higher rank
    /// only wins `dominates` comparisons.
    pub fn rank(&self) -> i32 {
        match self {
            RoleCategory::Admin => 100,
            RoleCategory::Jvc => 60,
            RoleCategory::Cqs => 50,
            RoleCategory::Tech => 50,
            RoleCategory::Plant => 40,
            RoleCategory::Viewer => 10,
        }
    }

    pub fn dominates(&self, other: RoleCategory) -> bool {
        self.rank() > other.rank()
    }
}

/// A declared role requirement, passed to the guard as plain data.
#[derive(Debug, Clone, Copy)]
pub struct RoleRequirement {
    pub any_of: &'static [RoleCategory],
    pub require_all: bool,
    pub admin_bypass: bool,
    pub message: Option<&'static str>,
}

impl RoleRequirement {
    pub const fn any(any_of: &'static [RoleCategory]) -> Self {
        Self {
            any_of,
            require_all: false,
            admin_bypass: true,
            message: None,
        }
    }

    pub const fn all(roles: &'static [RoleCategory]) -> Self {
        Self {
            any_of: roles,
            require_all: true,
            admin_bypass: true,
            message: None,
        }
    }

    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    pub const fn no_admin_bypass(mut self) -> Self {
        self.admin_bypass = false;
        self
    }

    pub fn check(&self, held: &[RoleCategory]) -> AppResult<()> {
        if self.admin_bypass && held.contains(&RoleCategory::Admin) {
            return Ok(());
        }

        let satisfied = if self.require_all {
            self.any_of.iter().all(|role| held.contains(role))
        } else {
            self.any_of.iter().any(|role| held.contains(role))
        };

        if satisfied {
            return Ok(());
        }

        let message = match self.message {
            Some(custom) => custom.to_string(),
            None => {
                let wanted: Vec<&str> = self.any_of.iter().map(|r| r.as_str()).collect();
                if self.require_all {
                    format!("requires all of roles {}", wanted.join(", "))
                } else {
                    format!("requires one of roles {}", wanted.join(", "))
                }
            }
        };
        Err(AppError::access_denied(message))
    }
}
