use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AppRole, ParseEnumError, User, UserId};

/// The two mutually exclusive workspaces offered at the landing step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    #[default]
    Researcher,
    Admin,
}

impl AppMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AppMode::Researcher => "researcher",
            AppMode::Admin => "admin",
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppMode {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "researcher" => Ok(AppMode::Researcher),
            "admin" => Ok(AppMode::Admin),
            _ => Err(ParseEnumError {
                column: "mode",
                value: value.to_string(),
                allowed: &["researcher", "admin"],
            }),
        }
    }
}

/// Acting identity threaded through every notebook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub app_role: AppRole,
    pub mode: AppMode,
    pub output_dir: PathBuf,
}

impl Session {
    pub fn new(user: &User, mode: AppMode, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_id: user.id,
            display_name: user.display_name.clone(),
            app_role: user.app_role,
            mode,
            output_dir: output_dir.into(),
        }
    }

    /// True only for an admin account working in Admin mode.
    pub fn is_admin(&self) -> bool {
        self.mode == AppMode::Admin && self.app_role == AppRole::Admin
    }
}
