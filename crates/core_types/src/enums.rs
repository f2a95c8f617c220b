use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored or caller-supplied value outside a column's enumerated set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{value}` is not a valid {column} (expected one of: {})", .allowed.join(", "))]
pub struct ParseEnumError {
    pub column: &'static str,
    pub value: String,
    pub allowed: &'static [&'static str],
}

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($column:literal) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const COLUMN: &'static str = $column;

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        column: $column,
                        value: value.to_string(),
                        allowed: &[$($text),+],
                    }),
                }
            }
        }
    };
}

text_enum! {
    /// Account tier recorded on the user row; only `Admin` may open Admin mode.
    pub enum AppRole ("users.app_role") {
        Admin => "admin",
        Researcher => "researcher",
    }
}

text_enum! {
    pub enum ExperimentStatus ("experiments.status") {
        Draft => "draft",
        Active => "active",
        Completed => "completed",
        Archived => "archived",
    }
}

text_enum! {
    pub enum MemberRole ("experiment_members.role") {
        Owner => "owner",
        Collaborator => "collaborator",
        Viewer => "viewer",
    }
}

text_enum! {
    pub enum SlideStatus ("slides.status") {
        InStorage => "in_storage",
        CheckedOut => "checked_out",
        Imaged => "imaged",
        Archived => "archived",
        Destroyed => "destroyed",
    }
}

text_enum! {
    pub enum AntibodyRole ("antibody role") {
        Primary => "primary",
        Secondary => "secondary",
    }
}

text_enum! {
    pub enum AssetType ("slide_assets.asset_type") {
        Image => "image",
        RawMicroscopy => "raw_microscopy",
        CellCountExport => "cell_count_export",
        Analysis => "analysis",
        Other => "other",
    }
}

text_enum! {
    pub enum NoteType ("slide_notes.note_type") {
        General => "general",
        Imaging => "imaging",
        Storage => "storage",
        Analysis => "analysis",
        Presentation => "presentation",
    }
}

text_enum! {
    pub enum UsageType ("slide_usage_events.usage_type") {
        Presentation => "presentation",
        CellCounting => "cell_counting",
        Export => "export",
        Publication => "publication",
    }
}

text_enum! {
    pub enum AuditAction ("audit_log.action") {
        Create => "create",
        Update => "update",
        Delete => "delete",
    }
}

text_enum! {
    pub enum EntityKind ("audit_log.entity_type") {
        User => "user",
        Experiment => "experiment",
        ExperimentMember => "experiment_member",
        TreatmentGroup => "treatment_group",
        ProtocolDefaults => "experiment_protocol_defaults",
        Slide => "slide",
        Antibody => "antibody",
        SlidePrimaryAntibody => "slide_primary_antibody",
        SlideSecondaryAntibody => "slide_secondary_antibody",
        EduCondition => "slide_edu_condition",
        SlideAsset => "slide_asset",
        SlideNote => "slide_note",
        UsageEvent => "slide_usage_event",
        ExperimentExport => "experiment_export",
    }
}

text_enum! {
    /// Which half of the note feed an entry came from.
    pub enum FeedSource ("slide_note_feed.source") {
        Slide => "slide",
        Note => "note",
    }
}

impl Default for AppRole {
    fn default() -> Self {
        Self::Researcher
    }
}

impl Default for ExperimentStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl Default for SlideStatus {
    fn default() -> Self {
        Self::InStorage
    }
}

impl Default for NoteType {
    fn default() -> Self {
        Self::General
    }
}

impl AntibodyRole {
    pub fn table(self) -> &'static str {
        match self {
            Self::Primary => "slide_primary_antibodies",
            Self::Secondary => "slide_secondary_antibodies",
        }
    }

    pub fn entity_kind(self) -> EntityKind {
        match self {
            Self::Primary => EntityKind::SlidePrimaryAntibody,
            Self::Secondary => EntityKind::SlideSecondaryAntibody,
        }
    }
}

// The store accepts any enumerated value; these tables are the policy the
// notebook layer applies before issuing a status change.
impl ExperimentStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ExperimentStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Draft, Active)
                | (Draft, Archived)
                | (Active, Completed)
                | (Active, Archived)
                | (Completed, Active)
                | (Completed, Archived)
        )
    }
}

impl SlideStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        use SlideStatus::*;
        if self == next {
            return true;
        }
        match self {
            InStorage => matches!(next, CheckedOut | Archived | Destroyed),
            CheckedOut => matches!(next, InStorage | Imaged | Destroyed),
            Imaged => matches!(next, InStorage | CheckedOut | Archived | Destroyed),
            Archived => matches!(next, InStorage | Destroyed),
            Destroyed => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl MemberRole {
    pub fn can_mutate_slides(self) -> bool {
        matches!(self, Self::Owner | Self::Collaborator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_declared_value() {
        for status in ExperimentStatus::ALL {
            assert_eq!(status.as_str().parse::<ExperimentStatus>(), Ok(*status));
        }
        for status in SlideStatus::ALL {
            assert_eq!(status.as_str().parse::<SlideStatus>(), Ok(*status));
        }
    }

    #[test]
    fn rejects_value_outside_set() {
        let err = "banana".parse::<ExperimentStatus>().unwrap_err();
        assert_eq!(err.column, "experiments.status");
        assert_eq!(err.value, "banana");
        assert!(err.to_string().contains("draft, active, completed, archived"));
    }

    #[test]
    fn serde_uses_column_text() {
        let json = serde_json::to_string(&SlideStatus::CheckedOut).expect("serialize");
        assert_eq!(json, "\"checked_out\"");
        let usage: UsageType = serde_json::from_str("\"cell_counting\"").expect("deserialize");
        assert_eq!(usage, UsageType::CellCounting);
    }

    #[test]
    fn experiment_transitions_move_forward() {
        use ExperimentStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Archived));
        assert!(!Archived.can_transition_to(Draft));
        assert!(!Draft.can_transition_to(Completed));
        assert!(Active.can_transition_to(Active));
    }

    #[test]
    fn destroyed_slides_stay_destroyed() {
        use SlideStatus::*;
        assert!(InStorage.can_transition_to(CheckedOut));
        assert!(CheckedOut.can_transition_to(Imaged));
        assert!(Imaged.can_transition_to(Archived));
        for next in SlideStatus::ALL {
            assert_eq!(Destroyed.can_transition_to(*next), *next == Destroyed);
        }
        assert!(Destroyed.is_terminal());
    }
}
