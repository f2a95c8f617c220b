use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    AntibodyId, AntibodyRole, AppRole, AssetId, AssetType, AuditAction, AuditId, EduConditionId,
    EntityKind, ExperimentId, ExperimentStatus, ExportId, FeedSource, MemberRole, Metadata,
    NoteId, NoteType, SlideId, SlideStatus, TreatmentGroupId, UsageEventId, UsageType, UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email: Option<String>,
    pub app_role: AppRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub app_role: AppRole,
}

impl NewUser {
    pub fn researcher(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            email: None,
            app_role: AppRole::Researcher,
        }
    }

    pub fn admin(display_name: impl Into<String>) -> Self {
        Self {
            app_role: AppRole::Admin,
            ..Self::researcher(display_name)
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub owner_user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub experiment_type: Option<String>,
    pub status: ExperimentStatus,
    pub conditions: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewExperiment {
    pub owner_user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub experiment_type: Option<String>,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub conditions: Metadata,
}

impl NewExperiment {
    pub fn new(owner_user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            owner_user_id,
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMember {
    pub experiment_id: ExperimentId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub can_add_notes: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMember {
    pub experiment_id: ExperimentId,
    pub user_id: UserId,
    pub role: MemberRole,
    #[serde(default)]
    pub can_add_notes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentGroup {
    pub id: TreatmentGroupId,
    pub experiment_id: ExperimentId,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTreatmentGroup {
    pub experiment_id: ExperimentId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

/// Experiment-wide reagent/protocol parameters; each may be overridden per slide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    #[serde(default)]
    pub serum_type: Option<String>,
    #[serde(default)]
    pub serum_concentration_pct: Option<f64>,
    #[serde(default)]
    pub block_minutes: Option<i64>,
    #[serde(default)]
    pub primary_volume_ul: Option<f64>,
    #[serde(default)]
    pub primary_incubation: Option<String>,
    #[serde(default)]
    pub secondary_volume_ul: Option<f64>,
    #[serde(default)]
    pub secondary_incubation: Option<String>,
    #[serde(default)]
    pub uses_edu: bool,
}

impl ProtocolSettings {
    /// Set fields only; unset defaults are left out so slide overrides can fill them.
    pub fn to_metadata(&self) -> Metadata {
        let mut map = Metadata::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };
        put("serum_type", self.serum_type.as_ref().map(|v| json!(v)));
        put(
            "serum_concentration_pct",
            self.serum_concentration_pct.map(|v| json!(v)),
        );
        put("block_minutes", self.block_minutes.map(|v| json!(v)));
        put("primary_volume_ul", self.primary_volume_ul.map(|v| json!(v)));
        put(
            "primary_incubation",
            self.primary_incubation.as_ref().map(|v| json!(v)),
        );
        put(
            "secondary_volume_ul",
            self.secondary_volume_ul.map(|v| json!(v)),
        );
        put(
            "secondary_incubation",
            self.secondary_incubation.as_ref().map(|v| json!(v)),
        );
        put("uses_edu", Some(json!(self.uses_edu)));
        map
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDefaults {
    pub experiment_id: ExperimentId,
    pub settings: ProtocolSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    pub id: SlideId,
    pub experiment_id: ExperimentId,
    pub treatment_group_id: TreatmentGroupId,
    pub owner_user_id: UserId,
    pub label: String,
    pub specimen_origin: Metadata,
    pub experiment_overrides: Metadata,
    pub storage_location: Option<String>,
    pub imaged_at: Option<DateTime<Utc>>,
    pub imaging_notes: Option<String>,
    pub status: SlideStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSlide {
    pub experiment_id: ExperimentId,
    pub treatment_group_id: TreatmentGroupId,
    pub owner_user_id: UserId,
    pub label: String,
    #[serde(default)]
    pub specimen_origin: Metadata,
    #[serde(default)]
    pub experiment_overrides: Metadata,
    #[serde(default)]
    pub storage_location: Option<String>,
    #[serde(default)]
    pub status: SlideStatus,
}

impl NewSlide {
    pub fn new(
        experiment_id: ExperimentId,
        treatment_group_id: TreatmentGroupId,
        owner_user_id: UserId,
        label: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id,
            treatment_group_id,
            owner_user_id,
            label: label.into(),
            specimen_origin: Metadata::new(),
            experiment_overrides: Metadata::new(),
            storage_location: None,
            status: SlideStatus::InStorage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Antibody {
    pub id: AntibodyId,
    pub name: String,
    pub target: Option<String>,
    pub host_species: String,
    pub vendor: Option<String>,
    pub catalog_number: Option<String>,
    pub lot_number: Option<String>,
    pub igg_subtype: Option<String>,
    pub fluorophore: Option<String>,
    pub anti_species: Option<String>,
    pub stock_concentration: Option<String>,
    pub is_secondary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Antibody {
    pub fn role(&self) -> AntibodyRole {
        if self.is_secondary {
            AntibodyRole::Secondary
        } else {
            AntibodyRole::Primary
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAntibody {
    pub name: String,
    #[serde(default)]
    pub target: Option<String>,
    pub host_species: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub catalog_number: Option<String>,
    #[serde(default)]
    pub lot_number: Option<String>,
    #[serde(default)]
    pub igg_subtype: Option<String>,
    #[serde(default)]
    pub fluorophore: Option<String>,
    #[serde(default)]
    pub anti_species: Option<String>,
    #[serde(default)]
    pub stock_concentration: Option<String>,
    #[serde(default)]
    pub is_secondary: bool,
}

impl NewAntibody {
    pub fn primary(name: impl Into<String>, host_species: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_species: host_species.into(),
            ..Self::default()
        }
    }

    pub fn secondary(
        name: impl Into<String>,
        host_species: impl Into<String>,
        anti_species: impl Into<String>,
        fluorophore: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host_species: host_species.into(),
            anti_species: Some(anti_species.into()),
            fluorophore: Some(fluorophore.into()),
            is_secondary: true,
            ..Self::default()
        }
    }
}

/// Per-use parameters of an antibody on a slide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AntibodyUsage {
    #[serde(default)]
    pub dilution: Option<String>,
    #[serde(default)]
    pub incubation_time: Option<String>,
    #[serde(default)]
    pub incubation_temperature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideAntibody {
    pub slide_id: SlideId,
    pub antibody_id: AntibodyId,
    pub role: AntibodyRole,
    pub usage: AntibodyUsage,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EduCondition {
    pub id: EduConditionId,
    pub slide_id: SlideId,
    pub edu_concentration_um: f64,
    pub incubation_hours: f64,
    pub administration_route: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEduCondition {
    pub slide_id: SlideId,
    pub edu_concentration_um: f64,
    pub incubation_hours: f64,
    #[serde(default)]
    pub administration_route: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideAsset {
    pub id: AssetId,
    pub slide_id: SlideId,
    pub asset_type: AssetType,
    pub uri: String,
    pub content_hash: Option<String>,
    pub metadata: Metadata,
    pub created_by_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSlideAsset {
    pub slide_id: SlideId,
    pub asset_type: AssetType,
    pub uri: String,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_by_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideNote {
    pub id: NoteId,
    pub slide_id: SlideId,
    pub author_user_id: UserId,
    pub note_type: NoteType,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSlideNote {
    pub slide_id: SlideId,
    pub author_user_id: UserId,
    #[serde(default)]
    pub note_type: NoteType,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: UsageEventId,
    pub slide_id: SlideId,
    pub used_by_user_id: UserId,
    pub usage_type: UsageType,
    pub context: Option<String>,
    pub metadata: Metadata,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUsageEvent {
    pub slide_id: SlideId,
    pub used_by_user_id: UserId,
    pub usage_type: UsageType,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub actor_user_id: UserId,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub action: AuditAction,
    pub before: Option<Metadata>,
    pub after: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub actor_user_id: UserId,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub action: AuditAction,
    #[serde(default)]
    pub before: Option<Metadata>,
    #[serde(default)]
    pub after: Option<Metadata>,
}

/// One row of the unified imaging-notes + slide-notes feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteFeedEntry {
    pub slide_id: SlideId,
    pub source: FeedSource,
    pub note_id: Option<NoteId>,
    pub note_type: NoteType,
    pub body: String,
    pub author_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub user_id: UserId,
    pub location: String,
    pub last_used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentExport {
    pub id: ExportId,
    pub experiment_id: ExperimentId,
    pub exported_by_user_id: UserId,
    pub file_path: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExperimentExport {
    pub experiment_id: ExperimentId,
    pub exported_by_user_id: UserId,
    pub file_path: String,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_settings_skip_unset_fields() {
        let settings = ProtocolSettings {
            serum_type: Some("goat".to_string()),
            primary_volume_ul: Some(300.0),
            ..ProtocolSettings::default()
        };
        let map = settings.to_metadata();
        assert_eq!(map.get("serum_type"), Some(&json!("goat")));
        assert_eq!(map.get("primary_volume_ul"), Some(&json!(300.0)));
        assert_eq!(map.get("uses_edu"), Some(&json!(false)));
        assert!(!map.contains_key("secondary_volume_ul"));
    }

    #[test]
    fn antibody_role_follows_secondary_flag() {
        let now = Utc::now();
        let mut antibody = Antibody {
            id: AntibodyId::new_v4(),
            name: "anti-GFAP".to_string(),
            target: Some("GFAP".to_string()),
            host_species: "rabbit".to_string(),
            vendor: None,
            catalog_number: None,
            lot_number: None,
            igg_subtype: None,
            fluorophore: None,
            anti_species: None,
            stock_concentration: None,
            is_secondary: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(antibody.role(), AntibodyRole::Primary);
        antibody.is_secondary = true;
        assert_eq!(antibody.role(), AntibodyRole::Secondary);
    }
}
