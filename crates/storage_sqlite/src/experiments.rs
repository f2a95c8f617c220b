use core_types::{
    Experiment, ExperimentId, ExperimentMember, ExperimentStatus, NewExperiment, NewMember,
    NewTreatmentGroup, ProtocolDefaults, ProtocolSettings, TreatmentGroup, TreatmentGroupId,
    UserId,
};
use rusqlite::{Row, params};
use tracing::debug;
use uuid::Uuid;

use crate::StoreTx;
use crate::codec::{
    count, encode_metadata, get_date, get_enum, get_metadata, get_uuid, query_all, query_optional,
};
use crate::error::{Dependent, StoreError, StoreResult, classify};

const EXPERIMENT_COLUMNS: &str = "id, owner_user_id, name, description, experiment_type, status, \
     conditions_json, created_at, updated_at";
const MEMBER_COLUMNS: &str =
    "experiment_id, user_id, role, can_add_notes, created_at, updated_at";
const GROUP_COLUMNS: &str =
    "id, experiment_id, name, description, sort_order, created_at, updated_at";
const DEFAULTS_COLUMNS: &str = "experiment_id, serum_type, serum_concentration_pct, \
     block_minutes, primary_volume_ul, primary_incubation, secondary_volume_ul, \
     secondary_incubation, uses_edu, created_at, updated_at";

fn experiment_from_row(row: &Row<'_>) -> StoreResult<Experiment> {
    Ok(Experiment {
        id: get_uuid(row, "id")?,
        owner_user_id: get_uuid(row, "owner_user_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        experiment_type: row.get("experiment_type")?,
        status: get_enum(row, "status")?,
        conditions: get_metadata(row, "conditions_json")?,
        created_at: get_date(row, "created_at")?,
        updated_at: get_date(row, "updated_at")?,
    })
}

fn member_from_row(row: &Row<'_>) -> StoreResult<ExperimentMember> {
    Ok(ExperimentMember {
        experiment_id: get_uuid(row, "experiment_id")?,
        user_id: get_uuid(row, "user_id")?,
        role: get_enum(row, "role")?,
        can_add_notes: row.get("can_add_notes")?,
        created_at: get_date(row, "created_at")?,
        updated_at: get_date(row, "updated_at")?,
    })
}

fn group_from_row(row: &Row<'_>) -> StoreResult<TreatmentGroup> {
    Ok(TreatmentGroup {
        id: get_uuid(row, "id")?,
        experiment_id: get_uuid(row, "experiment_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        sort_order: row.get("sort_order")?,
        created_at: get_date(row, "created_at")?,
        updated_at: get_date(row, "updated_at")?,
    })
}

fn defaults_from_row(row: &Row<'_>) -> StoreResult<ProtocolDefaults> {
    Ok(ProtocolDefaults {
        experiment_id: get_uuid(row, "experiment_id")?,
        settings: ProtocolSettings {
            serum_type: row.get("serum_type")?,
            serum_concentration_pct: row.get("serum_concentration_pct")?,
            block_minutes: row.get("block_minutes")?,
            primary_volume_ul: row.get("primary_volume_ul")?,
            primary_incubation: row.get("primary_incubation")?,
            secondary_volume_ul: row.get("secondary_volume_ul")?,
            secondary_incubation: row.get("secondary_incubation")?,
            uses_edu: row.get("uses_edu")?,
        },
        created_at: get_date(row, "created_at")?,
        updated_at: get_date(row, "updated_at")?,
    })
}

impl StoreTx<'_> {
    pub fn create_experiment(&self, new: &NewExperiment) -> StoreResult<Experiment> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO experiments
                    (id, owner_user_id, name, description, experiment_type, status, conditions_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    id.to_string(),
                    new.owner_user_id.to_string(),
                    new.name,
                    new.description,
                    new.experiment_type,
                    new.status.as_str(),
                    encode_metadata(&new.conditions)?,
                ],
            )
            .map_err(|err| classify(err, Some("experiments"), id))?;
        debug!(experiment_id = %id, "created experiment");
        self.get_experiment(id)
    }

    pub fn get_experiment(&self, id: ExperimentId) -> StoreResult<Experiment> {
        query_optional(
            self.conn,
            &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = ?1"),
            [id.to_string()],
            experiment_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("experiment", id))
    }

    pub fn list_experiments(&self) -> StoreResult<Vec<Experiment>> {
        query_all(
            self.conn,
            &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY created_at, id"),
            [],
            experiment_from_row,
        )
    }

    pub fn list_experiments_by_owner(&self, owner: UserId) -> StoreResult<Vec<Experiment>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE owner_user_id = ?1 ORDER BY created_at, id"
            ),
            [owner.to_string()],
            experiment_from_row,
        )
    }

    /// Experiments the user owns or holds a membership in.
    pub fn list_experiments_for_member(&self, user: UserId) -> StoreResult<Vec<Experiment>> {
        query_all(
            self.conn,
            &format!(
                r#"
                SELECT {EXPERIMENT_COLUMNS} FROM experiments
                WHERE owner_user_id = ?1
                   OR id IN (SELECT experiment_id FROM experiment_members WHERE user_id = ?1)
                ORDER BY created_at, id
                "#
            ),
            [user.to_string()],
            experiment_from_row,
        )
    }

    /// Rewrites the mutable fields; the owner is fixed at creation.
    pub fn update_experiment(&self, experiment: &Experiment) -> StoreResult<Experiment> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE experiments
                SET name = ?2, description = ?3, experiment_type = ?4, status = ?5,
                    conditions_json = ?6,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = ?1
                "#,
                params![
                    experiment.id.to_string(),
                    experiment.name,
                    experiment.description,
                    experiment.experiment_type,
                    experiment.status.as_str(),
                    encode_metadata(&experiment.conditions)?,
                ],
            )
            .map_err(|err| classify(err, Some("experiments"), experiment.id))?;
        if changed == 0 {
            return Err(StoreError::not_found("experiment", experiment.id));
        }
        self.get_experiment(experiment.id)
    }

    pub fn set_experiment_status(
        &self,
        id: ExperimentId,
        status: ExperimentStatus,
    ) -> StoreResult<Experiment> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE experiments
                SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = ?1
                "#,
                params![id.to_string(), status.as_str()],
            )
            .map_err(|err| classify(err, Some("experiments"), id))?;
        if changed == 0 {
            return Err(StoreError::not_found("experiment", id));
        }
        self.get_experiment(id)
    }

    /// Removes the experiment with its members, groups, defaults, slides and exports.
    pub fn delete_experiment(&self, id: ExperimentId) -> StoreResult<Experiment> {
        let experiment = self.get_experiment(id)?;
        self.conn
            .execute("DELETE FROM experiments WHERE id = ?1", [id.to_string()])
            .map_err(|err| classify(err, Some("experiments"), id))?;
        debug!(experiment_id = %id, "deleted experiment");
        Ok(experiment)
    }

    pub fn add_member(&self, new: &NewMember) -> StoreResult<ExperimentMember> {
        let key = format!("{}/{}", new.experiment_id, new.user_id);
        self.conn
            .execute(
                r#"
                INSERT INTO experiment_members (experiment_id, user_id, role, can_add_notes)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    new.experiment_id.to_string(),
                    new.user_id.to_string(),
                    new.role.as_str(),
                    new.can_add_notes,
                ],
            )
            .map_err(|err| classify(err, Some("experiment_members"), &key))?;
        self.find_member(new.experiment_id, new.user_id)?
            .ok_or_else(|| StoreError::not_found("experiment_member", key))
    }

    pub fn find_member(
        &self,
        experiment: ExperimentId,
        user: UserId,
    ) -> StoreResult<Option<ExperimentMember>> {
        query_optional(
            self.conn,
            &format!(
                "SELECT {MEMBER_COLUMNS} FROM experiment_members WHERE experiment_id = ?1 AND user_id = ?2"
            ),
            [experiment.to_string(), user.to_string()],
            member_from_row,
        )
    }

    pub fn list_members(&self, experiment: ExperimentId) -> StoreResult<Vec<ExperimentMember>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {MEMBER_COLUMNS} FROM experiment_members WHERE experiment_id = ?1 ORDER BY created_at, user_id"
            ),
            [experiment.to_string()],
            member_from_row,
        )
    }

    pub fn update_member(&self, member: &ExperimentMember) -> StoreResult<ExperimentMember> {
        let key = format!("{}/{}", member.experiment_id, member.user_id);
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE experiment_members
                SET role = ?3, can_add_notes = ?4,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE experiment_id = ?1 AND user_id = ?2
                "#,
                params![
                    member.experiment_id.to_string(),
                    member.user_id.to_string(),
                    member.role.as_str(),
                    member.can_add_notes,
                ],
            )
            .map_err(|err| classify(err, Some("experiment_members"), &key))?;
        if changed == 0 {
            return Err(StoreError::not_found("experiment_member", key));
        }
        self.find_member(member.experiment_id, member.user_id)?
            .ok_or_else(|| StoreError::not_found("experiment_member", key))
    }

    pub fn remove_member(
        &self,
        experiment: ExperimentId,
        user: UserId,
    ) -> StoreResult<ExperimentMember> {
        let key = format!("{experiment}/{user}");
        let member = self
            .find_member(experiment, user)?
            .ok_or_else(|| StoreError::not_found("experiment_member", &key))?;
        self.conn
            .execute(
                "DELETE FROM experiment_members WHERE experiment_id = ?1 AND user_id = ?2",
                [experiment.to_string(), user.to_string()],
            )
            .map_err(|err| classify(err, Some("experiment_members"), &key))?;
        Ok(member)
    }

    pub fn create_treatment_group(&self, new: &NewTreatmentGroup) -> StoreResult<TreatmentGroup> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO treatment_groups (id, experiment_id, name, description, sort_order)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    id.to_string(),
                    new.experiment_id.to_string(),
                    new.name,
                    new.description,
                    new.sort_order,
                ],
            )
            .map_err(|err| classify(err, Some("treatment_groups"), id))?;
        self.get_treatment_group(id)
    }

    pub fn get_treatment_group(&self, id: TreatmentGroupId) -> StoreResult<TreatmentGroup> {
        query_optional(
            self.conn,
            &format!("SELECT {GROUP_COLUMNS} FROM treatment_groups WHERE id = ?1"),
            [id.to_string()],
            group_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("treatment_group", id))
    }

    /// Groups of an experiment in display order.
    pub fn list_treatment_groups(
        &self,
        experiment: ExperimentId,
    ) -> StoreResult<Vec<TreatmentGroup>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {GROUP_COLUMNS} FROM treatment_groups WHERE experiment_id = ?1 ORDER BY sort_order, name"
            ),
            [experiment.to_string()],
            group_from_row,
        )
    }

    pub fn update_treatment_group(&self, group: &TreatmentGroup) -> StoreResult<TreatmentGroup> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE treatment_groups
                SET name = ?2, description = ?3, sort_order = ?4,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = ?1
                "#,
                params![
                    group.id.to_string(),
                    group.name,
                    group.description,
                    group.sort_order,
                ],
            )
            .map_err(|err| classify(err, Some("treatment_groups"), group.id))?;
        if changed == 0 {
            return Err(StoreError::not_found("treatment_group", group.id));
        }
        self.get_treatment_group(group.id)
    }

    /// Refused while slides are still assigned to the group.
    pub fn delete_treatment_group(&self, id: TreatmentGroupId) -> StoreResult<TreatmentGroup> {
        let group = self.get_treatment_group(id)?;
        let slides = count(self.conn, "slides", "treatment_group_id", &id.to_string())?;
        if slides > 0 {
            return Err(StoreError::ReferentialIntegrity {
                table: "treatment_groups".to_string(),
                row: id.to_string(),
                blockers: vec![Dependent {
                    table: "slides",
                    rows: slides,
                }],
                detail: format!("treatment group `{}` still has slides", group.name),
            });
        }
        self.conn
            .execute("DELETE FROM treatment_groups WHERE id = ?1", [id.to_string()])
            .map_err(|err| classify(err, Some("treatment_groups"), id))?;
        Ok(group)
    }

    pub fn upsert_protocol_defaults(
        &self,
        experiment: ExperimentId,
        settings: &ProtocolSettings,
    ) -> StoreResult<ProtocolDefaults> {
        self.conn
            .execute(
                r#"
                INSERT INTO experiment_protocol_defaults
                    (experiment_id, serum_type, serum_concentration_pct, block_minutes,
                     primary_volume_ul, primary_incubation, secondary_volume_ul,
                     secondary_incubation, uses_edu)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(experiment_id) DO UPDATE SET
                    serum_type = excluded.serum_type,
                    serum_concentration_pct = excluded.serum_concentration_pct,
                    block_minutes = excluded.block_minutes,
                    primary_volume_ul = excluded.primary_volume_ul,
                    primary_incubation = excluded.primary_incubation,
                    secondary_volume_ul = excluded.secondary_volume_ul,
                    secondary_incubation = excluded.secondary_incubation,
                    uses_edu = excluded.uses_edu,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                "#,
                params![
                    experiment.to_string(),
                    settings.serum_type,
                    settings.serum_concentration_pct,
                    settings.block_minutes,
                    settings.primary_volume_ul,
                    settings.primary_incubation,
                    settings.secondary_volume_ul,
                    settings.secondary_incubation,
                    settings.uses_edu,
                ],
            )
            .map_err(|err| classify(err, Some("experiment_protocol_defaults"), experiment))?;
        self.get_protocol_defaults(experiment)?
            .ok_or_else(|| StoreError::not_found("experiment_protocol_defaults", experiment))
    }

    pub fn get_protocol_defaults(
        &self,
        experiment: ExperimentId,
    ) -> StoreResult<Option<ProtocolDefaults>> {
        query_optional(
            self.conn,
            &format!(
                "SELECT {DEFAULTS_COLUMNS} FROM experiment_protocol_defaults WHERE experiment_id = ?1"
            ),
            [experiment.to_string()],
            defaults_from_row,
        )
    }
}

#[cfg(test)]
mod tests {
    use core_types::{MemberRole, NewSlide, NewUser};

    use crate::error::ConstraintRule;
    use crate::test_util::store_with_fixture;
    use crate::{SqliteStore, StoreResult};

    use super::*;

    #[test]
    fn unknown_status_is_check_violation_and_draft_is_default() {
        let (store, fixture) = store_with_fixture();
        assert_eq!(fixture.experiment.status, ExperimentStatus::Draft);
        assert_eq!(fixture.experiment.created_at, fixture.experiment.updated_at);

        let err = store
            .write(|tx| -> StoreResult<usize> {
                Ok(tx.conn.execute(
                    "INSERT INTO experiments (id, owner_user_id, name, status) VALUES (?1, ?2, 'x', 'banana')",
                    [Uuid::new_v4().to_string(), fixture.owner.id.to_string()],
                )?)
            })
            .unwrap_err();
        assert_eq!(err.constraint_rule(), Some(ConstraintRule::Check));
    }

    #[test]
    fn missing_owner_is_referential_error() {
        let store = SqliteStore::in_memory().expect("store");
        let err = store
            .write(|tx| tx.create_experiment(&NewExperiment::new(Uuid::new_v4(), "Orphan")))
            .unwrap_err();
        assert!(err.is_referential());
    }

    #[test]
    fn delete_cascades_to_children() {
        let (store, fixture) = store_with_fixture();
        store
            .write(|tx| -> StoreResult<()> {
                let viewer = tx.create_user(&NewUser::researcher("Viewer"))?;
                tx.add_member(&NewMember {
                    experiment_id: fixture.experiment.id,
                    user_id: viewer.id,
                    role: MemberRole::Viewer,
                    can_add_notes: false,
                })?;
                tx.upsert_protocol_defaults(
                    fixture.experiment.id,
                    &ProtocolSettings {
                        serum_type: Some("goat".to_string()),
                        ..ProtocolSettings::default()
                    },
                )?;
                Ok(())
            })
            .expect("populate");

        store
            .write(|tx| tx.delete_experiment(fixture.experiment.id))
            .expect("delete");

        store
            .read(|tx| -> StoreResult<()> {
                assert!(tx.get_experiment(fixture.experiment.id).unwrap_err().is_not_found());
                assert!(tx.get_treatment_group(fixture.group.id).unwrap_err().is_not_found());
                assert!(tx.get_slide(fixture.slide.id).unwrap_err().is_not_found());
                assert!(tx.list_members(fixture.experiment.id)?.is_empty());
                assert!(tx.get_protocol_defaults(fixture.experiment.id)?.is_none());
                Ok(())
            })
            .expect("verify");
    }

    #[test]
    fn member_pair_is_unique() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| -> StoreResult<()> {
                let user = tx.create_user(&NewUser::researcher("Twice"))?;
                let member = NewMember {
                    experiment_id: fixture.experiment.id,
                    user_id: user.id,
                    role: MemberRole::Collaborator,
                    can_add_notes: true,
                };
                tx.add_member(&member)?;
                tx.add_member(&member)?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.constraint_rule(), Some(ConstraintRule::Unique));
    }

    #[test]
    fn member_experiments_include_owned_and_joined() {
        let (store, fixture) = store_with_fixture();
        let (member, other) = store
            .write(|tx| -> StoreResult<_> {
                let member = tx.create_user(&NewUser::researcher("Member"))?;
                let other = tx.create_experiment(&NewExperiment::new(member.id, "Own"))?;
                tx.add_member(&NewMember {
                    experiment_id: fixture.experiment.id,
                    user_id: member.id,
                    role: MemberRole::Collaborator,
                    can_add_notes: true,
                })?;
                Ok((member, other))
            })
            .expect("setup");

        let visible = store
            .read(|tx| tx.list_experiments_for_member(member.id))
            .expect("list");
        let ids: Vec<_> = visible.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&fixture.experiment.id));
        assert!(ids.contains(&other.id));
    }

    #[test]
    fn group_names_are_unique_per_experiment() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| {
                tx.create_treatment_group(&NewTreatmentGroup {
                    experiment_id: fixture.experiment.id,
                    name: "Control".to_string(),
                    description: None,
                    sort_order: 1,
                })
            })
            .unwrap_err();
        assert_eq!(err.constraint_rule(), Some(ConstraintRule::Unique));
    }

    #[test]
    fn group_delete_is_restricted_by_slides() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| tx.delete_treatment_group(fixture.group.id))
            .unwrap_err();
        match err {
            StoreError::ReferentialIntegrity { blockers, .. } => {
                assert_eq!(blockers, vec![Dependent { table: "slides", rows: 1 }]);
            }
            other => panic!("unexpected error: {other}"),
        }

        store
            .write(|tx| -> StoreResult<()> {
                tx.delete_slide(fixture.slide.id)?;
                tx.delete_treatment_group(fixture.group.id)?;
                Ok(())
            })
            .expect("delete after slides removed");
    }

    #[test]
    fn slide_group_must_belong_to_same_experiment() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| -> StoreResult<()> {
                let other = tx.create_experiment(&NewExperiment::new(fixture.owner.id, "Other"))?;
                tx.create_slide(&NewSlide::new(
                    other.id,
                    fixture.group.id,
                    fixture.owner.id,
                    "Cross",
                ))?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_referential());
    }

    #[test]
    fn protocol_defaults_upsert_replaces_values() {
        let (store, fixture) = store_with_fixture();
        let updated = store
            .write(|tx| -> StoreResult<ProtocolDefaults> {
                tx.upsert_protocol_defaults(
                    fixture.experiment.id,
                    &ProtocolSettings {
                        primary_volume_ul: Some(300.0),
                        ..ProtocolSettings::default()
                    },
                )?;
                tx.upsert_protocol_defaults(
                    fixture.experiment.id,
                    &ProtocolSettings {
                        primary_volume_ul: Some(250.0),
                        uses_edu: true,
                        ..ProtocolSettings::default()
                    },
                )
            })
            .expect("upsert");
        assert_eq!(updated.settings.primary_volume_ul, Some(250.0));
        assert!(updated.settings.uses_edu);
    }
}
