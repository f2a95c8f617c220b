use core_types::{
    EntityKind, Experiment, ExperimentId, ExperimentMember, ExperimentStatus, MemberRole,
    NewExperiment, NewMember, NewTreatmentGroup, ProtocolDefaults, ProtocolSettings, Session,
    TreatmentGroup, TreatmentGroupId, UserId,
};
use storage_sqlite::StoreError;
use tracing::info;

use crate::policy::authorize;
use crate::{
    Notebook, NotebookError, Permission, Result, audit_created, audit_deleted, audit_updated,
};

fn check_transition(experiment: &Experiment, next: ExperimentStatus) -> Result<()> {
    if experiment.status.can_transition_to(next) {
        return Ok(());
    }
    Err(NotebookError::InvalidStatusTransition {
        entity: "experiment",
        id: experiment.id.to_string(),
        from: experiment.status.to_string(),
        to: next.to_string(),
    })
}

/// The creator's row must stay an `owner` membership while the experiment exists.
fn guard_creator_membership(
    experiment: &Experiment,
    user: UserId,
    next_role: Option<MemberRole>,
) -> Result<()> {
    if user == experiment.owner_user_id && next_role != Some(MemberRole::Owner) {
        return Err(NotebookError::CreatorMembership {
            experiment: experiment.id,
            user,
        });
    }
    Ok(())
}

impl Notebook {
    /// Creates an experiment owned by the session user, who also becomes its `owner`
    /// member.
    pub fn create_experiment(&self, session: &Session, new: &NewExperiment) -> Result<Experiment> {
        let new = NewExperiment {
            owner_user_id: session.user_id,
            ..new.clone()
        };
        self.store.write(|tx| {
            let experiment = tx.create_experiment(&new)?;
            tx.add_member(&NewMember {
                experiment_id: experiment.id,
                user_id: session.user_id,
                role: MemberRole::Owner,
                can_add_notes: true,
            })?;
            audit_created(tx, session, EntityKind::Experiment, experiment.id, &experiment)?;
            info!(experiment_id = %experiment.id, name = %experiment.name, "created experiment");
            Ok(experiment)
        })
    }

    pub fn get_experiment(&self, session: &Session, id: ExperimentId) -> Result<Experiment> {
        self.store.read(|tx| {
            let experiment = tx.get_experiment(id)?;
            authorize(tx, session, Permission::Read, &experiment)?;
            Ok(experiment)
        })
    }

    /// Everything in Admin mode, otherwise experiments the user owns or belongs to.
    pub fn list_experiments(&self, session: &Session) -> Result<Vec<Experiment>> {
        self.store.read(|tx| {
            if session.is_admin() {
                Ok(tx.list_experiments()?)
            } else {
                Ok(tx.list_experiments_for_member(session.user_id)?)
            }
        })
    }

    pub fn update_experiment(
        &self,
        session: &Session,
        experiment: &Experiment,
    ) -> Result<Experiment> {
        self.store.write(|tx| {
            let before = tx.get_experiment(experiment.id)?;
            authorize(tx, session, Permission::ManageExperiment, &before)?;
            check_transition(&before, experiment.status)?;
            let after = tx.update_experiment(experiment)?;
            audit_updated(tx, session, EntityKind::Experiment, after.id, &before, &after)?;
            Ok(after)
        })
    }

    pub fn set_experiment_status(
        &self,
        session: &Session,
        id: ExperimentId,
        status: ExperimentStatus,
    ) -> Result<Experiment> {
        self.store.write(|tx| {
            let before = tx.get_experiment(id)?;
            authorize(tx, session, Permission::ManageExperiment, &before)?;
            check_transition(&before, status)?;
            let after = tx.set_experiment_status(id, status)?;
            audit_updated(tx, session, EntityKind::Experiment, id, &before, &after)?;
            info!(
                experiment_id = %id,
                from = %before.status,
                to = %status,
                "experiment status changed"
            );
            Ok(after)
        })
    }

    /// Deletes the experiment together with its members, groups, defaults, slides and
    /// exports.
    pub fn delete_experiment(&self, session: &Session, id: ExperimentId) -> Result<Experiment> {
        self.store.write(|tx| {
            let experiment = tx.get_experiment(id)?;
            authorize(tx, session, Permission::ManageExperiment, &experiment)?;
            let deleted = tx.delete_experiment(id)?;
            audit_deleted(tx, session, EntityKind::Experiment, id, &deleted)?;
            info!(experiment_id = %id, "deleted experiment");
            Ok(deleted)
        })
    }

    pub fn add_member(&self, session: &Session, new: &NewMember) -> Result<ExperimentMember> {
        self.store.write(|tx| {
            let experiment = tx.get_experiment(new.experiment_id)?;
            authorize(tx, session, Permission::ManageExperiment, &experiment)?;
            let member = tx.add_member(new)?;
            audit_created(
                tx,
                session,
                EntityKind::ExperimentMember,
                member_key(member.experiment_id, member.user_id),
                &member,
            )?;
            Ok(member)
        })
    }

    pub fn update_member(
        &self,
        session: &Session,
        member: &ExperimentMember,
    ) -> Result<ExperimentMember> {
        self.store.write(|tx| {
            let experiment = tx.get_experiment(member.experiment_id)?;
            authorize(tx, session, Permission::ManageExperiment, &experiment)?;
            guard_creator_membership(&experiment, member.user_id, Some(member.role))?;
            let key = member_key(member.experiment_id, member.user_id);
            let before = tx
                .find_member(member.experiment_id, member.user_id)?
                .ok_or_else(|| StoreError::not_found("experiment_member", &key))?;
            let after = tx.update_member(member)?;
            audit_updated(tx, session, EntityKind::ExperimentMember, key, &before, &after)?;
            Ok(after)
        })
    }

    pub fn remove_member(
        &self,
        session: &Session,
        experiment: ExperimentId,
        user: UserId,
    ) -> Result<ExperimentMember> {
        self.store.write(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::ManageExperiment, &parent)?;
            guard_creator_membership(&parent, user, None)?;
            let removed = tx.remove_member(experiment, user)?;
            audit_deleted(
                tx,
                session,
                EntityKind::ExperimentMember,
                member_key(experiment, user),
                &removed,
            )?;
            Ok(removed)
        })
    }

    pub fn list_members(
        &self,
        session: &Session,
        experiment: ExperimentId,
    ) -> Result<Vec<ExperimentMember>> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            Ok(tx.list_members(experiment)?)
        })
    }

    pub fn create_treatment_group(
        &self,
        session: &Session,
        new: &NewTreatmentGroup,
    ) -> Result<TreatmentGroup> {
        self.store.write(|tx| {
            let experiment = tx.get_experiment(new.experiment_id)?;
            authorize(tx, session, Permission::MutateSlides, &experiment)?;
            let group = tx.create_treatment_group(new)?;
            audit_created(tx, session, EntityKind::TreatmentGroup, group.id, &group)?;
            Ok(group)
        })
    }

    pub fn update_treatment_group(
        &self,
        session: &Session,
        group: &TreatmentGroup,
    ) -> Result<TreatmentGroup> {
        self.store.write(|tx| {
            let before = tx.get_treatment_group(group.id)?;
            let experiment = tx.get_experiment(before.experiment_id)?;
            authorize(tx, session, Permission::MutateSlides, &experiment)?;
            let after = tx.update_treatment_group(group)?;
            audit_updated(tx, session, EntityKind::TreatmentGroup, after.id, &before, &after)?;
            Ok(after)
        })
    }

    /// Refused while slides still sit in the group.
    pub fn delete_treatment_group(
        &self,
        session: &Session,
        id: TreatmentGroupId,
    ) -> Result<TreatmentGroup> {
        self.store.write(|tx| {
            let group = tx.get_treatment_group(id)?;
            let experiment = tx.get_experiment(group.experiment_id)?;
            authorize(tx, session, Permission::MutateSlides, &experiment)?;
            let deleted = tx.delete_treatment_group(id)?;
            audit_deleted(tx, session, EntityKind::TreatmentGroup, id, &deleted)?;
            Ok(deleted)
        })
    }

    pub fn list_treatment_groups(
        &self,
        session: &Session,
        experiment: ExperimentId,
    ) -> Result<Vec<TreatmentGroup>> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            Ok(tx.list_treatment_groups(experiment)?)
        })
    }

    pub fn set_protocol_defaults(
        &self,
        session: &Session,
        experiment: ExperimentId,
        settings: &ProtocolSettings,
    ) -> Result<ProtocolDefaults> {
        self.store.write(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::MutateSlides, &parent)?;
            let before = tx.get_protocol_defaults(experiment)?;
            let after = tx.upsert_protocol_defaults(experiment, settings)?;
            match before {
                Some(before) => audit_updated(
                    tx,
                    session,
                    EntityKind::ProtocolDefaults,
                    experiment,
                    &before,
                    &after,
                )?,
                None => {
                    audit_created(tx, session, EntityKind::ProtocolDefaults, experiment, &after)?
                }
            }
            Ok(after)
        })
    }

    pub fn protocol_defaults(
        &self,
        session: &Session,
        experiment: ExperimentId,
    ) -> Result<Option<ProtocolDefaults>> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            Ok(tx.get_protocol_defaults(experiment)?)
        })
    }
}

fn member_key(experiment: ExperimentId, user: UserId) -> String {
    format!("{experiment}/{user}")
}

#[cfg(test)]
mod tests {
    use core_types::{AuditAction, NewTreatmentGroup};

    use super::*;
    use crate::test_util::lab;

    #[test]
    fn creator_becomes_owner_member() {
        let lab = lab();
        let members = lab
            .notebook
            .list_members(&lab.owner, lab.experiment.id)
            .expect("members");
        let owner = members
            .iter()
            .find(|m| m.user_id == lab.owner.user_id)
            .expect("owner row");
        assert_eq!(owner.role, MemberRole::Owner);
        assert_eq!(members.len(), 3);
    }

    #[test]
    fn creation_writes_exactly_one_audit_entry() {
        let lab = lab();
        let key = lab.experiment.id.to_string();
        let trail = lab
            .notebook
            .store()
            .read(|tx| tx.list_audit_for_entity(EntityKind::Experiment, &key))
            .expect("audit");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Create);
        assert_eq!(trail[0].actor_user_id, lab.owner.user_id);
        assert!(trail[0].before.is_none());
        assert_eq!(
            trail[0].after.as_ref().and_then(|a| a.get("name")),
            Some(&serde_json::json!("Cortex IHC"))
        );
    }

    #[test]
    fn status_follows_transition_table() {
        let lab = lab();
        let active = lab
            .notebook
            .set_experiment_status(&lab.owner, lab.experiment.id, ExperimentStatus::Active)
            .expect("activate");
        assert_eq!(active.status, ExperimentStatus::Active);

        let err = lab
            .notebook
            .set_experiment_status(&lab.owner, lab.experiment.id, ExperimentStatus::Draft)
            .unwrap_err();
        assert!(matches!(err, NotebookError::InvalidStatusTransition { .. }));

        let mut renamed = active.clone();
        renamed.status = ExperimentStatus::Draft;
        assert!(lab.notebook.update_experiment(&lab.owner, &renamed).is_err());
    }

    #[test]
    fn creator_membership_survives_a_co_owner() {
        let lab = lab();
        let mut promoted = lab
            .notebook
            .list_members(&lab.owner, lab.experiment.id)
            .expect("members")
            .into_iter()
            .find(|m| m.user_id == lab.collaborator.user_id)
            .expect("collaborator row");
        promoted.role = MemberRole::Owner;
        lab.notebook
            .update_member(&lab.owner, &promoted)
            .expect("promote");

        let mut demoted = lab
            .notebook
            .list_members(&lab.collaborator, lab.experiment.id)
            .expect("members")
            .into_iter()
            .find(|m| m.user_id == lab.owner.user_id)
            .expect("creator row");
        demoted.role = MemberRole::Viewer;
        let err = lab
            .notebook
            .update_member(&lab.collaborator, &demoted)
            .unwrap_err();
        assert!(matches!(err, NotebookError::CreatorMembership { .. }));
        let err = lab
            .notebook
            .remove_member(&lab.collaborator, lab.experiment.id, lab.owner.user_id)
            .unwrap_err();
        assert!(matches!(err, NotebookError::CreatorMembership { .. }));

        let creator = lab
            .notebook
            .list_members(&lab.owner, lab.experiment.id)
            .expect("members")
            .into_iter()
            .find(|m| m.user_id == lab.owner.user_id)
            .expect("creator row");
        assert_eq!(creator.role, MemberRole::Owner);

        lab.notebook
            .remove_member(&lab.owner, lab.experiment.id, lab.collaborator.user_id)
            .expect("co-owners can still be removed");
    }

    #[test]
    fn collaborators_cannot_manage_experiment() {
        let lab = lab();
        let err = lab
            .notebook
            .set_experiment_status(&lab.collaborator, lab.experiment.id, ExperimentStatus::Active)
            .unwrap_err();
        assert!(err.is_forbidden());
        assert!(
            lab.notebook
                .delete_experiment(&lab.viewer, lab.experiment.id)
                .is_err_and(|err| err.is_forbidden())
        );
    }

    #[test]
    fn outsiders_see_nothing() {
        let lab = lab();
        assert!(
            lab.notebook
                .list_experiments(&lab.outsider)
                .expect("list")
                .is_empty()
        );
        assert!(
            lab.notebook
                .get_experiment(&lab.outsider, lab.experiment.id)
                .is_err_and(|err| err.is_forbidden())
        );
        assert_eq!(lab.notebook.list_experiments(&lab.admin).expect("list").len(), 1);
        assert_eq!(lab.notebook.list_experiments(&lab.viewer).expect("list").len(), 1);
    }

    #[test]
    fn collaborators_manage_groups_and_defaults() {
        let lab = lab();
        lab.notebook
            .create_treatment_group(
                &lab.collaborator,
                &NewTreatmentGroup {
                    experiment_id: lab.experiment.id,
                    name: "Treated".to_string(),
                    description: None,
                    sort_order: 1,
                },
            )
            .expect("collaborator adds group");

        let settings = ProtocolSettings {
            serum_type: Some("donkey".to_string()),
            ..ProtocolSettings::default()
        };
        lab.notebook
            .set_protocol_defaults(&lab.collaborator, lab.experiment.id, &settings)
            .expect("create defaults");
        lab.notebook
            .set_protocol_defaults(&lab.collaborator, lab.experiment.id, &settings)
            .expect("update defaults");
        let key = lab.experiment.id.to_string();
        let trail = lab
            .notebook
            .store()
            .read(|tx| tx.list_audit_for_entity(EntityKind::ProtocolDefaults, &key))
            .expect("audit");
        let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Create, AuditAction::Update]);

        assert!(
            lab.notebook
                .set_protocol_defaults(&lab.viewer, lab.experiment.id, &settings)
                .is_err_and(|err| err.is_forbidden())
        );
    }

    #[test]
    fn delete_cascades_through_notebook() {
        let lab = lab();
        let deleted = lab
            .notebook
            .delete_experiment(&lab.owner, lab.experiment.id)
            .expect("delete");
        assert_eq!(deleted.id, lab.experiment.id);
        let slides = lab
            .notebook
            .store()
            .read(|tx| tx.list_slides_by_experiment(lab.experiment.id))
            .expect("slides");
        assert!(slides.is_empty());
    }
}
