use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use core_types::{
    AntibodyId, AntibodyRole, AntibodyUsage, AssetId, EduCondition, EduConditionId, EntityKind,
    ExperimentId, NewEduCondition, NewSlide, NewSlideAsset, Session, Slide, SlideAntibody,
    SlideAsset, SlideId, SlideStatus,
};
use sha2::{Digest, Sha256};
use storage_sqlite::{StoreError, StoreTx};
use tracing::{info, warn};

use crate::policy::authorize;
use crate::{
    Notebook, NotebookError, Permission, Result, audit_created, audit_deleted, audit_updated,
};

/// Loads a slide after checking `permission` on its experiment.
pub(crate) fn load_slide(
    tx: &StoreTx<'_>,
    session: &Session,
    permission: Permission,
    id: SlideId,
) -> Result<Slide> {
    let slide = tx.get_slide(id)?;
    let experiment = tx.get_experiment(slide.experiment_id)?;
    authorize(tx, session, permission, &experiment)?;
    Ok(slide)
}

fn check_transition(slide: &Slide, next: SlideStatus) -> Result<()> {
    if slide.status.can_transition_to(next) {
        return Ok(());
    }
    Err(NotebookError::InvalidStatusTransition {
        entity: "slide",
        id: slide.id.to_string(),
        from: slide.status.to_string(),
        to: next.to_string(),
    })
}

fn remember_location(tx: &StoreTx<'_>, session: &Session, location: Option<&str>) -> Result<()> {
    if let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) {
        tx.remember_storage_location(session.user_id, location)?;
    }
    Ok(())
}

fn link_key(slide: SlideId, antibody: AntibodyId) -> String {
    format!("{slide}/{antibody}")
}

/// Lower-case hex SHA-256 of the file at `path`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|err| NotebookError::io(path, err))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|err| NotebookError::io(path, err))?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

fn local_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

impl Notebook {
    /// The session user becomes the slide's owner.
    pub fn create_slide(&self, session: &Session, new: &NewSlide) -> Result<Slide> {
        let new = NewSlide {
            owner_user_id: session.user_id,
            ..new.clone()
        };
        self.store.write(|tx| {
            let experiment = tx.get_experiment(new.experiment_id)?;
            authorize(tx, session, Permission::MutateSlides, &experiment)?;
            let slide = tx.create_slide(&new)?;
            remember_location(tx, session, slide.storage_location.as_deref())?;
            audit_created(tx, session, EntityKind::Slide, slide.id, &slide)?;
            info!(slide_id = %slide.id, label = %slide.label, "created slide");
            Ok(slide)
        })
    }

    pub fn get_slide(&self, session: &Session, id: SlideId) -> Result<Slide> {
        self.store
            .read(|tx| load_slide(tx, session, Permission::Read, id))
    }

    pub fn list_slides(&self, session: &Session, experiment: ExperimentId) -> Result<Vec<Slide>> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            Ok(tx.list_slides_by_experiment(experiment)?)
        })
    }

    pub fn update_slide(&self, session: &Session, slide: &Slide) -> Result<Slide> {
        self.store.write(|tx| {
            let before = load_slide(tx, session, Permission::MutateSlides, slide.id)?;
            check_transition(&before, slide.status)?;
            let after = tx.update_slide(slide)?;
            if after.storage_location != before.storage_location {
                remember_location(tx, session, after.storage_location.as_deref())?;
            }
            audit_updated(tx, session, EntityKind::Slide, after.id, &before, &after)?;
            Ok(after)
        })
    }

    pub fn set_slide_status(
        &self,
        session: &Session,
        id: SlideId,
        status: SlideStatus,
    ) -> Result<Slide> {
        self.store.write(|tx| {
            let before = load_slide(tx, session, Permission::MutateSlides, id)?;
            check_transition(&before, status)?;
            let after = tx.set_slide_status(id, status)?;
            audit_updated(tx, session, EntityKind::Slide, id, &before, &after)?;
            info!(slide_id = %id, from = %before.status, to = %status, "slide status changed");
            Ok(after)
        })
    }

    pub fn delete_slide(&self, session: &Session, id: SlideId) -> Result<Slide> {
        self.store.write(|tx| {
            load_slide(tx, session, Permission::MutateSlides, id)?;
            let deleted = tx.delete_slide(id)?;
            audit_deleted(tx, session, EntityKind::Slide, id, &deleted)?;
            Ok(deleted)
        })
    }

    pub fn attach_antibody(
        &self,
        session: &Session,
        role: AntibodyRole,
        slide: SlideId,
        antibody: AntibodyId,
        usage: &AntibodyUsage,
    ) -> Result<SlideAntibody> {
        self.store.write(|tx| {
            load_slide(tx, session, Permission::MutateSlides, slide)?;
            let link = tx.attach_antibody(role, slide, antibody, usage)?;
            audit_created(tx, session, role.entity_kind(), link_key(slide, antibody), &link)?;
            Ok(link)
        })
    }

    pub fn update_slide_antibody(
        &self,
        session: &Session,
        link: &SlideAntibody,
    ) -> Result<SlideAntibody> {
        self.store.write(|tx| {
            load_slide(tx, session, Permission::MutateSlides, link.slide_id)?;
            let key = link_key(link.slide_id, link.antibody_id);
            let before = tx
                .find_slide_antibody(link.role, link.slide_id, link.antibody_id)?
                .ok_or_else(|| StoreError::not_found(link.role.table(), &key))?;
            let after = tx.update_slide_antibody(link)?;
            audit_updated(tx, session, link.role.entity_kind(), key, &before, &after)?;
            Ok(after)
        })
    }

    pub fn detach_antibody(
        &self,
        session: &Session,
        role: AntibodyRole,
        slide: SlideId,
        antibody: AntibodyId,
    ) -> Result<SlideAntibody> {
        self.store.write(|tx| {
            load_slide(tx, session, Permission::MutateSlides, slide)?;
            let removed = tx.detach_antibody(role, slide, antibody)?;
            audit_deleted(tx, session, role.entity_kind(), link_key(slide, antibody), &removed)?;
            Ok(removed)
        })
    }

    pub fn list_slide_antibodies(
        &self,
        session: &Session,
        role: AntibodyRole,
        slide: SlideId,
    ) -> Result<Vec<SlideAntibody>> {
        self.store.read(|tx| {
            load_slide(tx, session, Permission::Read, slide)?;
            Ok(tx.list_slide_antibodies(role, slide)?)
        })
    }

    pub fn add_edu_condition(
        &self,
        session: &Session,
        new: &NewEduCondition,
    ) -> Result<EduCondition> {
        self.store.write(|tx| {
            load_slide(tx, session, Permission::MutateSlides, new.slide_id)?;
            let condition = tx.add_edu_condition(new)?;
            audit_created(tx, session, EntityKind::EduCondition, condition.id, &condition)?;
            Ok(condition)
        })
    }

    pub fn remove_edu_condition(
        &self,
        session: &Session,
        id: EduConditionId,
    ) -> Result<EduCondition> {
        self.store.write(|tx| {
            let condition = tx.get_edu_condition(id)?;
            load_slide(tx, session, Permission::MutateSlides, condition.slide_id)?;
            let removed = tx.remove_edu_condition(id)?;
            audit_deleted(tx, session, EntityKind::EduCondition, id, &removed)?;
            Ok(removed)
        })
    }

    pub fn list_edu_conditions(
        &self,
        session: &Session,
        slide: SlideId,
    ) -> Result<Vec<EduCondition>> {
        self.store.read(|tx| {
            load_slide(tx, session, Permission::Read, slide)?;
            Ok(tx.list_edu_conditions(slide)?)
        })
    }

    /// The session user is recorded as the asset's creator.
    pub fn add_asset(&self, session: &Session, new: &NewSlideAsset) -> Result<SlideAsset> {
        let new = NewSlideAsset {
            created_by_user_id: session.user_id,
            content_hash: new.content_hash.as_deref().map(str::to_ascii_lowercase),
            ..new.clone()
        };
        self.store.write(|tx| {
            load_slide(tx, session, Permission::MutateSlides, new.slide_id)?;
            let asset = tx.add_asset(&new)?;
            audit_created(tx, session, EntityKind::SlideAsset, asset.id, &asset)?;
            Ok(asset)
        })
    }

    pub fn remove_asset(&self, session: &Session, id: AssetId) -> Result<SlideAsset> {
        self.store.write(|tx| {
            let asset = tx.get_asset(id)?;
            load_slide(tx, session, Permission::MutateSlides, asset.slide_id)?;
            let removed = tx.remove_asset(id)?;
            audit_deleted(tx, session, EntityKind::SlideAsset, id, &removed)?;
            Ok(removed)
        })
    }

    pub fn list_assets(&self, session: &Session, slide: SlideId) -> Result<Vec<SlideAsset>> {
        self.store.read(|tx| {
            load_slide(tx, session, Permission::Read, slide)?;
            Ok(tx.list_assets(slide)?)
        })
    }

    /// Hashes `path` (or the asset's own `file://` uri) and compares it with the recorded
    /// content hash. Returns the computed digest; an asset without a recorded hash
    /// always passes.
    pub fn verify_asset(
        &self,
        session: &Session,
        id: AssetId,
        path: Option<&Path>,
    ) -> Result<String> {
        let asset = self.store.read(|tx| {
            let asset = tx.get_asset(id)?;
            load_slide(tx, session, Permission::Read, asset.slide_id)?;
            Ok::<_, NotebookError>(asset)
        })?;
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| local_path(&asset.uri));
        let actual = hash_file(&path)?;
        match asset.content_hash {
            Some(expected) if !expected.eq_ignore_ascii_case(&actual) => {
                warn!(asset_id = %id, path = %path.display(), "asset content hash mismatch");
                Err(NotebookError::AssetHashMismatch {
                    asset: id,
                    expected,
                    actual,
                })
            }
            _ => Ok(actual),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use core_types::{AssetType, Metadata, NewAntibody};

    use super::*;
    use crate::test_util::lab;

    #[test]
    fn collaborator_creates_slide_and_becomes_owner() {
        let lab = lab();
        let mut new = NewSlide::new(lab.experiment.id, lab.group.id, lab.owner.user_id, "S-002");
        new.storage_location = Some(" box 4 ".to_string());
        let slide = lab
            .notebook
            .create_slide(&lab.collaborator, &new)
            .expect("collaborator slide");
        assert_eq!(slide.owner_user_id, lab.collaborator.user_id);

        let recent = lab
            .notebook
            .recent_storage_locations(&lab.collaborator)
            .expect("recent");
        assert_eq!(recent[0].location, "box 4");

        assert!(
            lab.notebook
                .create_slide(&lab.viewer, &new)
                .is_err_and(|err| err.is_forbidden())
        );
    }

    #[test]
    fn destroyed_slide_cannot_return() {
        let lab = lab();
        lab.notebook
            .set_slide_status(&lab.owner, lab.slide.id, SlideStatus::Destroyed)
            .expect("destroy");
        let err = lab
            .notebook
            .set_slide_status(&lab.owner, lab.slide.id, SlideStatus::InStorage)
            .unwrap_err();
        assert!(matches!(
            err,
            NotebookError::InvalidStatusTransition { entity: "slide", .. }
        ));
    }

    #[test]
    fn antibody_links_are_audited() {
        let lab = lab();
        let antibody = lab
            .notebook
            .create_antibody(&lab.owner, &NewAntibody::primary("anti-GFAP", "rabbit"))
            .expect("antibody");
        let link = lab
            .notebook
            .attach_antibody(
                &lab.collaborator,
                AntibodyRole::Primary,
                lab.slide.id,
                antibody.id,
                &AntibodyUsage {
                    dilution: Some("1/500".to_string()),
                    ..AntibodyUsage::default()
                },
            )
            .expect("attach");

        let mut changed = link.clone();
        changed.usage.dilution = Some("1/1000".to_string());
        lab.notebook
            .update_slide_antibody(&lab.collaborator, &changed)
            .expect("update");
        lab.notebook
            .detach_antibody(&lab.owner, AntibodyRole::Primary, lab.slide.id, antibody.id)
            .expect("detach");

        let trail = lab
            .notebook
            .store()
            .read(|tx| {
                tx.list_audit_for_entity(
                    EntityKind::SlidePrimaryAntibody,
                    &link_key(lab.slide.id, antibody.id),
                )
            })
            .expect("audit");
        assert_eq!(trail.len(), 3);
    }

    #[test]
    fn asset_hash_is_verified() {
        let lab = lab();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counts.csv");
        let mut file = File::create(&path).expect("create");
        file.write_all(b"cell,count\nneuron,42\n").expect("write");
        drop(file);

        let digest = hash_file(&path).expect("hash");
        assert_eq!(digest.len(), 64);

        let asset = lab
            .notebook
            .add_asset(
                &lab.owner,
                &NewSlideAsset {
                    slide_id: lab.slide.id,
                    asset_type: AssetType::CellCountExport,
                    uri: format!("file://{}", path.display()),
                    content_hash: Some(digest.to_uppercase()),
                    metadata: Metadata::new(),
                    created_by_user_id: lab.viewer.user_id,
                },
            )
            .expect("asset");
        assert_eq!(asset.created_by_user_id, lab.owner.user_id);
        assert_eq!(
            lab.notebook
                .verify_asset(&lab.viewer, asset.id, None)
                .expect("verify"),
            digest
        );

        std::fs::write(&path, b"tampered").expect("rewrite");
        assert!(matches!(
            lab.notebook.verify_asset(&lab.viewer, asset.id, None),
            Err(NotebookError::AssetHashMismatch { .. })
        ));
    }

    #[test]
    fn edu_conditions_follow_slide_permissions() {
        let lab = lab();
        let new = NewEduCondition {
            slide_id: lab.slide.id,
            edu_concentration_um: 10.0,
            incubation_hours: 2.0,
            administration_route: Some("ip".to_string()),
            notes: None,
        };
        assert!(
            lab.notebook
                .add_edu_condition(&lab.viewer, &new)
                .is_err_and(|err| err.is_forbidden())
        );
        let condition = lab
            .notebook
            .add_edu_condition(&lab.collaborator, &new)
            .expect("edu");
        assert_eq!(
            lab.notebook
                .list_edu_conditions(&lab.viewer, lab.slide.id)
                .expect("list")
                .len(),
            1
        );
        lab.notebook
            .remove_edu_condition(&lab.owner, condition.id)
            .expect("remove");
    }
}
