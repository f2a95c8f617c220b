use core_types::{
    AntibodyId, AntibodyRole, AntibodyUsage, AssetId, EduCondition, EduConditionId, ExperimentId,
    NewEduCondition, NewSlide, NewSlideAsset, Slide, SlideAntibody, SlideAsset, SlideId,
    SlideStatus, TreatmentGroupId, UserId,
};
use rusqlite::{Row, params};
use tracing::debug;
use uuid::Uuid;

use crate::StoreTx;
use crate::codec::{
    encode_metadata, format_date, get_date, get_enum, get_metadata, get_opt_date, get_uuid,
    query_all, query_optional,
};
use crate::error::{ConstraintRule, StoreError, StoreResult, classify};

const SLIDE_COLUMNS: &str = "id, experiment_id, treatment_group_id, owner_user_id, label, \
     specimen_origin_json, experiment_overrides_json, storage_location, imaged_at, \
     imaging_notes, status, created_at, updated_at";
const EDU_COLUMNS: &str =
    "id, slide_id, edu_concentration_um, incubation_hours, administration_route, notes, created_at";
const ASSET_COLUMNS: &str =
    "id, slide_id, asset_type, uri, content_hash, metadata_json, created_by_user_id, created_at";
const LINK_COLUMNS: &str =
    "slide_id, antibody_id, dilution, incubation_time, incubation_temperature, created_at";

fn slide_from_row(row: &Row<'_>) -> StoreResult<Slide> {
    Ok(Slide {
        id: get_uuid(row, "id")?,
        experiment_id: get_uuid(row, "experiment_id")?,
        treatment_group_id: get_uuid(row, "treatment_group_id")?,
        owner_user_id: get_uuid(row, "owner_user_id")?,
        label: row.get("label")?,
        specimen_origin: get_metadata(row, "specimen_origin_json")?,
        experiment_overrides: get_metadata(row, "experiment_overrides_json")?,
        storage_location: row.get("storage_location")?,
        imaged_at: get_opt_date(row, "imaged_at")?,
        imaging_notes: row.get("imaging_notes")?,
        status: get_enum(row, "status")?,
        created_at: get_date(row, "created_at")?,
        updated_at: get_date(row, "updated_at")?,
    })
}

fn link_from_row(role: AntibodyRole, row: &Row<'_>) -> StoreResult<SlideAntibody> {
    Ok(SlideAntibody {
        slide_id: get_uuid(row, "slide_id")?,
        antibody_id: get_uuid(row, "antibody_id")?,
        role,
        usage: AntibodyUsage {
            dilution: row.get("dilution")?,
            incubation_time: row.get("incubation_time")?,
            incubation_temperature: row.get("incubation_temperature")?,
        },
        created_at: get_date(row, "created_at")?,
    })
}

fn edu_from_row(row: &Row<'_>) -> StoreResult<EduCondition> {
    Ok(EduCondition {
        id: get_uuid(row, "id")?,
        slide_id: get_uuid(row, "slide_id")?,
        edu_concentration_um: row.get("edu_concentration_um")?,
        incubation_hours: row.get("incubation_hours")?,
        administration_route: row.get("administration_route")?,
        notes: row.get("notes")?,
        created_at: get_date(row, "created_at")?,
    })
}

fn asset_from_row(row: &Row<'_>) -> StoreResult<SlideAsset> {
    Ok(SlideAsset {
        id: get_uuid(row, "id")?,
        slide_id: get_uuid(row, "slide_id")?,
        asset_type: get_enum(row, "asset_type")?,
        uri: row.get("uri")?,
        content_hash: row.get("content_hash")?,
        metadata: get_metadata(row, "metadata_json")?,
        created_by_user_id: get_uuid(row, "created_by_user_id")?,
        created_at: get_date(row, "created_at")?,
    })
}

impl StoreTx<'_> {
    pub fn create_slide(&self, new: &NewSlide) -> StoreResult<Slide> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO slides
                    (id, experiment_id, treatment_group_id, owner_user_id, label,
                     specimen_origin_json, experiment_overrides_json, storage_location, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    id.to_string(),
                    new.experiment_id.to_string(),
                    new.treatment_group_id.to_string(),
                    new.owner_user_id.to_string(),
                    new.label,
                    encode_metadata(&new.specimen_origin)?,
                    encode_metadata(&new.experiment_overrides)?,
                    new.storage_location,
                    new.status.as_str(),
                ],
            )
            .map_err(|err| classify(err, Some("slides"), id))?;
        debug!(slide_id = %id, "created slide");
        self.get_slide(id)
    }

    pub fn get_slide(&self, id: SlideId) -> StoreResult<Slide> {
        query_optional(
            self.conn,
            &format!("SELECT {SLIDE_COLUMNS} FROM slides WHERE id = ?1"),
            [id.to_string()],
            slide_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("slide", id))
    }

    pub fn list_slides_by_experiment(&self, experiment: ExperimentId) -> StoreResult<Vec<Slide>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {SLIDE_COLUMNS} FROM slides WHERE experiment_id = ?1 ORDER BY label, created_at"
            ),
            [experiment.to_string()],
            slide_from_row,
        )
    }

    pub fn list_slides_by_group(&self, group: TreatmentGroupId) -> StoreResult<Vec<Slide>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {SLIDE_COLUMNS} FROM slides WHERE treatment_group_id = ?1 ORDER BY label, created_at"
            ),
            [group.to_string()],
            slide_from_row,
        )
    }

    pub fn list_slides_by_owner(&self, owner: UserId) -> StoreResult<Vec<Slide>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {SLIDE_COLUMNS} FROM slides WHERE owner_user_id = ?1 ORDER BY created_at, id"
            ),
            [owner.to_string()],
            slide_from_row,
        )
    }

    /// Rewrites the mutable fields. A slide may move to another group of the same
    /// experiment; experiment and owner are fixed.
    pub fn update_slide(&self, slide: &Slide) -> StoreResult<Slide> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE slides
                SET treatment_group_id = ?2, label = ?3, specimen_origin_json = ?4,
                    experiment_overrides_json = ?5, storage_location = ?6, imaged_at = ?7,
                    imaging_notes = ?8, status = ?9,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = ?1
                "#,
                params![
                    slide.id.to_string(),
                    slide.treatment_group_id.to_string(),
                    slide.label,
                    encode_metadata(&slide.specimen_origin)?,
                    encode_metadata(&slide.experiment_overrides)?,
                    slide.storage_location,
                    slide.imaged_at.as_ref().map(format_date),
                    slide.imaging_notes,
                    slide.status.as_str(),
                ],
            )
            .map_err(|err| classify(err, Some("slides"), slide.id))?;
        if changed == 0 {
            return Err(StoreError::not_found("slide", slide.id));
        }
        self.get_slide(slide.id)
    }

    pub fn set_slide_status(&self, id: SlideId, status: SlideStatus) -> StoreResult<Slide> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE slides
                SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = ?1
                "#,
                params![id.to_string(), status.as_str()],
            )
            .map_err(|err| classify(err, Some("slides"), id))?;
        if changed == 0 {
            return Err(StoreError::not_found("slide", id));
        }
        self.get_slide(id)
    }

    /// Removes the slide with its antibody links, EdU conditions, assets, notes and
    /// usage events.
    pub fn delete_slide(&self, id: SlideId) -> StoreResult<Slide> {
        let slide = self.get_slide(id)?;
        self.conn
            .execute("DELETE FROM slides WHERE id = ?1", [id.to_string()])
            .map_err(|err| classify(err, Some("slides"), id))?;
        debug!(slide_id = %id, "deleted slide");
        Ok(slide)
    }

    /// Links a catalog antibody to a slide. The antibody's `is_secondary` flag must
    /// agree with `role`.
    pub fn attach_antibody(
        &self,
        role: AntibodyRole,
        slide: SlideId,
        antibody: AntibodyId,
        usage: &AntibodyUsage,
    ) -> StoreResult<SlideAntibody> {
        let key = format!("{slide}/{antibody}");
        let catalog = match self.get_antibody(antibody) {
            Err(StoreError::NotFound { .. }) => {
                return Err(StoreError::ReferentialIntegrity {
                    table: role.table().to_string(),
                    row: key,
                    blockers: Vec::new(),
                    detail: format!("antibody {antibody} does not exist"),
                });
            }
            other => other?,
        };
        if catalog.role() != role {
            return Err(StoreError::ConstraintViolation {
                rule: ConstraintRule::Check,
                table: role.table().to_string(),
                row: key,
                detail: format!(
                    "antibody `{}` is a {} antibody and cannot be attached as {}",
                    catalog.name,
                    catalog.role(),
                    role
                ),
            });
        }
        self.conn
            .execute(
                &format!(
                    r#"
                    INSERT INTO {}
                        (slide_id, antibody_id, dilution, incubation_time, incubation_temperature)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    role.table()
                ),
                params![
                    slide.to_string(),
                    antibody.to_string(),
                    usage.dilution,
                    usage.incubation_time,
                    usage.incubation_temperature,
                ],
            )
            .map_err(|err| classify(err, Some(role.table()), &key))?;
        self.find_slide_antibody(role, slide, antibody)?
            .ok_or_else(|| StoreError::not_found(role.table(), key))
    }

    pub fn find_slide_antibody(
        &self,
        role: AntibodyRole,
        slide: SlideId,
        antibody: AntibodyId,
    ) -> StoreResult<Option<SlideAntibody>> {
        query_optional(
            self.conn,
            &format!(
                "SELECT {LINK_COLUMNS} FROM {} WHERE slide_id = ?1 AND antibody_id = ?2",
                role.table()
            ),
            [slide.to_string(), antibody.to_string()],
            |row| link_from_row(role, row),
        )
    }

    pub fn list_slide_antibodies(
        &self,
        role: AntibodyRole,
        slide: SlideId,
    ) -> StoreResult<Vec<SlideAntibody>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {LINK_COLUMNS} FROM {} WHERE slide_id = ?1 ORDER BY created_at, rowid",
                role.table()
            ),
            [slide.to_string()],
            |row| link_from_row(role, row),
        )
    }

    pub fn update_slide_antibody(&self, link: &SlideAntibody) -> StoreResult<SlideAntibody> {
        let table = link.role.table();
        let key = format!("{}/{}", link.slide_id, link.antibody_id);
        let changed = self
            .conn
            .execute(
                &format!(
                    r#"
                    UPDATE {table}
                    SET dilution = ?3, incubation_time = ?4, incubation_temperature = ?5
                    WHERE slide_id = ?1 AND antibody_id = ?2
                    "#
                ),
                params![
                    link.slide_id.to_string(),
                    link.antibody_id.to_string(),
                    link.usage.dilution,
                    link.usage.incubation_time,
                    link.usage.incubation_temperature,
                ],
            )
            .map_err(|err| classify(err, Some(table), &key))?;
        if changed == 0 {
            return Err(StoreError::not_found(table, key));
        }
        self.find_slide_antibody(link.role, link.slide_id, link.antibody_id)?
            .ok_or_else(|| StoreError::not_found(table, key))
    }

    pub fn detach_antibody(
        &self,
        role: AntibodyRole,
        slide: SlideId,
        antibody: AntibodyId,
    ) -> StoreResult<SlideAntibody> {
        let key = format!("{slide}/{antibody}");
        let link = self
            .find_slide_antibody(role, slide, antibody)?
            .ok_or_else(|| StoreError::not_found(role.table(), &key))?;
        self.conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE slide_id = ?1 AND antibody_id = ?2",
                    role.table()
                ),
                [slide.to_string(), antibody.to_string()],
            )
            .map_err(|err| classify(err, Some(role.table()), &key))?;
        Ok(link)
    }

    pub fn add_edu_condition(&self, new: &NewEduCondition) -> StoreResult<EduCondition> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO slide_edu_conditions
                    (id, slide_id, edu_concentration_um, incubation_hours, administration_route, notes)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    id.to_string(),
                    new.slide_id.to_string(),
                    new.edu_concentration_um,
                    new.incubation_hours,
                    new.administration_route,
                    new.notes,
                ],
            )
            .map_err(|err| classify(err, Some("slide_edu_conditions"), id))?;
        self.get_edu_condition(id)
    }

    pub fn get_edu_condition(&self, id: EduConditionId) -> StoreResult<EduCondition> {
        query_optional(
            self.conn,
            &format!("SELECT {EDU_COLUMNS} FROM slide_edu_conditions WHERE id = ?1"),
            [id.to_string()],
            edu_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("slide_edu_condition", id))
    }

    pub fn list_edu_conditions(&self, slide: SlideId) -> StoreResult<Vec<EduCondition>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {EDU_COLUMNS} FROM slide_edu_conditions WHERE slide_id = ?1 ORDER BY created_at, rowid"
            ),
            [slide.to_string()],
            edu_from_row,
        )
    }

    pub fn remove_edu_condition(&self, id: EduConditionId) -> StoreResult<EduCondition> {
        let condition = self.get_edu_condition(id)?;
        self.conn
            .execute("DELETE FROM slide_edu_conditions WHERE id = ?1", [id.to_string()])
            .map_err(|err| classify(err, Some("slide_edu_conditions"), id))?;
        Ok(condition)
    }

    pub fn add_asset(&self, new: &NewSlideAsset) -> StoreResult<SlideAsset> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO slide_assets
                    (id, slide_id, asset_type, uri, content_hash, metadata_json, created_by_user_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    id.to_string(),
                    new.slide_id.to_string(),
                    new.asset_type.as_str(),
                    new.uri,
                    new.content_hash,
                    encode_metadata(&new.metadata)?,
                    new.created_by_user_id.to_string(),
                ],
            )
            .map_err(|err| classify(err, Some("slide_assets"), id))?;
        self.get_asset(id)
    }

    pub fn get_asset(&self, id: AssetId) -> StoreResult<SlideAsset> {
        query_optional(
            self.conn,
            &format!("SELECT {ASSET_COLUMNS} FROM slide_assets WHERE id = ?1"),
            [id.to_string()],
            asset_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("slide_asset", id))
    }

    pub fn list_assets(&self, slide: SlideId) -> StoreResult<Vec<SlideAsset>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {ASSET_COLUMNS} FROM slide_assets WHERE slide_id = ?1 ORDER BY created_at, rowid"
            ),
            [slide.to_string()],
            asset_from_row,
        )
    }

    pub fn remove_asset(&self, id: AssetId) -> StoreResult<SlideAsset> {
        let asset = self.get_asset(id)?;
        self.conn
            .execute("DELETE FROM slide_assets WHERE id = ?1", [id.to_string()])
            .map_err(|err| classify(err, Some("slide_assets"), id))?;
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use core_types::{AssetType, NewAntibody, NewSlideNote, NewTreatmentGroup, NewUsageEvent, UsageType};

    use crate::error::ConstraintRule;
    use crate::test_util::store_with_fixture;
    use crate::StoreResult;

    use super::*;

    fn usage(dilution: &str) -> AntibodyUsage {
        AntibodyUsage {
            dilution: Some(dilution.to_string()),
            incubation_time: Some("overnight".to_string()),
            incubation_temperature: Some("4C".to_string()),
        }
    }

    #[test]
    fn duplicate_primary_pair_is_unique_violation() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| -> StoreResult<()> {
                let gfap = tx.create_antibody(&NewAntibody::primary("anti-GFAP", "rabbit"))?;
                tx.attach_antibody(AntibodyRole::Primary, fixture.slide.id, gfap.id, &usage("1/500"))?;
                tx.attach_antibody(AntibodyRole::Primary, fixture.slide.id, gfap.id, &usage("1/1000"))?;
                Ok(())
            })
            .unwrap_err();
        match err {
            StoreError::ConstraintViolation { rule, table, .. } => {
                assert_eq!(rule, ConstraintRule::Unique);
                assert_eq!(table, "slide_primary_antibodies");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn role_must_match_catalog_flag() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| -> StoreResult<()> {
                let secondary = tx.create_antibody(&NewAntibody::secondary(
                    "Donkey anti-Rabbit 488",
                    "donkey",
                    "rabbit",
                    "A488",
                ))?;
                tx.attach_antibody(
                    AntibodyRole::Primary,
                    fixture.slide.id,
                    secondary.id,
                    &AntibodyUsage::default(),
                )?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.constraint_rule(), Some(ConstraintRule::Check));
    }

    #[test]
    fn missing_parent_is_referential() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| {
                tx.attach_antibody(
                    AntibodyRole::Primary,
                    fixture.slide.id,
                    Uuid::new_v4(),
                    &AntibodyUsage::default(),
                )
            })
            .unwrap_err();
        assert!(err.is_referential(), "{err}");

        let err = store
            .write(|tx| -> StoreResult<SlideAntibody> {
                let gfap = tx.create_antibody(&NewAntibody::primary("anti-GFAP", "rabbit"))?;
                tx.attach_antibody(
                    AntibodyRole::Primary,
                    Uuid::new_v4(),
                    gfap.id,
                    &AntibodyUsage::default(),
                )
            })
            .unwrap_err();
        assert!(err.is_referential(), "{err}");
    }

    #[test]
    fn link_usage_can_be_updated_and_detached() {
        let (store, fixture) = store_with_fixture();
        let updated = store
            .write(|tx| -> StoreResult<SlideAntibody> {
                let gfap = tx.create_antibody(&NewAntibody::primary("anti-GFAP", "rabbit"))?;
                let mut link = tx.attach_antibody(
                    AntibodyRole::Primary,
                    fixture.slide.id,
                    gfap.id,
                    &usage("1/500"),
                )?;
                link.usage.dilution = Some("1/250".to_string());
                tx.update_slide_antibody(&link)
            })
            .expect("update");
        assert_eq!(updated.usage.dilution.as_deref(), Some("1/250"));

        store
            .write(|tx| tx.detach_antibody(AntibodyRole::Primary, fixture.slide.id, updated.antibody_id))
            .expect("detach");
        let links = store
            .read(|tx| tx.list_slide_antibodies(AntibodyRole::Primary, fixture.slide.id))
            .expect("list");
        assert!(links.is_empty());
    }

    #[test]
    fn slide_delete_cascades_to_children() {
        let (store, fixture) = store_with_fixture();
        let antibody = store
            .write(|tx| -> StoreResult<_> {
                let gfap = tx.create_antibody(&NewAntibody::primary("anti-GFAP", "rabbit"))?;
                tx.attach_antibody(AntibodyRole::Primary, fixture.slide.id, gfap.id, &usage("1/500"))?;
                tx.add_edu_condition(&NewEduCondition {
                    slide_id: fixture.slide.id,
                    edu_concentration_um: 10.0,
                    incubation_hours: 2.0,
                    administration_route: None,
                    notes: None,
                })?;
                tx.add_asset(&NewSlideAsset {
                    slide_id: fixture.slide.id,
                    asset_type: AssetType::Image,
                    uri: "file:///tmp/s1.tif".to_string(),
                    content_hash: None,
                    metadata: Default::default(),
                    created_by_user_id: fixture.owner.id,
                })?;
                tx.append_note(&NewSlideNote {
                    slide_id: fixture.slide.id,
                    author_user_id: fixture.owner.id,
                    note_type: Default::default(),
                    body: "stained".to_string(),
                })?;
                tx.append_usage_event(&NewUsageEvent {
                    slide_id: fixture.slide.id,
                    used_by_user_id: fixture.owner.id,
                    usage_type: UsageType::Presentation,
                    context: None,
                    metadata: Default::default(),
                })?;
                Ok(gfap)
            })
            .expect("populate");

        store
            .write(|tx| tx.delete_slide(fixture.slide.id))
            .expect("delete slide");

        store
            .read(|tx| -> StoreResult<()> {
                assert!(tx.list_slide_antibodies(AntibodyRole::Primary, fixture.slide.id)?.is_empty());
                assert!(tx.list_edu_conditions(fixture.slide.id)?.is_empty());
                assert!(tx.list_assets(fixture.slide.id)?.is_empty());
                assert!(tx.list_notes(fixture.slide.id)?.is_empty());
                assert!(tx.list_usage_events(fixture.slide.id)?.is_empty());
                assert!(tx.get_antibody(antibody.id).is_ok());
                Ok(())
            })
            .expect("verify");
    }

    #[test]
    fn slide_may_move_within_its_experiment() {
        let (store, fixture) = store_with_fixture();
        let moved = store
            .write(|tx| -> StoreResult<Slide> {
                let treated = tx.create_treatment_group(&NewTreatmentGroup {
                    experiment_id: fixture.experiment.id,
                    name: "Treated".to_string(),
                    description: None,
                    sort_order: 1,
                })?;
                let mut slide = fixture.slide.clone();
                slide.treatment_group_id = treated.id;
                slide.imaging_notes = Some("bright".to_string());
                tx.update_slide(&slide)
            })
            .expect("move");
        assert_ne!(moved.treatment_group_id, fixture.group.id);
        assert_eq!(moved.created_at, fixture.slide.created_at);
        assert!(moved.updated_at >= fixture.slide.updated_at);
    }

    #[test]
    fn status_accepts_any_enumerated_value() {
        let (store, fixture) = store_with_fixture();
        let destroyed = store
            .write(|tx| tx.set_slide_status(fixture.slide.id, SlideStatus::Destroyed))
            .expect("status");
        assert_eq!(destroyed.status, SlideStatus::Destroyed);
        let back = store
            .write(|tx| tx.set_slide_status(fixture.slide.id, SlideStatus::InStorage))
            .expect("status");
        assert_eq!(back.status, SlideStatus::InStorage);
    }
}
