use core_types::{
    ExperimentExport, ExperimentId, ExportId, NewExperimentExport, StorageLocation, UserId,
};
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::StoreTx;
use crate::codec::{get_date, get_uuid, query_all, query_optional};
use crate::error::{StoreError, StoreResult, classify};

const EXPORT_COLUMNS: &str =
    "id, experiment_id, exported_by_user_id, file_path, payload_json, created_at";

fn location_from_row(row: &Row<'_>) -> StoreResult<StorageLocation> {
    Ok(StorageLocation {
        user_id: get_uuid(row, "user_id")?,
        location: row.get("location")?,
        last_used_at: get_date(row, "last_used_at")?,
    })
}

fn export_from_row(row: &Row<'_>) -> StoreResult<ExperimentExport> {
    let payload: String = row.get("payload_json")?;
    Ok(ExperimentExport {
        id: get_uuid(row, "id")?,
        experiment_id: get_uuid(row, "experiment_id")?,
        exported_by_user_id: get_uuid(row, "exported_by_user_id")?,
        file_path: row.get("file_path")?,
        payload: serde_json::from_str(&payload).map_err(|err| StoreError::Corrupt {
            column: "experiment_exports.payload_json",
            detail: err.to_string(),
        })?,
        created_at: get_date(row, "created_at")?,
    })
}

impl StoreTx<'_> {
    /// Records `location` as the user's most recently used storage location. Replacing
    /// the row moves it to the end of the rowid order, which breaks timestamp ties.
    pub fn remember_storage_location(
        &self,
        user: UserId,
        location: &str,
    ) -> StoreResult<StorageLocation> {
        let location = location.trim();
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO user_storage_locations (user_id, location)
                VALUES (?1, ?2)
                "#,
                params![user.to_string(), location],
            )
            .map_err(|err| classify(err, Some("user_storage_locations"), user))?;
        query_optional(
            self.conn,
            "SELECT user_id, location, last_used_at FROM user_storage_locations WHERE user_id = ?1 AND location = ?2",
            params![user.to_string(), location],
            location_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("user_storage_location", location))
    }

    /// Most recent first.
    pub fn list_storage_locations(
        &self,
        user: UserId,
        limit: usize,
    ) -> StoreResult<Vec<StorageLocation>> {
        query_all(
            self.conn,
            r#"
            SELECT user_id, location, last_used_at FROM user_storage_locations
            WHERE user_id = ?1
            ORDER BY last_used_at DESC, rowid DESC
            LIMIT ?2
            "#,
            params![user.to_string(), limit as i64],
            location_from_row,
        )
    }

    pub fn record_export(&self, new: &NewExperimentExport) -> StoreResult<ExperimentExport> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO experiment_exports
                    (id, experiment_id, exported_by_user_id, file_path, payload_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    id.to_string(),
                    new.experiment_id.to_string(),
                    new.exported_by_user_id.to_string(),
                    new.file_path,
                    serde_json::to_string(&new.payload)?,
                ],
            )
            .map_err(|err| classify(err, Some("experiment_exports"), id))?;
        self.get_export(id)
    }

    pub fn get_export(&self, id: ExportId) -> StoreResult<ExperimentExport> {
        query_optional(
            self.conn,
            &format!("SELECT {EXPORT_COLUMNS} FROM experiment_exports WHERE id = ?1"),
            [id.to_string()],
            export_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("experiment_export", id))
    }

    pub fn list_exports(&self, experiment: ExperimentId) -> StoreResult<Vec<ExperimentExport>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {EXPORT_COLUMNS} FROM experiment_exports WHERE experiment_id = ?1 ORDER BY created_at, rowid"
            ),
            [experiment.to_string()],
            export_from_row,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::error::ConstraintRule;
    use crate::test_util::store_with_fixture;
    use crate::StoreResult;

    use super::*;

    #[test]
    fn storage_locations_are_deduplicated_per_user() {
        let (store, fixture) = store_with_fixture();
        store
            .write(|tx| -> StoreResult<()> {
                tx.remember_storage_location(fixture.owner.id, "/data/a")?;
                tx.remember_storage_location(fixture.owner.id, "/data/b")?;
                tx.remember_storage_location(fixture.owner.id, " /data/a ")?;
                Ok(())
            })
            .expect("remember");
        let recent = store
            .read(|tx| tx.list_storage_locations(fixture.owner.id, 10))
            .expect("list");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].location, "/data/a");
    }

    #[test]
    fn blank_storage_location_is_rejected() {
        let (store, fixture) = store_with_fixture();
        let err = store
            .write(|tx| tx.remember_storage_location(fixture.owner.id, "  "))
            .unwrap_err();
        assert_eq!(err.constraint_rule(), Some(ConstraintRule::Check));
    }

    #[test]
    fn exports_cascade_with_experiment() {
        let (store, fixture) = store_with_fixture();
        let export = store
            .write(|tx| {
                tx.record_export(&NewExperimentExport {
                    experiment_id: fixture.experiment.id,
                    exported_by_user_id: fixture.owner.id,
                    file_path: "/tmp/export.json".to_string(),
                    payload: json!({ "slides": [] }),
                })
            })
            .expect("record");
        assert_eq!(export.payload, json!({ "slides": [] }));

        store
            .write(|tx| tx.delete_experiment(fixture.experiment.id))
            .expect("delete");
        assert!(store.read(|tx| tx.get_export(export.id)).unwrap_err().is_not_found());
    }
}
