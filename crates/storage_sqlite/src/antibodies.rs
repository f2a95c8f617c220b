use core_types::{Antibody, AntibodyId, AntibodyRole, NewAntibody};
use rusqlite::{Row, params};
use tracing::debug;
use uuid::Uuid;

use crate::StoreTx;
use crate::codec::{count, get_date, get_uuid, query_all, query_optional};
use crate::error::{ConstraintRule, Dependent, StoreError, StoreResult, classify};

const ANTIBODY_COLUMNS: &str = "id, name, target, host_species, vendor, catalog_number, \
     lot_number, igg_subtype, fluorophore, anti_species, stock_concentration, is_secondary, \
     created_at, updated_at";

fn antibody_from_row(row: &Row<'_>) -> StoreResult<Antibody> {
    Ok(Antibody {
        id: get_uuid(row, "id")?,
        name: row.get("name")?,
        target: row.get("target")?,
        host_species: row.get("host_species")?,
        vendor: row.get("vendor")?,
        catalog_number: row.get("catalog_number")?,
        lot_number: row.get("lot_number")?,
        igg_subtype: row.get("igg_subtype")?,
        fluorophore: row.get("fluorophore")?,
        anti_species: row.get("anti_species")?,
        stock_concentration: row.get("stock_concentration")?,
        is_secondary: row.get("is_secondary")?,
        created_at: get_date(row, "created_at")?,
        updated_at: get_date(row, "updated_at")?,
    })
}

impl StoreTx<'_> {
    pub fn create_antibody(&self, new: &NewAntibody) -> StoreResult<Antibody> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO antibodies
                    (id, name, target, host_species, vendor, catalog_number, lot_number,
                     igg_subtype, fluorophore, anti_species, stock_concentration, is_secondary)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    id.to_string(),
                    new.name,
                    new.target,
                    new.host_species,
                    new.vendor,
                    new.catalog_number,
                    new.lot_number,
                    new.igg_subtype,
                    new.fluorophore,
                    new.anti_species,
                    new.stock_concentration,
                    new.is_secondary,
                ],
            )
            .map_err(|err| classify(err, Some("antibodies"), id))?;
        debug!(antibody_id = %id, name = %new.name, "created antibody");
        self.get_antibody(id)
    }

    pub fn get_antibody(&self, id: AntibodyId) -> StoreResult<Antibody> {
        query_optional(
            self.conn,
            &format!("SELECT {ANTIBODY_COLUMNS} FROM antibodies WHERE id = ?1"),
            [id.to_string()],
            antibody_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("antibody", id))
    }

    /// Catalog entries, optionally narrowed to one role, sorted by name.
    pub fn list_antibodies(&self, role: Option<AntibodyRole>) -> StoreResult<Vec<Antibody>> {
        match role {
            Some(role) => query_all(
                self.conn,
                &format!(
                    "SELECT {ANTIBODY_COLUMNS} FROM antibodies WHERE is_secondary = ?1 ORDER BY name COLLATE NOCASE, id"
                ),
                [role == AntibodyRole::Secondary],
                antibody_from_row,
            ),
            None => query_all(
                self.conn,
                &format!(
                    "SELECT {ANTIBODY_COLUMNS} FROM antibodies ORDER BY is_secondary, name COLLATE NOCASE, id"
                ),
                [],
                antibody_from_row,
            ),
        }
    }

    /// Refuses to flip `is_secondary` while slides still link the antibody in its
    /// current role.
    pub fn update_antibody(&self, antibody: &Antibody) -> StoreResult<Antibody> {
        let current = self.get_antibody(antibody.id)?;
        if current.is_secondary != antibody.is_secondary {
            let linked_as = current.role();
            let key = antibody.id.to_string();
            let rows = count(self.conn, linked_as.table(), "antibody_id", &key)?;
            if rows > 0 {
                return Err(StoreError::ConstraintViolation {
                    rule: ConstraintRule::Check,
                    table: "antibodies".to_string(),
                    row: key,
                    detail: format!(
                        "antibody `{}` is attached to {rows} slide(s) as {linked_as}",
                        current.name
                    ),
                });
            }
        }
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE antibodies
                SET name = ?2, target = ?3, host_species = ?4, vendor = ?5,
                    catalog_number = ?6, lot_number = ?7, igg_subtype = ?8, fluorophore = ?9,
                    anti_species = ?10, stock_concentration = ?11, is_secondary = ?12,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = ?1
                "#,
                params![
                    antibody.id.to_string(),
                    antibody.name,
                    antibody.target,
                    antibody.host_species,
                    antibody.vendor,
                    antibody.catalog_number,
                    antibody.lot_number,
                    antibody.igg_subtype,
                    antibody.fluorophore,
                    antibody.anti_species,
                    antibody.stock_concentration,
                    antibody.is_secondary,
                ],
            )
            .map_err(|err| classify(err, Some("antibodies"), antibody.id))?;
        if changed == 0 {
            return Err(StoreError::not_found("antibody", antibody.id));
        }
        self.get_antibody(antibody.id)
    }

    /// Refused while any slide still uses the antibody.
    pub fn delete_antibody(&self, id: AntibodyId) -> StoreResult<Antibody> {
        let antibody = self.get_antibody(id)?;
        let key = id.to_string();
        let mut blockers = Vec::new();
        for role in AntibodyRole::ALL {
            let rows = count(self.conn, role.table(), "antibody_id", &key)?;
            if rows > 0 {
                blockers.push(Dependent {
                    table: role.table(),
                    rows,
                });
            }
        }
        if !blockers.is_empty() {
            return Err(StoreError::ReferentialIntegrity {
                table: "antibodies".to_string(),
                row: key,
                blockers,
                detail: format!("antibody `{}` is still attached to slides", antibody.name),
            });
        }
        self.conn
            .execute("DELETE FROM antibodies WHERE id = ?1", [&key])
            .map_err(|err| classify(err, Some("antibodies"), id))?;
        debug!(antibody_id = %id, "deleted antibody");
        Ok(antibody)
    }
}

#[cfg(test)]
mod tests {
    use core_types::AntibodyUsage;

    use crate::test_util::store_with_fixture;
    use crate::{SqliteStore, StoreResult};

    use super::*;

    #[test]
    fn list_filters_by_role() {
        let store = SqliteStore::in_memory().expect("store");
        store
            .write(|tx| -> StoreResult<()> {
                tx.create_antibody(&NewAntibody::primary("anti-NeuN", "mouse"))?;
                tx.create_antibody(&NewAntibody::primary("anti-GFAP", "rabbit"))?;
                tx.create_antibody(&NewAntibody::secondary(
                    "Goat anti-Mouse 555",
                    "goat",
                    "mouse",
                    "Cy3",
                ))?;
                Ok(())
            })
            .expect("seed");

        let primaries = store
            .read(|tx| tx.list_antibodies(Some(AntibodyRole::Primary)))
            .expect("list");
        let names: Vec<_> = primaries.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["anti-GFAP", "anti-NeuN"]);

        let all = store.read(|tx| tx.list_antibodies(None)).expect("list");
        assert_eq!(all.len(), 3);
        assert!(all[2].is_secondary);
    }

    #[test]
    fn delete_is_restricted_while_attached() {
        let (store, fixture) = store_with_fixture();
        let antibody = store
            .write(|tx| -> StoreResult<Antibody> {
                let gfap = tx.create_antibody(&NewAntibody::primary("anti-GFAP", "rabbit"))?;
                tx.attach_antibody(
                    AntibodyRole::Primary,
                    fixture.slide.id,
                    gfap.id,
                    &AntibodyUsage::default(),
                )?;
                Ok(gfap)
            })
            .expect("attach");

        let err = store
            .write(|tx| tx.delete_antibody(antibody.id))
            .unwrap_err();
        match err {
            StoreError::ReferentialIntegrity { blockers, .. } => {
                assert_eq!(
                    blockers,
                    vec![Dependent {
                        table: "slide_primary_antibodies",
                        rows: 1
                    }]
                );
            }
            other => panic!("unexpected error: {other}"),
        }

        store
            .write(|tx| -> StoreResult<Antibody> {
                tx.detach_antibody(AntibodyRole::Primary, fixture.slide.id, antibody.id)?;
                tx.delete_antibody(antibody.id)
            })
            .expect("delete once detached");
    }

    #[test]
    fn role_flip_is_refused_while_attached() {
        let (store, fixture) = store_with_fixture();
        let antibody = store
            .write(|tx| -> StoreResult<Antibody> {
                let gfap = tx.create_antibody(&NewAntibody::primary("anti-GFAP", "rabbit"))?;
                tx.attach_antibody(
                    AntibodyRole::Primary,
                    fixture.slide.id,
                    gfap.id,
                    &AntibodyUsage::default(),
                )?;
                Ok(gfap)
            })
            .expect("attach");

        let flipped = Antibody {
            is_secondary: true,
            ..antibody.clone()
        };
        let err = store.write(|tx| tx.update_antibody(&flipped)).unwrap_err();
        assert_eq!(err.constraint_rule(), Some(ConstraintRule::Check));
        let stored = store.read(|tx| tx.get_antibody(antibody.id)).expect("get");
        assert!(!stored.is_secondary);

        let renamed = Antibody {
            name: "anti-GFAP (lot 7)".to_string(),
            ..antibody.clone()
        };
        store
            .write(|tx| tx.update_antibody(&renamed))
            .expect("other fields stay editable");

        store
            .write(|tx| -> StoreResult<Antibody> {
                tx.detach_antibody(AntibodyRole::Primary, fixture.slide.id, antibody.id)?;
                tx.update_antibody(&flipped)
            })
            .expect("flip once detached");
    }
}
