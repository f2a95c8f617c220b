use std::collections::HashSet;
use std::path::Path;

use core_types::{Antibody, AntibodyId, AntibodyRole, EntityKind, NewAntibody, Session};
use reagents::{load_primaries, load_secondaries};
use serde::Serialize;
use tracing::info;

use crate::policy::authorize_admin;
use crate::{Notebook, NotebookError, Result, audit_created, audit_deleted, audit_updated};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub created: Vec<Antibody>,
    /// Rows whose name already exists in the catalog for the same role.
    pub skipped: Vec<String>,
}

impl Notebook {
    /// Open to every session.
    pub fn create_antibody(&self, session: &Session, new: &NewAntibody) -> Result<Antibody> {
        self.store.write(|tx| {
            let antibody = tx.create_antibody(new)?;
            audit_created(tx, session, EntityKind::Antibody, antibody.id, &antibody)?;
            Ok(antibody)
        })
    }

    pub fn update_antibody(&self, session: &Session, antibody: &Antibody) -> Result<Antibody> {
        authorize_admin(session, "antibody catalog")?;
        self.store.write(|tx| {
            let before = tx.get_antibody(antibody.id)?;
            let after = tx.update_antibody(antibody)?;
            audit_updated(tx, session, EntityKind::Antibody, after.id, &before, &after)?;
            Ok(after)
        })
    }

    /// Refused while any slide still uses the antibody.
    pub fn delete_antibody(&self, session: &Session, id: AntibodyId) -> Result<Antibody> {
        authorize_admin(session, "antibody catalog")?;
        self.store.write(|tx| {
            let deleted = tx.delete_antibody(id)?;
            audit_deleted(tx, session, EntityKind::Antibody, id, &deleted)?;
            Ok(deleted)
        })
    }

    pub fn list_antibodies(&self, role: Option<AntibodyRole>) -> Result<Vec<Antibody>> {
        Ok(self.store.read(|tx| tx.list_antibodies(role))?)
    }

    /// Loads a CSV catalog and adds every row whose name is not yet catalogued for
    /// `role`. The whole import is one transaction.
    pub fn import_antibodies(
        &self,
        session: &Session,
        role: AntibodyRole,
        path: &Path,
    ) -> Result<ImportSummary> {
        let rows: Vec<NewAntibody> = match role {
            AntibodyRole::Primary => load_primaries(path)?
                .into_iter()
                .map(|row| row.into_new_antibody())
                .collect(),
            AntibodyRole::Secondary => load_secondaries(path)?
                .into_iter()
                .map(|row| row.into_new_antibody())
                .collect(),
        };

        let summary = self.store.write(|tx| {
            let mut known: HashSet<String> = tx
                .list_antibodies(Some(role))?
                .into_iter()
                .map(|ab| ab.name.to_lowercase())
                .collect();
            let mut summary = ImportSummary::default();
            for row in rows {
                if !known.insert(row.name.to_lowercase()) {
                    summary.skipped.push(row.name);
                    continue;
                }
                let antibody = tx.create_antibody(&row)?;
                audit_created(tx, session, EntityKind::Antibody, antibody.id, &antibody)?;
                summary.created.push(antibody);
            }
            Ok::<_, NotebookError>(summary)
        })?;

        info!(
            path = %path.display(),
            role = %role,
            created = summary.created.len(),
            skipped = summary.skipped.len(),
            "imported antibody catalog"
        );
        Ok(summary)
    }
}
