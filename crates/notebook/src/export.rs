use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use core_types::{
    AntibodyRole, EntityKind, ExperimentExport, ExperimentId, Metadata, NewExperimentExport,
    NewUsageEvent, Session, Slide, UsageType,
};
use serde_json::{Value, json};
use storage_sqlite::StoreTx;
use tracing::{info, warn};
use uuid::Uuid;

use crate::panels::primary_mixes;
use crate::policy::authorize;
use crate::{Notebook, NotebookError, Permission, Result, audit_created};

/// Keeps ASCII letters, digits, `-` and `_`; everything else becomes `_`.
fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned.to_string()
    }
}

fn export_file_name(display_name: &str, run_id: Uuid) -> String {
    let id = run_id.simple().to_string();
    format!(
        "{}_{}_{}.json",
        Utc::now().format("%Y-%m-%d"),
        file_safe(display_name),
        &id[..8]
    )
}

/// Moves the staged file into place once the transaction committed, or discards it.
fn publish_staged<T>(committed: Result<T>, staged: &Path, path: &Path) -> Result<T> {
    match committed {
        Ok(value) => {
            fs::rename(staged, path).map_err(|err| NotebookError::io(path, err))?;
            Ok(value)
        }
        Err(err) => {
            match fs::remove_file(staged) {
                Err(cleanup) if cleanup.kind() != std::io::ErrorKind::NotFound => {
                    warn!(path = %staged.display(), "failed to discard staged export: {cleanup}");
                }
                _ => {}
            }
            Err(err)
        }
    }
}

impl Notebook {
    fn slide_payload(&self, tx: &StoreTx<'_>, slide: &Slide) -> Result<Value> {
        let antibodies = |role: AntibodyRole| -> Result<Vec<Value>> {
            tx.list_slide_antibodies(role, slide.id)?
                .into_iter()
                .map(|link| -> Result<Value> {
                    let antibody = tx.get_antibody(link.antibody_id)?;
                    Ok(json!({ "antibody": antibody, "usage": link.usage }))
                })
                .collect()
        };
        Ok(json!({
            "slide": slide,
            "effective_protocol": self.slide_protocol(tx, slide)?,
            "primary_antibodies": antibodies(AntibodyRole::Primary)?,
            "secondary_antibodies": antibodies(AntibodyRole::Secondary)?,
            "edu_conditions": tx.list_edu_conditions(slide.id)?,
            "assets": tx.list_assets(slide.id)?,
            "note_feed": tx.note_feed(slide.id)?,
            "usage_events": tx.list_usage_events(slide.id)?,
        }))
    }

    /// Writes a JSON snapshot of the experiment to the session's output directory and
    /// records it, with one `export` usage event per slide. The file is staged beside
    /// its final name and only moved into place after the records commit.
    pub fn export_experiment(
        &self,
        session: &Session,
        experiment: ExperimentId,
    ) -> Result<ExperimentExport> {
        let run_id = Uuid::new_v4();
        let path: PathBuf = session
            .output_dir
            .join(export_file_name(&session.display_name, run_id));
        let staged = path.with_extension("json.partial");

        let committed = self.store.write(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;

            let slides = tx.list_slides_by_experiment(experiment)?;
            let slide_payloads = slides
                .iter()
                .map(|slide| self.slide_payload(tx, slide))
                .collect::<Result<Vec<_>>>()?;
            let payload = json!({
                "run_id": run_id,
                "exported_at": Utc::now(),
                "exported_by": {
                    "user_id": session.user_id,
                    "display_name": session.display_name,
                    "mode": session.mode,
                },
                "experiment": parent,
                "members": tx.list_members(experiment)?,
                "treatment_groups": tx.list_treatment_groups(experiment)?,
                "protocol_defaults": tx.get_protocol_defaults(experiment)?,
                "slides": slide_payloads,
                "primary_master_mixes": primary_mixes(tx, &parent)?,
            });

            let export = tx.record_export(&NewExperimentExport {
                experiment_id: experiment,
                exported_by_user_id: session.user_id,
                file_path: path.display().to_string(),
                payload: payload.clone(),
            })?;
            for slide in &slides {
                let mut metadata = Metadata::new();
                metadata.insert("export_id".to_string(), json!(export.id));
                metadata.insert("run_id".to_string(), json!(run_id));
                tx.append_usage_event(&NewUsageEvent {
                    slide_id: slide.id,
                    used_by_user_id: session.user_id,
                    usage_type: UsageType::Export,
                    context: Some(path.display().to_string()),
                    metadata,
                })?;
            }
            audit_created(tx, session, EntityKind::ExperimentExport, export.id, &export)?;

            fs::create_dir_all(&session.output_dir)
                .map_err(|err| NotebookError::io(&session.output_dir, err))?;
            let body = serde_json::to_vec_pretty(&payload)?;
            fs::write(&staged, body).map_err(|err| NotebookError::io(&staged, err))?;
            Ok::<_, NotebookError>(export)
        });
        let export = publish_staged(committed, &staged, &path)?;

        info!(
            experiment_id = %experiment,
            export_id = %export.id,
            path = %path.display(),
            "exported experiment"
        );
        Ok(export)
    }

    pub fn list_exports(
        &self,
        session: &Session,
        experiment: ExperimentId,
    ) -> Result<Vec<ExperimentExport>> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            Ok(tx.list_exports(experiment)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use core_types::{AntibodyUsage, NewAntibody};

    use super::*;
    use crate::test_util::lab;

    #[test]
    fn file_names_are_sanitized() {
        let run = Uuid::parse_str("0123abcd-0000-4000-8000-000000000000").expect("uuid");
        let name = export_file_name("Ada Lovelace/ä", run);
        assert!(name.ends_with("_Ada_Lovelace_0123abcd.json"), "{name}");
        assert_eq!(file_safe("  "), "user");
    }

    #[test]
    fn export_writes_file_and_records_usage() {
        let mut lab = lab();
        let dir = tempfile::tempdir().expect("tempdir");
        lab.viewer.output_dir = dir.path().join("out");

        let antibody = lab
            .notebook
            .create_antibody(&lab.owner, &NewAntibody::primary("GFAP", "rabbit"))
            .expect("antibody");
        lab.notebook
            .attach_antibody(
                &lab.owner,
                AntibodyRole::Primary,
                lab.slide.id,
                antibody.id,
                &AntibodyUsage::default(),
            )
            .expect("attach");

        let export = lab
            .notebook
            .export_experiment(&lab.viewer, lab.experiment.id)
            .expect("export");
        let written: Value =
            serde_json::from_slice(&fs::read(&export.file_path).expect("read export"))
                .expect("parse export");
        assert_eq!(written, export.payload);
        assert_eq!(written["slides"].as_array().map(Vec::len), Some(1));
        assert_eq!(written["primary_master_mixes"][0]["mix_id"], json!("MM1"));

        let usage = lab
            .notebook
            .list_usage_events(&lab.owner, lab.slide.id)
            .expect("usage");
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].usage_type, UsageType::Export);
        assert_eq!(usage[0].used_by_user_id, lab.viewer.user_id);

        let exports = lab
            .notebook
            .list_exports(&lab.owner, lab.experiment.id)
            .expect("exports");
        assert_eq!(exports, vec![export]);
    }

    #[test]
    fn outsiders_cannot_export() {
        let mut lab = lab();
        let dir = tempfile::tempdir().expect("tempdir");
        lab.outsider.output_dir = dir.path().to_path_buf();
        let denied = lab
            .notebook
            .export_experiment(&lab.outsider, lab.experiment.id);
        assert!(denied.is_err_and(|err| err.is_forbidden()));
        assert_eq!(fs::read_dir(dir.path()).expect("dir").count(), 0);
    }

    #[test]
    fn staged_file_is_discarded_when_the_commit_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.json");
        let staged = path.with_extension("json.partial");
        fs::write(&staged, b"{}").expect("stage");

        let failed: Result<()> = Err(NotebookError::Store(storage_sqlite::StoreError::not_found(
            "experiment",
            "gone",
        )));
        assert!(publish_staged(failed, &staged, &path).is_err());
        assert!(!staged.exists());
        assert!(!path.exists());

        fs::write(&staged, b"{}").expect("stage again");
        publish_staged(Ok(()), &staged, &path).expect("publish");
        assert!(path.exists());
        assert!(!staged.exists());
    }

    #[test]
    fn unwritable_output_dir_records_nothing() {
        let mut lab = lab();
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").expect("file");
        lab.owner.output_dir = blocker;

        let failed = lab
            .notebook
            .export_experiment(&lab.owner, lab.experiment.id);
        assert!(failed.is_err());
        let exports = lab
            .notebook
            .list_exports(&lab.owner, lab.experiment.id)
            .expect("exports");
        assert!(exports.is_empty());
        assert_eq!(fs::read_dir(dir.path()).expect("dir").count(), 1);
    }
}
