//! Session-scoped notebook operations over the SlideApp store.
//!
//! Every mutating call checks the acting [`Session`] against [`policy`] and writes one
//! audit entry inside the same store transaction as the change itself.

mod catalog;
mod error;
mod experiments;
mod export;
mod history;
mod panels;
pub mod policy;
mod session;
mod slides;
mod users;

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use core_types::{
    AuditAction, EntityKind, Metadata, NewAuditEntry, ProtocolSettings, Session, snapshot,
};
use serde::Serialize;
use storage_sqlite::{SqliteStore, StoreTx};

pub use catalog::ImportSummary;
pub use error::{NotebookError, Result};
pub use panels::{PanelReport, SecondaryCheck};
pub use policy::Permission;
pub use session::LandingRequest;
pub use slides::hash_file;

#[derive(Debug, Clone)]
pub struct NotebookSettings {
    pub default_output_dir: PathBuf,
    /// Fallback protocol used where an experiment has no stored defaults.
    pub protocol: ProtocolSettings,
    pub panel_width: usize,
    pub recent_locations: usize,
}

impl Default for NotebookSettings {
    fn default() -> Self {
        Self {
            default_output_dir: PathBuf::from("exports"),
            protocol: ProtocolSettings {
                serum_type: Some("goat".to_string()),
                primary_volume_ul: Some(250.0),
                primary_incubation: Some("overnight at 4C".to_string()),
                secondary_volume_ul: Some(250.0),
                secondary_incubation: Some("2 hours at RT".to_string()),
                ..ProtocolSettings::default()
            },
            panel_width: 3,
            recent_locations: 8,
        }
    }
}

pub struct Notebook {
    store: Arc<SqliteStore>,
    settings: NotebookSettings,
}

impl Notebook {
    pub fn new(store: Arc<SqliteStore>, settings: NotebookSettings) -> Self {
        let panel_width = settings.panel_width;
        Self { store, settings }.with_panel_width(panel_width)
    }

    pub fn with_panel_width(mut self, width: usize) -> Self {
        self.settings.panel_width = width.max(1);
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn settings(&self) -> &NotebookSettings {
        &self.settings
    }
}

fn audit(
    tx: &StoreTx<'_>,
    session: &Session,
    entity_type: EntityKind,
    entity_id: impl Display,
    action: AuditAction,
    before: Option<Metadata>,
    after: Option<Metadata>,
) -> Result<()> {
    tx.append_audit(&NewAuditEntry {
        actor_user_id: session.user_id,
        entity_type,
        entity_id: entity_id.to_string(),
        action,
        before,
        after,
    })?;
    Ok(())
}

pub(crate) fn audit_created<T: Serialize>(
    tx: &StoreTx<'_>,
    session: &Session,
    entity_type: EntityKind,
    entity_id: impl Display,
    after: &T,
) -> Result<()> {
    let after = snapshot(after)?;
    audit(tx, session, entity_type, entity_id, AuditAction::Create, None, Some(after))
}

pub(crate) fn audit_updated<T: Serialize>(
    tx: &StoreTx<'_>,
    session: &Session,
    entity_type: EntityKind,
    entity_id: impl Display,
    before: &T,
    after: &T,
) -> Result<()> {
    let before = snapshot(before)?;
    let after = snapshot(after)?;
    audit(
        tx,
        session,
        entity_type,
        entity_id,
        AuditAction::Update,
        Some(before),
        Some(after),
    )
}

pub(crate) fn audit_deleted<T: Serialize>(
    tx: &StoreTx<'_>,
    session: &Session,
    entity_type: EntityKind,
    entity_id: impl Display,
    before: &T,
) -> Result<()> {
    let before = snapshot(before)?;
    audit(tx, session, entity_type, entity_id, AuditAction::Delete, Some(before), None)
}
