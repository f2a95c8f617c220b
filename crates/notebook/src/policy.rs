//! Role checks applied before every store mutation.
//!
//! Experiment owners hold every experiment permission. Members are judged by their
//! [`MemberRole`]; an admin account working in Admin mode passes every check.

use std::fmt;

use core_types::{Experiment, ExperimentMember, MemberRole, Session};
use storage_sqlite::StoreTx;

use crate::{NotebookError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    /// Slides and everything hanging off them, plus groups and protocol defaults.
    MutateSlides,
    AddNote,
    /// Experiment fields, status, membership and deletion.
    ManageExperiment,
    /// User accounts and catalog edits.
    Administer,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::MutateSlides => "mutate_slides",
            Permission::AddNote => "add_note",
            Permission::ManageExperiment => "manage_experiment",
            Permission::Administer => "administer",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn allows(
    session: &Session,
    permission: Permission,
    experiment: &Experiment,
    member: Option<&ExperimentMember>,
) -> bool {
    if session.is_admin() {
        return true;
    }
    if permission == Permission::Administer {
        return false;
    }
    if experiment.owner_user_id == session.user_id {
        return true;
    }
    let Some(member) = member else {
        return false;
    };
    match permission {
        Permission::Read => true,
        Permission::MutateSlides => member.role.can_mutate_slides(),
        Permission::AddNote => member.role.can_mutate_slides() || member.can_add_notes,
        Permission::ManageExperiment => member.role == MemberRole::Owner,
        Permission::Administer => false,
    }
}

pub(crate) fn authorize(
    tx: &StoreTx<'_>,
    session: &Session,
    permission: Permission,
    experiment: &Experiment,
) -> Result<()> {
    let member = tx.find_member(experiment.id, session.user_id)?;
    if allows(session, permission, experiment, member.as_ref()) {
        return Ok(());
    }
    Err(NotebookError::Forbidden {
        user: session.user_id,
        permission,
        scope: format!("experiment {}", experiment.id),
    })
}

pub(crate) fn authorize_admin(session: &Session, scope: &str) -> Result<()> {
    if session.is_admin() {
        return Ok(());
    }
    Err(NotebookError::Forbidden {
        user: session.user_id,
        permission: Permission::Administer,
        scope: scope.to_string(),
    })
}
