use std::path::PathBuf;

use core_types::{AppMode, AppRole, EntityKind, NewUser, Session, User};
use storage_sqlite::StoreTx;
use tracing::info;
use uuid::Uuid;

use crate::{Notebook, NotebookError, Result, audit_created};

/// What the landing step collects before a workspace opens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandingRequest {
    pub mode: AppMode,
    pub user_identity: String,
    pub output_dir: Option<PathBuf>,
}

impl Notebook {
    /// Seeds an admin account on an empty database. Returns `None` once any user exists.
    pub fn ensure_bootstrap_admin(
        &self,
        display_name: &str,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        self.store.write(|tx| {
            if tx.count_users()? > 0 {
                return Ok(None);
            }
            let mut new = NewUser::admin(display_name);
            new.email = email.map(str::to_string);
            let user = tx.create_user(&new)?;
            let session = Session::new(&user, AppMode::Admin, &self.settings.default_output_dir);
            audit_created(tx, &session, EntityKind::User, user.id, &user)?;
            info!(user_id = %user.id, "created bootstrap admin");
            Ok(Some(user))
        })
    }

    pub fn begin_session(&self, request: &LandingRequest) -> Result<Session> {
        let user = self
            .store
            .read(|tx| resolve_user(tx, &request.user_identity))?;
        if request.mode == AppMode::Admin && user.app_role != AppRole::Admin {
            return Err(NotebookError::AdminModeDenied {
                user: user.display_name,
            });
        }

        let output_dir = request
            .output_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| self.settings.default_output_dir.clone());
        info!(
            user_id = %user.id,
            mode = %request.mode,
            output_dir = %output_dir.display(),
            "session started"
        );
        Ok(Session::new(&user, request.mode, output_dir))
    }

    pub fn resolve_user(&self, identity: &str) -> Result<User> {
        self.store.read(|tx| resolve_user(tx, identity))
    }
}

/// Looks `identity` up as a user id, then an email, then a unique display name.
pub(crate) fn resolve_user(tx: &StoreTx<'_>, identity: &str) -> Result<User> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(NotebookError::UnknownUser(String::new()));
    }

    if let Ok(id) = identity.parse::<Uuid>() {
        return match tx.get_user(id) {
            Ok(user) => Ok(user),
            Err(err) if err.is_not_found() => Err(NotebookError::UnknownUser(identity.to_string())),
            Err(err) => Err(err.into()),
        };
    }

    if let Some(user) = tx.find_user_by_email(identity)? {
        return Ok(user);
    }

    let mut matches = tx.find_users_by_display_name(identity)?;
    match matches.len() {
        0 => Err(NotebookError::UnknownUser(identity.to_string())),
        1 => Ok(matches.remove(0)),
        count => Err(NotebookError::AmbiguousUser {
            identity: identity.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use core_types::NewUser;

    use super::*;
    use crate::test_util::lab;

    #[test]
    fn bootstrap_admin_only_on_empty_database() {
        let lab = lab();
        let again = lab
            .notebook
            .ensure_bootstrap_admin("Second", None)
            .expect("bootstrap");
        assert!(again.is_none());
        let audit = lab
            .notebook
            .store()
            .read(|tx| tx.list_audit_for_entity(EntityKind::User, &lab.admin.user_id.to_string()))
            .expect("audit");
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn identity_resolves_by_id_email_and_name() {
        let lab = lab();
        let by_id = lab
            .notebook
            .resolve_user(&lab.owner.user_id.to_string())
            .expect("by id");
        assert_eq!(by_id.display_name, "Ada");

        let by_email = lab.notebook.resolve_user(" ROOT@lab.test ").expect("by email");
        assert_eq!(by_email.id, lab.admin.user_id);

        let by_name = lab.notebook.resolve_user("ada").expect("by name");
        assert_eq!(by_name.id, lab.owner.user_id);

        assert!(matches!(
            lab.notebook.resolve_user(&Uuid::new_v4().to_string()),
            Err(NotebookError::UnknownUser(_))
        ));
        assert!(matches!(
            lab.notebook.resolve_user("nobody"),
            Err(NotebookError::UnknownUser(_))
        ));
    }

    #[test]
    fn duplicate_display_names_are_ambiguous() {
        let lab = lab();
        lab.notebook
            .store()
            .write(|tx| tx.create_user(&NewUser::researcher("ADA")))
            .expect("second ada");
        assert!(matches!(
            lab.notebook.resolve_user("Ada"),
            Err(NotebookError::AmbiguousUser { count: 2, .. })
        ));
    }

    #[test]
    fn admin_mode_requires_admin_account() {
        let lab = lab();
        let denied = lab.notebook.begin_session(&LandingRequest {
            mode: AppMode::Admin,
            user_identity: "Ada".to_string(),
            output_dir: None,
        });
        assert!(matches!(denied, Err(NotebookError::AdminModeDenied { .. })));

        let admin = lab
            .notebook
            .begin_session(&LandingRequest {
                mode: AppMode::Admin,
                user_identity: "root@lab.test".to_string(),
                output_dir: Some(PathBuf::from("/srv/out")),
            })
            .expect("admin session");
        assert!(admin.is_admin());
        assert_eq!(admin.output_dir, PathBuf::from("/srv/out"));
    }

    #[test]
    fn output_dir_defaults_from_settings() {
        let lab = lab();
        let session = lab
            .notebook
            .begin_session(&LandingRequest {
                mode: AppMode::Researcher,
                user_identity: "Ada".to_string(),
                output_dir: Some(PathBuf::new()),
            })
            .expect("session");
        assert_eq!(session.output_dir, lab.notebook.settings().default_output_dir);
        assert_eq!(session.mode, AppMode::Researcher);
    }
}
