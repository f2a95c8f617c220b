use core_types::{EntityKind, NewUser, Session, User, UserId};
use tracing::info;

use crate::policy::authorize_admin;
use crate::{
    Notebook, NotebookError, Permission, Result, audit_created, audit_deleted, audit_updated,
};

impl Notebook {
    pub fn create_user(&self, session: &Session, new: &NewUser) -> Result<User> {
        authorize_admin(session, "users")?;
        self.store.write(|tx| {
            let user = tx.create_user(new)?;
            audit_created(tx, session, EntityKind::User, user.id, &user)?;
            info!(user_id = %user.id, role = %user.app_role, "created user");
            Ok(user)
        })
    }

    /// Admins may edit anyone; other users may edit their own name and email.
    pub fn update_user(&self, session: &Session, user: &User) -> Result<User> {
        self.store.write(|tx| {
            let before = tx.get_user(user.id)?;
            let self_edit = user.id == session.user_id && user.app_role == before.app_role;
            if !self_edit && !session.is_admin() {
                return Err(NotebookError::Forbidden {
                    user: session.user_id,
                    permission: Permission::Administer,
                    scope: format!("user {}", user.id),
                });
            }
            let after = tx.update_user(user)?;
            audit_updated(tx, session, EntityKind::User, after.id, &before, &after)?;
            Ok(after)
        })
    }

    /// Refused while the user still owns or authored anything.
    pub fn delete_user(&self, session: &Session, id: UserId) -> Result<User> {
        authorize_admin(session, "users")?;
        self.store.write(|tx| {
            let user = tx.delete_user(id)?;
            audit_deleted(tx, session, EntityKind::User, id, &user)?;
            info!(user_id = %id, "deleted user");
            Ok(user)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.store.read(|tx| tx.list_users())?)
    }
}
