use core_types::{NewUser, User, UserId};
use rusqlite::{Row, params};
use tracing::debug;
use uuid::Uuid;

use crate::StoreTx;
use crate::codec::{count, get_date, get_enum, get_uuid, query_all, query_optional};
use crate::error::{Dependent, StoreError, StoreResult, classify};

const USER_COLUMNS: &str = "id, display_name, email, app_role, created_at, updated_at";

/// Tables whose rows keep a user alive, with the referencing column.
const USER_DEPENDENTS: &[(&str, &str)] = &[
    ("experiments", "owner_user_id"),
    ("slides", "owner_user_id"),
    ("slide_assets", "created_by_user_id"),
    ("slide_notes", "author_user_id"),
    ("slide_usage_events", "used_by_user_id"),
    ("experiment_exports", "exported_by_user_id"),
    ("audit_log", "actor_user_id"),
];

fn user_from_row(row: &Row<'_>) -> StoreResult<User> {
    Ok(User {
        id: get_uuid(row, "id")?,
        display_name: row.get("display_name")?,
        email: row.get("email")?,
        app_role: get_enum(row, "app_role")?,
        created_at: get_date(row, "created_at")?,
        updated_at: get_date(row, "updated_at")?,
    })
}

impl StoreTx<'_> {
    pub fn create_user(&self, new: &NewUser) -> StoreResult<User> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO users (id, display_name, email, app_role) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    new.display_name,
                    new.email,
                    new.app_role.as_str()
                ],
            )
            .map_err(|err| classify(err, Some("users"), id))?;
        debug!(user_id = %id, "created user");
        self.get_user(id)
    }

    pub fn get_user(&self, id: UserId) -> StoreResult<User> {
        query_optional(
            self.conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id.to_string()],
            user_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("user", id))
    }

    pub fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        query_optional(
            self.conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            [email.trim()],
            user_from_row,
        )
    }

    pub fn find_users_by_display_name(&self, display_name: &str) -> StoreResult<Vec<User>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {USER_COLUMNS} FROM users WHERE display_name = ?1 COLLATE NOCASE ORDER BY created_at"
            ),
            [display_name.trim()],
            user_from_row,
        )
    }

    pub fn list_users(&self) -> StoreResult<Vec<User>> {
        query_all(
            self.conn,
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY display_name COLLATE NOCASE, id"),
            [],
            user_from_row,
        )
    }

    pub fn count_users(&self) -> StoreResult<u64> {
        let rows: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(rows.max(0) as u64)
    }

    pub fn update_user(&self, user: &User) -> StoreResult<User> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE users
                SET display_name = ?2, email = ?3, app_role = ?4,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = ?1
                "#,
                params![
                    user.id.to_string(),
                    user.display_name,
                    user.email,
                    user.app_role.as_str()
                ],
            )
            .map_err(|err| classify(err, Some("users"), user.id))?;
        if changed == 0 {
            return Err(StoreError::not_found("user", user.id));
        }
        self.get_user(user.id)
    }

    /// Rows in other tables that still reference `id`; empty when the user may be deleted.
    pub fn user_dependents(&self, id: UserId) -> StoreResult<Vec<Dependent>> {
        let key = id.to_string();
        let mut blockers = Vec::new();
        for &(table, column) in USER_DEPENDENTS {
            let rows = count(self.conn, table, column, &key)?;
            if rows > 0 {
                blockers.push(Dependent { table, rows });
            }
        }
        Ok(blockers)
    }

    /// Deletes a user that nothing references. Memberships and remembered storage
    /// locations go with it.
    pub fn delete_user(&self, id: UserId) -> StoreResult<User> {
        let user = self.get_user(id)?;
        let blockers = self.user_dependents(id)?;
        if !blockers.is_empty() {
            return Err(StoreError::ReferentialIntegrity {
                table: "users".to_string(),
                row: id.to_string(),
                blockers,
                detail: format!("user `{}` is still referenced", user.display_name),
            });
        }
        self.conn
            .execute("DELETE FROM users WHERE id = ?1", [id.to_string()])
            .map_err(|err| classify(err, Some("users"), id))?;
        debug!(user_id = %id, "deleted user");
        Ok(user)
    }
}
