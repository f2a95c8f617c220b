//! Embedded SQLite persistence for the lab-notebook record model.
//!
//! Every operation runs on a [`StoreTx`] obtained from [`SqliteStore::read`] or
//! [`SqliteStore::write`]. Notes, usage events and audit entries are append-only:
//! `StoreTx` exposes no update or delete for them, and the schema rejects raw
//! attempts with triggers.

mod antibodies;
mod codec;
mod error;
mod experiments;
mod history;
mod schema;
mod slides;
mod users;
mod workspace;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

pub use error::{ConstraintRule, Dependent, StoreError, StoreResult};
pub use schema::CURRENT_DB_SCHEMA_VERSION;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Handle for one unit of work; every store operation is a method on it.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl<'a> StoreTx<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "opened sqlite store");
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> StoreResult<u32> {
        schema::read_schema_version(&self.conn.lock())
    }

    pub fn foreign_keys_enabled(&self) -> StoreResult<bool> {
        let enabled: i64 = self
            .conn
            .lock()
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        Ok(enabled == 1)
    }

    /// Runs `f` without opening a transaction.
    pub fn read<T, E>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.conn.lock();
        f(&StoreTx::new(&conn))
    }

    /// Runs `f` inside a transaction that commits only when `f` returns `Ok`.
    pub fn write<T, E>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|err| E::from(StoreError::from(err)))?;
        match f(&StoreTx::new(&tx)) {
            Ok(value) => {
                tx.commit().map_err(|err| E::from(StoreError::from(err)))?;
                Ok(value)
            }
            Err(err) => {
                debug!("rolling back store transaction");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use core_types::{
        Experiment, NewExperiment, NewSlide, NewTreatmentGroup, NewUser, Slide, TreatmentGroup,
        User,
    };

    use crate::{SqliteStore, StoreResult, StoreTx};

    pub struct Fixture {
        pub owner: User,
        pub experiment: Experiment,
        pub group: TreatmentGroup,
        pub slide: Slide,
    }

    pub fn seed(tx: &StoreTx<'_>) -> StoreResult<Fixture> {
        let owner = tx.create_user(&NewUser::researcher("Ada").with_email("ada@lab.test"))?;
        let experiment = tx.create_experiment(&NewExperiment::new(owner.id, "Cortex IHC"))?;
        let group = tx.create_treatment_group(&NewTreatmentGroup {
            experiment_id: experiment.id,
            name: "Control".to_string(),
            description: None,
            sort_order: 0,
        })?;
        let slide = tx.create_slide(&NewSlide::new(
            experiment.id,
            group.id,
            owner.id,
            "S-001",
        ))?;
        Ok(Fixture {
            owner,
            experiment,
            group,
            slide,
        })
    }

    pub fn store_with_fixture() -> (SqliteStore, Fixture) {
        let store = SqliteStore::in_memory().expect("open store");
        let fixture = store.write(|tx| seed(tx)).expect("seed fixture");
        (store, fixture)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn opens_file_store_with_current_schema() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("slideapp.db");
        let store = SqliteStore::open(&path).expect("open");
        assert!(path.exists());
        assert_eq!(store.schema_version().expect("version"), CURRENT_DB_SCHEMA_VERSION);
        assert!(store.foreign_keys_enabled().expect("pragma"));
        drop(store);

        let reopened = SqliteStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.schema_version().expect("version"),
            CURRENT_DB_SCHEMA_VERSION
        );
    }

    #[test]
    fn failed_write_rolls_back() {
        let store = SqliteStore::in_memory().expect("store");
        let result: StoreResult<()> = store.write(|tx| {
            tx.create_user(&core_types::NewUser::researcher("Temp"))?;
            Err(StoreError::not_found("slide", "forced"))
        });
        assert!(result.is_err());
        let users = store.read(|tx| tx.list_users()).expect("list");
        assert!(users.is_empty());
    }
}
