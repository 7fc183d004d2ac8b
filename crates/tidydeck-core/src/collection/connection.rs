use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use deunicode::deunicode;
use rusqlite::{Connection, OpenFlags};

use crate::error::{Result, TidyDeckError};

/// Read-only handle on a live collection database.
pub struct CollectionConnection {
    path: Option<PathBuf>,
    connection: Mutex<Connection>,
}

impl CollectionConnection {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(TidyDeckError::NotFound(format!(
                "collection not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        register_collations(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            connection: Mutex::new(conn),
        })
    }

    /// Wrap an already open connection, e.g. an in-memory fixture.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        register_collations(&conn)?;
        Ok(Self {
            path: None,
            connection: Mutex::new(conn),
        })
    }

    pub fn get_connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Anki orders deck names with a `unicase` collation that has to exist on the
/// connection before such queries can run.
pub fn register_collations(conn: &Connection) -> Result<()> {
    conn.create_collation("unicase", unicase_compare)?;
    Ok(())
}

pub fn unicase_compare(a: &str, b: &str) -> Ordering {
    unicase_key(a).cmp(&unicase_key(b))
}

/// Transliterated to ASCII, then lowercased.
pub fn unicase_key(text: &str) -> String {
    deunicode(text).to_lowercase()
}

pub(crate) fn has_table(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
