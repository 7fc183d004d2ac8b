use rusqlite::{Connection, params};

use super::sql_limit;
use crate::error::Result;
use crate::models::Scheduling;
use crate::package::schema::CardRow;

/// Study-status row: card id, deck id and scheduling state.
pub(crate) struct StatusRow {
    pub id: i64,
    pub did: i64,
    pub scheduling: Scheduling,
}

pub struct CardQuery<'a> {
    conn: &'a Connection,
}

impl<'a> CardQuery<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn cards(&self, deck_id: Option<i64>, limit: Option<usize>) -> Result<Vec<CardRow>> {
        let sql = format!(
            "SELECT {} FROM cards c
             JOIN notes n ON c.nid = n.id
             WHERE (?1 IS NULL OR c.did = ?1)
             ORDER BY c.id
             LIMIT ?2",
            CardRow::COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![deck_id, sql_limit(limit)], CardRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Cards whose note fields contain `query` (ASCII case-insensitive).
    pub(crate) fn search(
        &self,
        query: &str,
        deck_id: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<CardRow>> {
        let sql = format!(
            "SELECT {} FROM notes n
             JOIN cards c ON c.nid = n.id
             WHERE n.flds LIKE ?1 AND (?2 IS NULL OR c.did = ?2)
             ORDER BY c.id
             LIMIT ?3",
            CardRow::COLUMNS
        );
        let pattern = format!("%{query}%");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![pattern, deck_id, sql_limit(limit)], CardRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Scheduling state ordered by due position.
    pub(crate) fn status(&self, deck_id: Option<i64>, limit: Option<usize>) -> Result<Vec<StatusRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.did, c.type, c.queue, c.due, c.reps, c.lapses, c.factor
             FROM cards c
             WHERE (?1 IS NULL OR c.did = ?1)
             ORDER BY c.due, c.id
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![deck_id, sql_limit(limit)], |row| {
                Ok(StatusRow {
                    id: row.get(0)?,
                    did: row.get(1)?,
                    scheduling: Scheduling {
                        card_type: row.get(2)?,
                        queue: row.get(3)?,
                        due: row.get(4)?,
                        reps: row.get(5)?,
                        lapses: row.get(6)?,
                        factor: row.get(7)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
