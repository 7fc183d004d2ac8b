use rusqlite::Connection;

use crate::error::Result;
use crate::models::Note;
use crate::package::load_notes;
use crate::package::schema::NoteRow;

pub struct NoteQuery<'a> {
    conn: &'a Connection,
}

impl<'a> NoteQuery<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Notes ordered by id, limited to notes with a card in `deck_id` when
    /// one is given.
    pub fn notes(&self, deck_id: Option<i64>) -> Result<Vec<Note>> {
        let Some(deck_id) = deck_id else {
            return load_notes(self.conn);
        };

        let sql = format!(
            "SELECT DISTINCT {} FROM notes n
             JOIN cards c ON c.nid = n.id
             WHERE c.did = ?1
             ORDER BY n.id",
            NoteRow::COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let notes = stmt
            .query_map([deck_id], NoteRow::from_row)?
            .map(|row| row.map(NoteRow::into_note))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
