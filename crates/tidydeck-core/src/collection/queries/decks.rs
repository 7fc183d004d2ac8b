use std::collections::{BTreeMap, HashMap};

use rusqlite::{Connection, OptionalExtension};

use crate::collection::connection::{has_table, unicase_key};
use crate::error::Result;
use crate::models::{Deck, deck_name_to_external, deck_name_to_internal};
use crate::package::load_deck_names;

/// Deck reads. Uses the `decks` table when the collection has one and the
/// `col.decks` JSON otherwise.
pub struct DeckQuery<'a> {
    conn: &'a Connection,
}

impl<'a> DeckQuery<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// All decks with card counts, ordered case- and accent-insensitively.
    pub fn list(&self) -> Result<Vec<Deck>> {
        if has_table(self.conn, "decks")? {
            let mut stmt = self.conn.prepare(
                "SELECT d.id, d.name, COUNT(c.id)
                 FROM decks d
                 LEFT JOIN cards c ON c.did = d.id
                 GROUP BY d.id, d.name
                 ORDER BY d.name COLLATE unicase",
            )?;
            let decks = stmt
                .query_map([], |row| {
                    Ok(Deck {
                        id: row.get(0)?,
                        name: deck_name_to_external(&row.get::<_, String>(1)?),
                        card_count: row.get::<_, i64>(2)? as u32,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            return Ok(decks);
        }

        let counts = self.card_counts()?;
        let mut decks: Vec<Deck> = load_deck_names(self.conn)?
            .into_iter()
            .map(|(id, name)| Deck {
                id,
                card_count: counts.get(&id).copied().unwrap_or(0),
                name,
            })
            .collect();
        decks.sort_by_cached_key(|deck| unicase_key(&deck.name));
        Ok(decks)
    }

    /// Deck id → display name.
    pub fn names(&self) -> Result<BTreeMap<i64, String>> {
        if !has_table(self.conn, "decks")? {
            return load_deck_names(self.conn);
        }
        let mut stmt = self.conn.prepare("SELECT id, name FROM decks")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut names = BTreeMap::new();
        for row in rows {
            let (id, name) = row?;
            names.insert(id, deck_name_to_external(&name));
        }
        Ok(names)
    }

    /// Id of the deck with this display name.
    pub fn find_id(&self, name: &str) -> Result<Option<i64>> {
        if has_table(self.conn, "decks")? {
            let id = self
                .conn
                .query_row(
                    "SELECT id FROM decks WHERE name = ?1",
                    [deck_name_to_internal(name)],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(id);
        }

        Ok(load_deck_names(self.conn)?
            .into_iter()
            .find(|(_, deck)| deck == name)
            .map(|(id, _)| id))
    }

    fn card_counts(&self) -> Result<HashMap<i64, u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT did, COUNT(*) FROM cards GROUP BY did")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u32))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }
}
