//! Decoding of the collection schema shared by packages and live collections:
//! the JSON metadata in `col` and the `notes` / `cards` rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, TidyDeckError};
use crate::models::{
    Card, Note, NoteType, Scheduling, deck_name_to_external, split_fields, split_tags,
};

/// Note types keyed by id, shared between the notes and cards that use them.
pub type ModelMap = BTreeMap<i64, Arc<NoteType>>;

/// `notes` row, decoded positionally.
pub(crate) struct NoteRow {
    pub id: i64,
    pub guid: String,
    pub mid: i64,
    pub flds: String,
    pub tags: String,
}

impl NoteRow {
    pub const COLUMNS: &'static str = "n.id, n.guid, n.mid, n.flds, n.tags";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            guid: row.get(1)?,
            mid: row.get(2)?,
            flds: row.get(3)?,
            tags: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        })
    }

    pub fn into_note(self) -> Note {
        Note::new(self.id, self.guid, self.mid, split_fields(&self.flds))
            .with_tags(split_tags(&self.tags))
    }
}

/// `cards` joined with `notes`, decoded positionally.
pub(crate) struct CardRow {
    pub id: i64,
    pub nid: i64,
    pub did: i64,
    pub ord: u32,
    pub scheduling: Scheduling,
    pub guid: String,
    pub mid: i64,
    pub flds: String,
    pub tags: String,
}

impl CardRow {
    pub const COLUMNS: &'static str = "c.id, c.nid, c.did, c.ord, c.type, c.queue, c.due, \
         c.reps, c.lapses, c.factor, n.guid, n.mid, n.flds, n.tags";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            nid: row.get(1)?,
            did: row.get(2)?,
            ord: row.get(3)?,
            scheduling: Scheduling {
                card_type: row.get(4)?,
                queue: row.get(5)?,
                due: row.get(6)?,
                reps: row.get(7)?,
                lapses: row.get(8)?,
                factor: row.get(9)?,
            },
            guid: row.get(10)?,
            mid: row.get(11)?,
            flds: row.get(12)?,
            tags: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        })
    }

    pub fn into_card(self, deck_name: String, model: Option<Arc<NoteType>>) -> Card {
        let mut card = Card::new(self.id, deck_name, split_fields(&self.flds))
            .with_note(self.nid, self.ord)
            .with_tags(split_tags(&self.tags));
        card.guid = Some(self.guid);
        card.model = model;
        card.scheduling = self.scheduling;
        card
    }
}

/// Read one JSON column of the single `col` row.
fn read_col_json(conn: &Connection, column: &str) -> Result<Value> {
    let sql = format!("SELECT {column} FROM col LIMIT 1");
    let raw: Option<Option<String>> = conn
        .query_row(&sql, [], |row| row.get(0))
        .optional()
        .map_err(|e| TidyDeckError::CorruptSchema(format!("col.{column}: {e}")))?;

    let text = raw
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TidyDeckError::CorruptSchema(format!("col.{column} is empty")))?;

    serde_json::from_str(&text)
        .map_err(|e| TidyDeckError::CorruptSchema(format!("col.{column}: {e}")))
}

fn parse_id(key: &str, what: &str) -> Result<i64> {
    key.parse()
        .map_err(|_| TidyDeckError::CorruptSchema(format!("{what} id is not numeric: {key}")))
}

/// All note types from `col.models`.
pub fn load_models(conn: &Connection) -> Result<ModelMap> {
    let Value::Object(entries) = read_col_json(conn, "models")? else {
        return Err(TidyDeckError::CorruptSchema(
            "col.models is not a JSON object".to_string(),
        ));
    };

    let mut models = BTreeMap::new();
    for (key, value) in entries {
        let id = parse_id(&key, "note type")?;
        models.insert(id, Arc::new(NoteType::from_json(id, value)?));
    }
    Ok(models)
}

/// Deck id → deck name (`::` notation) from `col.decks`.
pub fn load_deck_names(conn: &Connection) -> Result<BTreeMap<i64, String>> {
    let Value::Object(entries) = read_col_json(conn, "decks")? else {
        return Err(TidyDeckError::CorruptSchema(
            "col.decks is not a JSON object".to_string(),
        ));
    };

    let mut decks = BTreeMap::new();
    for (key, value) in entries {
        let id = parse_id(&key, "deck")?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| TidyDeckError::CorruptSchema(format!("deck {id} has no name")))?;
        decks.insert(id, deck_name_to_external(name));
    }
    Ok(decks)
}

pub fn load_notes(conn: &Connection) -> Result<Vec<Note>> {
    let sql = format!("SELECT {} FROM notes n ORDER BY n.id", NoteRow::COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let notes = stmt
        .query_map([], NoteRow::from_row)?
        .map(|row| row.map(NoteRow::into_note))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(notes)
}

pub fn load_cards(
    conn: &Connection,
    models: &ModelMap,
    decks: &BTreeMap<i64, String>,
) -> Result<Vec<Card>> {
    let sql = format!(
        "SELECT {} FROM cards c JOIN notes n ON c.nid = n.id ORDER BY c.id",
        CardRow::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], CardRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let cards = rows
        .into_iter()
        .map(|row| {
            let deck_name = decks.get(&row.did).cloned().unwrap_or_default();
            let model = models.get(&row.mid).cloned();
            if model.is_none() {
                warn!("card {} uses unknown note type {}", row.id, row.mid);
            }
            row.into_card(deck_name, model)
        })
        .collect();
    Ok(cards)
}

/// Deck of the first card of each note.
pub fn load_note_decks(
    conn: &Connection,
    decks: &BTreeMap<i64, String>,
) -> Result<HashMap<i64, String>> {
    let mut stmt = conn.prepare("SELECT nid, did FROM cards ORDER BY id")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

    let mut note_decks = HashMap::new();
    for row in rows {
        let (nid, did) = row?;
        if let Some(name) = decks.get(&did) {
            note_decks.entry(nid).or_insert_with(|| name.clone());
        }
    }
    Ok(note_decks)
}

/// Attach shared note types to notes by `mid`, logging notes whose type is
/// missing.
pub fn attach_models(notes: &mut [Note], models: &ModelMap) {
    for note in notes.iter_mut() {
        match models.get(&note.model_id) {
            Some(model) => note.model = Some(Arc::clone(model)),
            None => warn!("note {} uses unknown note type {}", note.id, note.model_id),
        }
    }
}
