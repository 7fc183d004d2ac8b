//! Read-only access to the user's live collection.

pub mod connection;
pub mod queries;

use std::path::Path;

use rusqlite::Connection;

pub use connection::{CollectionConnection, register_collations, unicase_compare, unicase_key};
pub use queries::{CardQuery, DeckQuery, NoteQuery, TemplateQuery};

use crate::config::AppConfig;
use crate::error::Result;
use crate::models::{Card, CardStatus, Deck, Note, TemplateContent, TemplateInfo};
use crate::package::{ModelMap, attach_models, load_note_decks};

/// Which cards or notes a deck filter selects.
enum DeckScope {
    All,
    Deck(i64),
    /// A deck name that does not exist; selects nothing.
    Missing,
}

impl DeckScope {
    fn id(&self) -> Option<i64> {
        match self {
            DeckScope::Deck(id) => Some(*id),
            _ => None,
        }
    }
}

pub struct Collection {
    pool: CollectionConnection,
}

impl Collection {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            pool: CollectionConnection::open(path)?,
        })
    }

    /// Open the collection the configuration resolves to, or `None` when
    /// there is none.
    pub fn open_configured(config: &AppConfig) -> Result<Option<Self>> {
        match config.collection_path() {
            Some(path) => Ok(Some(Self::open(&path)?)),
            None => Ok(None),
        }
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        Ok(Self {
            pool: CollectionConnection::from_connection(conn)?,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.pool.path()
    }

    fn scope(conn: &Connection, deck: Option<&str>) -> Result<DeckScope> {
        let Some(name) = deck else {
            return Ok(DeckScope::All);
        };
        Ok(match DeckQuery::new(conn).find_id(name)? {
            Some(id) => DeckScope::Deck(id),
            None => DeckScope::Missing,
        })
    }

    pub fn decks(&self) -> Result<Vec<Deck>> {
        let conn = self.pool.get_connection();
        DeckQuery::new(&conn).list()
    }

    pub fn deck_id(&self, name: &str) -> Result<Option<i64>> {
        let conn = self.pool.get_connection();
        DeckQuery::new(&conn).find_id(name)
    }

    pub fn note_types(&self) -> Result<ModelMap> {
        let conn = self.pool.get_connection();
        TemplateQuery::new(&conn).note_types()
    }

    pub fn note_count(&self) -> Result<usize> {
        let conn = self.pool.get_connection();
        NoteQuery::new(&conn).count()
    }

    /// Notes with their note types attached. With a deck filter, every note
    /// is tagged with that deck; otherwise with the deck of its first card.
    pub fn notes(&self, deck: Option<&str>) -> Result<Vec<Note>> {
        let conn = self.pool.get_connection();
        let scope = Self::scope(&conn, deck)?;
        if let DeckScope::Missing = scope {
            return Ok(Vec::new());
        }

        let models = TemplateQuery::new(&conn).note_types()?;
        let mut notes = NoteQuery::new(&conn).notes(scope.id())?;
        attach_models(&mut notes, &models);

        match deck {
            Some(name) => {
                for note in &mut notes {
                    note.deck_name = Some(name.to_string());
                }
            }
            None => {
                let names = DeckQuery::new(&conn).names()?;
                let note_decks = load_note_decks(&conn, &names)?;
                for note in &mut notes {
                    note.deck_name = note_decks.get(&note.id).cloned();
                }
            }
        }
        Ok(notes)
    }

    /// Cards ordered by id, with note types attached.
    pub fn cards(&self, deck: Option<&str>, limit: Option<usize>) -> Result<Vec<Card>> {
        let conn = self.pool.get_connection();
        let scope = Self::scope(&conn, deck)?;
        if let DeckScope::Missing = scope {
            return Ok(Vec::new());
        }
        let rows = CardQuery::new(&conn).cards(scope.id(), limit)?;
        Self::build_cards(&conn, rows)
    }

    /// Cards whose fields contain `query`.
    pub fn search(&self, query: &str, deck: Option<&str>, limit: Option<usize>) -> Result<Vec<Card>> {
        let conn = self.pool.get_connection();
        let scope = Self::scope(&conn, deck)?;
        if let DeckScope::Missing = scope {
            return Ok(Vec::new());
        }
        let rows = CardQuery::new(&conn).search(query, scope.id(), limit)?;
        Self::build_cards(&conn, rows)
    }

    fn build_cards(
        conn: &Connection,
        rows: Vec<crate::package::schema::CardRow>,
    ) -> Result<Vec<Card>> {
        let names = DeckQuery::new(conn).names()?;
        let models = TemplateQuery::new(conn).note_types()?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let deck_name = names.get(&row.did).cloned().unwrap_or_default();
                let model = models.get(&row.mid).cloned();
                row.into_card(deck_name, model)
            })
            .collect())
    }

    /// Study status ordered by due position.
    pub fn card_status(&self, deck: Option<&str>, limit: Option<usize>) -> Result<Vec<CardStatus>> {
        let conn = self.pool.get_connection();
        let scope = Self::scope(&conn, deck)?;
        if let DeckScope::Missing = scope {
            return Ok(Vec::new());
        }
        let names = DeckQuery::new(&conn).names()?;
        let rows = CardQuery::new(&conn).status(scope.id(), limit)?;
        Ok(rows
            .into_iter()
            .map(|row| CardStatus {
                id: row.id,
                deck_name: names.get(&row.did).cloned().unwrap_or_default(),
                scheduling: row.scheduling,
            })
            .collect())
    }

    pub fn templates(&self) -> Result<Vec<TemplateInfo>> {
        let conn = self.pool.get_connection();
        TemplateQuery::new(&conn).list()
    }

    pub fn template_content(
        &self,
        notetype_name: &str,
        template_name: &str,
    ) -> Result<Option<TemplateContent>> {
        let conn = self.pool.get_connection();
        TemplateQuery::new(&conn).content(notetype_name, template_name)
    }
}
