mod cards;
mod decks;
mod notes;
mod templates;

pub use cards::CardQuery;
pub use decks::DeckQuery;
pub use notes::NoteQuery;
pub use templates::TemplateQuery;

/// SQLite treats a negative LIMIT as "no limit".
pub(crate) fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|n| n as i64).unwrap_or(-1)
}
