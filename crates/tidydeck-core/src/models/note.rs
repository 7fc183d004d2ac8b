use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::note_type::NoteType;

/// Separator between field values inside `notes.flds`.
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// A media payload referenced from note fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl MediaFile {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }
}

/// A note: the content unit that generates one or more cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub guid: String,
    pub model_id: i64,
    pub fields: Vec<String>,
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deck_name: Option<String>,

    #[serde(skip)]
    pub model: Option<Arc<NoteType>>,

    #[serde(skip)]
    pub media: Vec<Arc<MediaFile>>,
}

impl Note {
    pub fn new(id: i64, guid: impl Into<String>, model_id: i64, fields: Vec<String>) -> Self {
        Self {
            id,
            guid: guid.into(),
            model_id,
            fields,
            tags: Vec::new(),
            deck_name: None,
            model: None,
            media: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_deck(mut self, deck_name: impl Into<String>) -> Self {
        self.deck_name = Some(deck_name.into());
        self
    }

    pub fn with_model(mut self, model: Arc<NoteType>) -> Self {
        self.model_id = model.id;
        self.model = Some(model);
        self
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn in_deck(&self, deck_name: &str) -> bool {
        self.deck_name.as_deref() == Some(deck_name)
    }
}

pub fn split_fields(flds: &str) -> Vec<String> {
    flds.split(FIELD_SEPARATOR).map(str::to_string).collect()
}

pub fn join_fields(fields: &[String]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(FIELD_SEPARATOR);
        }
        out.push_str(field);
    }
    out
}

pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split_whitespace().map(str::to_string).collect()
}

/// Anki stores tags space-separated with a leading and trailing space.
pub fn join_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!(" {} ", tags.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fields_keeps_empty_values() {
        let fields = split_fields("front\u{1f}\u{1f}back");
        assert_eq!(fields, vec!["front", "", "back"]);
        assert_eq!(join_fields(&fields), "front\u{1f}\u{1f}back");
    }

    #[test]
    fn test_split_tags_on_whitespace() {
        assert_eq!(split_tags(" vocab  jlpt::n3 "), vec!["vocab", "jlpt::n3"]);
        assert!(split_tags("").is_empty());
        assert_eq!(join_tags(&["a".to_string(), "b".to_string()]), " a b ");
        assert_eq!(join_tags(&[]), "");
    }

    #[test]
    fn test_note_field_access() {
        let note = Note::new(1, "g", 2, vec!["a".into()]).with_deck("Japanese::Core");
        assert_eq!(note.field(0), Some("a"));
        assert_eq!(note.field(1), None);
        assert!(note.in_deck("Japanese::Core"));
        assert!(!note.in_deck("Japanese"));
    }
}
