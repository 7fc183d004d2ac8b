use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::note_type::NoteType;

/// Study state of a card. Read through from the database, never computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduling {
    /// 0=new, 1=learning, 2=review, 3=relearning
    pub card_type: i64,
    /// -1=suspended, 0=new, 1=learning, 2=review, 3=day learn/relearn
    pub queue: i64,
    pub due: i64,
    pub reps: i64,
    pub lapses: i64,
    pub factor: i64,
}

/// One schedulable study item, tied to a note and a template ordinal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    pub template_ordinal: u32,
    pub deck_name: String,
    pub fields: Vec<String>,
    pub tags: Vec<String>,

    #[serde(skip)]
    pub model: Option<Arc<NoteType>>,

    #[serde(default)]
    pub scheduling: Scheduling,
}

impl Card {
    pub fn new(id: i64, deck_name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            id,
            note_id: None,
            guid: None,
            template_ordinal: 0,
            deck_name: deck_name.into(),
            fields,
            tags: Vec::new(),
            model: None,
            scheduling: Scheduling::default(),
        }
    }

    pub fn with_note(mut self, note_id: i64, template_ordinal: u32) -> Self {
        self.note_id = Some(note_id);
        self.template_ordinal = template_ordinal;
        self
    }

    pub fn with_model(mut self, model: Arc<NoteType>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Compact study-status row for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardStatus {
    pub id: i64,
    pub deck_name: String,
    #[serde(flatten)]
    pub scheduling: Scheduling,
}
