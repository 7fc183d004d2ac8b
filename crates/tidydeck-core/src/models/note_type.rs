use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TidyDeckError};

/// One field declaration of a note type, in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ord: u32,
}

/// One card-generation template of a note type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTemplate {
    pub name: String,
    pub ord: u32,
    pub qfmt: String,
    pub afmt: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteTypeKind {
    #[default]
    Standard,
    Cloze,
}

/// A note type ("model"): field layout, templates and styling.
///
/// `raw` holds the JSON definition exactly as it was read so the writer can
/// emit it back untouched apart from the keys it has to own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteType {
    pub id: i64,
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub templates: Vec<CardTemplate>,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub kind: NoteTypeKind,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Deserialize)]
struct RawField {
    name: String,
    #[serde(default)]
    ord: Option<u32>,
}

#[derive(Deserialize)]
struct RawTemplate {
    name: String,
    #[serde(default)]
    ord: Option<u32>,
    #[serde(default)]
    qfmt: String,
    #[serde(default)]
    afmt: String,
}

#[derive(Deserialize)]
struct RawNoteType {
    name: String,
    #[serde(default)]
    flds: Vec<RawField>,
    #[serde(default)]
    tmpls: Vec<RawTemplate>,
    #[serde(default)]
    css: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<i64>,
}

impl NoteType {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            templates: Vec::new(),
            css: String::new(),
            kind: NoteTypeKind::Standard,
            raw: Value::Null,
        }
    }

    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = names
            .into_iter()
            .enumerate()
            .map(|(ord, name)| FieldDef {
                name: name.into(),
                ord: ord as u32,
            })
            .collect();
        self
    }

    pub fn with_template(
        mut self,
        name: impl Into<String>,
        qfmt: impl Into<String>,
        afmt: impl Into<String>,
    ) -> Self {
        let ord = self.templates.len() as u32;
        self.templates.push(CardTemplate {
            name: name.into(),
            ord,
            qfmt: qfmt.into(),
            afmt: afmt.into(),
        });
        self
    }

    pub fn with_css(mut self, css: impl Into<String>) -> Self {
        self.css = css.into();
        self
    }

    pub fn with_kind(mut self, kind: NoteTypeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Decode one entry of the `col.models` JSON object.
    pub fn from_json(id: i64, value: Value) -> Result<Self> {
        let parsed: RawNoteType = serde_json::from_value(value.clone()).map_err(|e| {
            TidyDeckError::CorruptSchema(format!("note type {id}: {e}"))
        })?;

        let fields = parsed
            .flds
            .into_iter()
            .enumerate()
            .map(|(idx, f)| FieldDef {
                name: f.name,
                ord: f.ord.unwrap_or(idx as u32),
            })
            .collect();

        let templates = parsed
            .tmpls
            .into_iter()
            .enumerate()
            .map(|(idx, t)| CardTemplate {
                name: t.name,
                ord: t.ord.unwrap_or(idx as u32),
                qfmt: t.qfmt,
                afmt: t.afmt,
            })
            .collect();

        let kind = match parsed.kind {
            Some(1) => NoteTypeKind::Cloze,
            _ => NoteTypeKind::Standard,
        };

        Ok(Self {
            id,
            name: parsed.name,
            fields,
            templates,
            css: parsed.css.unwrap_or_default(),
            kind,
            raw: value,
        })
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Pad with empty strings or truncate so the values match the declared
    /// field count.
    pub fn fit_fields(&self, values: &[String]) -> Vec<String> {
        let expected = self.field_count();
        let mut fitted: Vec<String> = values.iter().take(expected).cloned().collect();
        fitted.resize(expected, String::new());
        fitted
    }
}

impl PartialEq for NoteType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NoteType {}
