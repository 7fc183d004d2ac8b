use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::collection::connection::has_table;
use crate::error::Result;
use crate::models::{CardTemplate, FieldDef, NoteType, NoteTypeKind, TemplateContent, TemplateInfo};
use crate::package::{ModelMap, load_models};
use crate::template_config::decode_template_config;

/// Leading bytes of a `notetypes.config` blob whose kind is cloze.
const CLOZE_KIND_PREFIX: [u8; 2] = [0x08, 0x01];

/// Note type and template reads. Collections with `notetypes` / `templates`
/// tables are read from those; older ones from the `col.models` JSON.
pub struct TemplateQuery<'a> {
    conn: &'a Connection,
}

impl<'a> TemplateQuery<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn has_template_tables(&self) -> Result<bool> {
        Ok(has_table(self.conn, "notetypes")? && has_table(self.conn, "templates")?)
    }

    /// Templates ordered by note type name, then ordinal.
    pub fn list(&self) -> Result<Vec<TemplateInfo>> {
        if self.has_template_tables()? {
            let mut stmt = self.conn.prepare(
                "SELECT t.name, nt.name, nt.id
                 FROM templates t
                 JOIN notetypes nt ON t.ntid = nt.id
                 ORDER BY nt.name, t.ord",
            )?;
            let templates = stmt
                .query_map([], |row| {
                    Ok(TemplateInfo {
                        name: row.get(0)?,
                        notetype_name: row.get(1)?,
                        notetype_id: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            return Ok(templates);
        }

        let mut models: Vec<Arc<NoteType>> = load_models(self.conn)?.into_values().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models
            .iter()
            .flat_map(|model| {
                let mut templates: Vec<&CardTemplate> = model.templates.iter().collect();
                templates.sort_by_key(|t| t.ord);
                templates
                    .into_iter()
                    .map(|t| TemplateInfo {
                        name: t.name.clone(),
                        notetype_name: model.name.clone(),
                        notetype_id: model.id,
                    })
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    /// HTML of one template, or `None` if no such template exists.
    pub fn content(
        &self,
        notetype_name: &str,
        template_name: &str,
    ) -> Result<Option<TemplateContent>> {
        if self.has_template_tables()? {
            let row = self
                .conn
                .query_row(
                    "SELECT t.name, nt.name, t.config
                     FROM templates t
                     JOIN notetypes nt ON t.ntid = nt.id
                     WHERE t.name = ?1 AND nt.name = ?2",
                    [template_name, notetype_name],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    },
                )
                .optional()?;

            return Ok(row.map(|(name, notetype_name, config)| {
                let sections = decode_template_config(&config).into_sections();
                TemplateContent {
                    name,
                    notetype_name,
                    front_html: sections.front_html,
                    back_html: sections.back_html,
                    browser_question: sections.browser_question,
                }
            }));
        }

        let models = load_models(self.conn)?;
        let found = models
            .values()
            .filter(|model| model.name == notetype_name)
            .find_map(|model| {
                let template = model.templates.iter().find(|t| t.name == template_name)?;
                Some(TemplateContent {
                    name: template.name.clone(),
                    notetype_name: model.name.clone(),
                    front_html: template.qfmt.clone(),
                    back_html: template.afmt.clone(),
                    browser_question: legacy_browser_question(model, template.ord),
                })
            });
        Ok(found)
    }

    /// Every note type keyed by id.
    pub fn note_types(&self) -> Result<ModelMap> {
        let modern = self.has_template_tables()?;
        match load_models(self.conn) {
            Ok(models) if !models.is_empty() || !modern => Ok(models),
            Err(e) if !modern => Err(e),
            _ => self.note_types_from_tables(),
        }
    }

    fn note_types_from_tables(&self) -> Result<ModelMap> {
        let mut types: BTreeMap<i64, NoteType> = BTreeMap::new();

        let mut stmt = self.conn.prepare("SELECT id, name, config FROM notetypes")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
            ))
        })?;
        for row in rows {
            let (id, name, config) = row?;
            let kind = if config.starts_with(&CLOZE_KIND_PREFIX) {
                NoteTypeKind::Cloze
            } else {
                NoteTypeKind::Standard
            };
            types.insert(id, NoteType::new(id, name).with_kind(kind));
        }

        if has_table(self.conn, "fields")? {
            let mut stmt = self
                .conn
                .prepare("SELECT ntid, ord, name FROM fields ORDER BY ntid, ord")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (ntid, ord, name) = row?;
                if let Some(note_type) = types.get_mut(&ntid) {
                    note_type.fields.push(FieldDef { name, ord });
                }
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT ntid, ord, name, config FROM templates ORDER BY ntid, ord")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?.unwrap_or_default(),
            ))
        })?;
        for row in rows {
            let (ntid, ord, name, config) = row?;
            let decoded = decode_template_config(&config);
            if !decoded.is_complete() {
                debug!("template {name} of note type {ntid}: {:?}", decoded.status);
            }
            let sections = decoded.into_sections();
            if let Some(note_type) = types.get_mut(&ntid) {
                note_type.templates.push(CardTemplate {
                    name,
                    ord,
                    qfmt: sections.front_html,
                    afmt: sections.back_html,
                });
            }
        }

        Ok(types
            .into_iter()
            .map(|(id, note_type)| (id, Arc::new(note_type)))
            .collect())
    }
}

fn legacy_browser_question(model: &NoteType, ord: u32) -> String {
    model
        .raw
        .get("tmpls")
        .and_then(Value::as_array)
        .and_then(|tmpls| {
            tmpls
                .iter()
                .find(|t| t.get("ord").and_then(Value::as_u64) == Some(u64::from(ord)))
        })
        .and_then(|t| t.get("bqfmt"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
