use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::apkg_schema::{APKG_SCHEMA, SCHEMA_VERSION};
use super::archive::{DATABASE_ENTRY, MEDIA_ENTRY};
use crate::dedup::strip_html;
use crate::error::{Result, TidyDeckError};
use crate::models::{Card, MediaFile, Note, NoteType, NoteTypeKind, join_fields, join_tags};

pub const BASIC_MODEL_ID: i64 = 1_607_392_319;
pub const VOCAB_MODEL_ID: i64 = 1_607_392_320;

/// Plain cards with at least this many fields use the vocabulary model.
const VOCAB_FIELD_COUNT: usize = 7;
const DEFAULT_DECK_ID: i64 = 1;
const DEFAULT_DECK_NAME: &str = "Default";
const MEDIA_STAGING_DIR: &str = "media";

const DEFAULT_CSS: &str = ".card {\n font-family: arial;\n font-size: 20px;\n text-align: center;\n color: black;\n background-color: white;\n}\n";
const LATEX_PRE: &str = "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n";
const LATEX_POST: &str = "\\end{document}";

static FIELD_REF_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());
static CLOZE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{c(\d+)::").unwrap());

/// Summary of a written package.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub deck_path: PathBuf,
    pub notes_created: usize,
    pub cards_created: usize,
    pub message: String,
}

/// One vocabulary note to create from scratch.
#[derive(Debug, Clone, Default)]
pub struct VocabCardRequest {
    pub term: String,
    pub reading: String,
    pub meaning: String,
    pub example: String,
    pub example_translation: String,
    pub term_audio: Option<PathBuf>,
    pub meaning_audio: Option<PathBuf>,
    pub tags: Vec<String>,
}

impl VocabCardRequest {
    pub fn new(term: impl Into<String>, meaning: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            meaning: meaning.into(),
            ..Self::default()
        }
    }

    pub fn with_reading(mut self, reading: impl Into<String>) -> Self {
        self.reading = reading.into();
        self
    }

    pub fn with_example(
        mut self,
        example: impl Into<String>,
        translation: impl Into<String>,
    ) -> Self {
        self.example = example.into();
        self.example_translation = translation.into();
        self
    }

    pub fn with_term_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.term_audio = Some(path.into());
        self
    }

    pub fn with_meaning_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.meaning_audio = Some(path.into());
        self
    }
}

// ─── Built-in note types ────────────────────────────────────

pub fn basic_model() -> NoteType {
    NoteType::new(BASIC_MODEL_ID, "Basic")
        .with_fields(["Front", "Back"])
        .with_template("Card 1", "{{Front}}", "{{FrontSide}}<hr id=answer>{{Back}}")
        .with_css(DEFAULT_CSS)
}

pub fn vocab_model() -> NoteType {
    NoteType::new(VOCAB_MODEL_ID, "Vocabulary")
        .with_fields([
            "Term",
            "Reading",
            "Meaning",
            "Example",
            "ExampleTranslation",
            "TermAudio",
            "MeaningAudio",
        ])
        .with_template(
            "Recognition",
            "<div class=\"term\">{{Term}}</div>{{TermAudio}}",
            "{{FrontSide}}<hr id=answer>\
             <div class=\"reading\">{{Reading}}</div>\
             <div class=\"meaning\">{{Meaning}}</div>{{MeaningAudio}}\
             <div class=\"example\">{{Example}}</div>\
             <div class=\"translation\">{{ExampleTranslation}}</div>",
        )
        .with_css(DEFAULT_CSS)
}

// ─── Identifiers ────────────────────────────────────────────

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Stable deck id for a deck name. Kept below 2^53 so JSON readers keep it
/// exact.
pub fn deck_id_for(deck_name: &str) -> i64 {
    let digest = Sha256::digest(deck_name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) >> 12) as i64 + (1 << 32)
}

fn derived_guid<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update([0x1f]);
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn field_checksum(text: &str) -> i64 {
    let digest = Sha256::digest(text.as_bytes());
    i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

pub fn output_file_name(deck_name: &str, suffix: &str) -> String {
    format!("{}{suffix}.apkg", deck_name.replace(' ', "_"))
}

/// `<temp dir>/<deck name with spaces as _><suffix>.apkg`
pub fn default_output_path(deck_name: &str, suffix: &str) -> PathBuf {
    std::env::temp_dir().join(output_file_name(deck_name, suffix))
}

fn resolve_output(deck_name: &str, output: Option<&Path>, suffix: &str) -> PathBuf {
    output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(deck_name, suffix))
}

// ─── Card generation ────────────────────────────────────────

/// Field names a template refers to, ignoring section markers, filters and
/// `FrontSide`.
fn referenced_fields(format: &str) -> BTreeSet<String> {
    FIELD_REF_REGEX
        .captures_iter(format)
        .filter_map(|caps| {
            let inner = caps[1].trim().trim_start_matches(['#', '^', '/']);
            let name = inner.rsplit(':').next().unwrap_or(inner).trim();
            (!name.is_empty() && name != "FrontSide").then(|| name.to_string())
        })
        .collect()
}

/// Template ordinals a note would generate cards for.
pub fn generated_ordinals(model: &NoteType, fields: &[String]) -> Vec<u32> {
    match model.kind {
        NoteTypeKind::Cloze => {
            let numbers: BTreeSet<u32> = fields
                .iter()
                .flat_map(|field| {
                    CLOZE_REGEX
                        .captures_iter(field)
                        .filter_map(|caps| caps[1].parse::<u32>().ok())
                })
                .filter(|n| *n > 0)
                .map(|n| n - 1)
                .collect();
            if numbers.is_empty() {
                vec![0]
            } else {
                numbers.into_iter().collect()
            }
        }
        NoteTypeKind::Standard => {
            let ordinals: Vec<u32> = model
                .templates
                .iter()
                .filter(|template| {
                    referenced_fields(&template.qfmt).iter().any(|name| {
                        model
                            .fields
                            .iter()
                            .position(|f| &f.name == name)
                            .and_then(|idx| fields.get(idx))
                            .is_some_and(|value| !value.trim().is_empty())
                    })
                })
                .map(|template| template.ord)
                .collect();

            if ordinals.is_empty() {
                debug!("note of type {} has no non-empty question; using first template", model.name);
                model.templates.first().map(|t| vec![t.ord]).unwrap_or_default()
            } else {
                ordinals
            }
        }
    }
}

/// Cards of one source note, merged for export.
#[derive(Debug)]
struct NoteGroup {
    model: Arc<NoteType>,
    guid: String,
    fields: Vec<String>,
    tags: Vec<String>,
    ordinals: Vec<u32>,
}

/// Group cards by note id in first-seen order. The first card of a note
/// supplies its fields and tags.
fn group_cards_by_note(cards: &[Card]) -> Result<Vec<NoteGroup>> {
    let mut groups: Vec<NoteGroup> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for card in cards {
        let model = card
            .model
            .clone()
            .ok_or(TidyDeckError::MissingModel { card_id: card.id })?;
        let note_id = card
            .note_id
            .ok_or(TidyDeckError::MissingNoteId { card_id: card.id })?;

        match index.get(&note_id) {
            Some(&idx) => {
                let group = &mut groups[idx];
                if !group.ordinals.contains(&card.template_ordinal) {
                    group.ordinals.push(card.template_ordinal);
                }
            }
            None => {
                index.insert(note_id, groups.len());
                groups.push(NoteGroup {
                    guid: card
                        .guid
                        .clone()
                        .unwrap_or_else(|| derived_guid(&[note_id.to_string()])),
                    fields: model.fit_fields(&card.fields),
                    tags: card.tags.clone(),
                    ordinals: vec![card.template_ordinal],
                    model,
                });
            }
        }
    }
    Ok(groups)
}

// ─── Package writer ─────────────────────────────────────────

fn deck_json(id: i64, name: &str, mtime: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "mod": mtime,
        "usn": -1,
        "desc": "",
        "dyn": 0,
        "conf": 1,
        "collapsed": false,
        "browserCollapsed": false,
        "extendNew": 0,
        "extendRev": 0,
        "newToday": [0, 0],
        "revToday": [0, 0],
        "lrnToday": [0, 0],
        "timeToday": [0, 0],
    })
}

fn deck_config_json() -> Value {
    json!({
        "id": 1,
        "name": "Default",
        "mod": 0,
        "usn": 0,
        "dyn": false,
        "maxTaken": 60,
        "timer": 0,
        "autoplay": true,
        "replayq": true,
        "new": {
            "perDay": 20,
            "delays": [1, 10],
            "ints": [1, 4, 7],
            "initialFactor": 2500,
            "order": 1,
            "bury": true,
            "separate": true,
        },
        "rev": {
            "perDay": 200,
            "ease4": 1.3,
            "fuzz": 0.05,
            "ivlFct": 1,
            "maxIvl": 36500,
            "minSpace": 1,
            "bury": true,
        },
        "lapse": {
            "delays": [10],
            "mult": 0,
            "minInt": 1,
            "leechFails": 8,
            "leechAction": 0,
        },
    })
}

/// Full legacy JSON for a note type that carries no raw definition.
fn synthesize_model_json(model: &NoteType) -> Value {
    let fields: Vec<Value> = model
        .fields
        .iter()
        .map(|f| {
            json!({
                "name": f.name,
                "ord": f.ord,
                "sticky": false,
                "rtl": false,
                "font": "Arial",
                "size": 20,
                "media": [],
            })
        })
        .collect();

    let templates: Vec<Value> = model
        .templates
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "ord": t.ord,
                "qfmt": t.qfmt,
                "afmt": t.afmt,
                "did": null,
                "bqfmt": "",
                "bafmt": "",
            })
        })
        .collect();

    let req: Vec<Value> = model
        .templates
        .iter()
        .map(|t| {
            let wanted = referenced_fields(&t.qfmt);
            let ords: Vec<u32> = model
                .fields
                .iter()
                .filter(|f| wanted.contains(&f.name))
                .map(|f| f.ord)
                .collect();
            json!([t.ord, "any", ords])
        })
        .collect();

    json!({
        "id": model.id,
        "name": model.name,
        "type": if model.kind == NoteTypeKind::Cloze { 1 } else { 0 },
        "sortf": 0,
        "flds": fields,
        "tmpls": templates,
        "css": model.css,
        "latexPre": LATEX_PRE,
        "latexPost": LATEX_POST,
        "req": req,
        "tags": [],
        "vers": [],
    })
}

/// Note type JSON for the output `col.models`: the raw definition as read,
/// with only the keys that belong to the new collection replaced.
fn model_json(model: &NoteType, deck_id: i64, mtime: i64) -> Value {
    let mut value = if model.raw.is_object() {
        model.raw.clone()
    } else {
        synthesize_model_json(model)
    };
    if let Value::Object(map) = &mut value {
        map.insert("id".into(), json!(model.id));
        map.insert("did".into(), json!(deck_id));
        map.insert("mod".into(), json!(mtime));
        map.insert("usn".into(), json!(-1));
    }
    value
}

fn sort_field_index(model: &NoteType) -> usize {
    model
        .raw
        .get("sortf")
        .and_then(Value::as_u64)
        .map(|idx| idx as usize)
        .unwrap_or(0)
}

/// Builds a package database and media bundle in a private temp directory.
struct PackageWriter {
    deck_name: String,
    deck_id: i64,
    conn: Connection,
    workdir: TempDir,
    models: BTreeMap<i64, Arc<NoteType>>,
    staged_media: Vec<(String, PathBuf)>,
    media_names: HashSet<String>,
    next_id: i64,
    mtime: i64,
    notes_written: usize,
    cards_written: usize,
}

impl PackageWriter {
    fn new(deck_name: &str) -> Result<Self> {
        let workdir = tempfile::Builder::new().prefix("tidydeck-write-").tempdir()?;
        fs::create_dir(workdir.path().join(MEDIA_STAGING_DIR))?;

        let conn = Connection::open(workdir.path().join(DATABASE_ENTRY))?;
        conn.execute_batch(APKG_SCHEMA)?;
        conn.execute_batch("BEGIN")?;

        let now = Utc::now();
        Ok(Self {
            deck_name: deck_name.to_string(),
            deck_id: if deck_name == DEFAULT_DECK_NAME {
                DEFAULT_DECK_ID
            } else {
                deck_id_for(deck_name)
            },
            conn,
            workdir,
            models: BTreeMap::new(),
            staged_media: Vec::new(),
            media_names: HashSet::new(),
            next_id: now.timestamp_millis(),
            mtime: now.timestamp(),
            notes_written: 0,
            cards_written: 0,
        })
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn add_note(
        &mut self,
        model: &Arc<NoteType>,
        guid: &str,
        fields: &[String],
        tags: &[String],
        ordinals: &[u32],
    ) -> Result<()> {
        self.models
            .entry(model.id)
            .or_insert_with(|| Arc::clone(model));

        let fields = model.fit_fields(fields);
        let sort_field = fields
            .get(sort_field_index(model))
            .map(|f| strip_html(f).into_owned())
            .unwrap_or_default();

        let note_id = self.next_id();
        self.conn.execute(
            "INSERT INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data)
             VALUES (?1, ?2, ?3, ?4, -1, ?5, ?6, ?7, ?8, 0, '')",
            params![
                note_id,
                guid,
                model.id,
                self.mtime,
                join_tags(tags),
                join_fields(&fields),
                sort_field,
                field_checksum(&sort_field),
            ],
        )?;

        let due = self.notes_written as i64 + 1;
        for &ord in ordinals {
            let card_id = self.next_id();
            self.conn.execute(
                "INSERT INTO cards (id, nid, did, ord, mod, usn, type, queue, due, ivl,
                                    factor, reps, lapses, left, odue, odid, flags, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, -1, 0, 0, ?6, 0, 0, 0, 0, 0, 0, 0, 0, '')",
                params![card_id, note_id, self.deck_id, ord, self.mtime, due],
            )?;
            self.cards_written += 1;
        }
        self.notes_written += 1;
        Ok(())
    }

    /// Claim a bundle filename; false if an earlier file already took it.
    fn claim_media_name(&mut self, filename: &str) -> bool {
        if self.media_names.insert(filename.to_string()) {
            true
        } else {
            debug!("media {filename} already bundled, keeping the first copy");
            false
        }
    }

    fn staging_path(&self) -> PathBuf {
        self.workdir
            .path()
            .join(MEDIA_STAGING_DIR)
            .join(self.staged_media.len().to_string())
    }

    fn stage_media(&mut self, media: &MediaFile) -> Result<()> {
        if !self.claim_media_name(&media.filename) {
            return Ok(());
        }
        let path = self.staging_path();
        fs::write(&path, &media.data)?;
        self.staged_media.push((media.filename.clone(), path));
        Ok(())
    }

    /// Copy an audio file into the bundle under a name derived from `key`
    /// and return the `[sound:...]` reference, or an empty string when there
    /// is no usable file.
    fn stage_audio(&mut self, source: Option<&Path>, key: &str) -> Result<String> {
        let source = match source {
            None => return Ok(String::new()),
            Some(path) if !path.is_file() => {
                warn!("Audio file not found: {}", path.display());
                return Ok(String::new());
            }
            Some(path) => path,
        };

        let filename = format!("audio_{}.mp3", &sha256_hex(key.as_bytes())[..8]);
        if self.claim_media_name(&filename) {
            let path = self.staging_path();
            fs::copy(source, &path)?;
            self.staged_media.push((filename.clone(), path));
        }
        Ok(format!("[sound:{filename}]"))
    }

    fn write_col(&self) -> Result<()> {
        let models: Map<String, Value> = self
            .models
            .values()
            .map(|m| (m.id.to_string(), model_json(m, self.deck_id, self.mtime)))
            .collect();

        let mut decks = Map::new();
        decks.insert(
            DEFAULT_DECK_ID.to_string(),
            deck_json(DEFAULT_DECK_ID, DEFAULT_DECK_NAME, self.mtime),
        );
        decks.insert(
            self.deck_id.to_string(),
            deck_json(self.deck_id, &self.deck_name, self.mtime),
        );

        let conf = json!({
            "activeDecks": [DEFAULT_DECK_ID],
            "curDeck": self.deck_id,
            "curModel": self.models.keys().next(),
            "nextPos": self.notes_written + 1,
            "newSpread": 0,
            "collapseTime": 1200,
            "timeLim": 0,
            "estTimes": true,
            "dueCounts": true,
            "sortType": "noteFld",
            "sortBackwards": false,
            "addToCur": true,
        });
        let dconf = json!({ "1": deck_config_json() });

        self.conn.execute(
            "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags)
             VALUES (1, ?1, ?2, ?3, ?4, 0, 0, 0, ?5, ?6, ?7, ?8, '{}')",
            params![
                self.mtime,
                self.mtime * 1000,
                self.mtime * 1000,
                SCHEMA_VERSION,
                conf.to_string(),
                Value::Object(models).to_string(),
                Value::Object(decks).to_string(),
                dconf.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Write the collection row, close the database and zip everything into
    /// `output`. Returns (notes, cards) written.
    fn finish(self, output: &Path) -> Result<(usize, usize)> {
        self.write_col()?;
        self.conn.execute_batch("COMMIT")?;

        let PackageWriter {
            conn,
            workdir,
            staged_media,
            notes_written,
            cards_written,
            ..
        } = self;
        conn.close().map_err(|(_, e)| e)?;

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(output)?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(DATABASE_ENTRY, options)?;
        zip.write_all(&fs::read(workdir.path().join(DATABASE_ENTRY))?)?;

        let media_map: BTreeMap<String, &str> = staged_media
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| (idx.to_string(), name.as_str()))
            .collect();
        zip.start_file(MEDIA_ENTRY, options)?;
        zip.write_all(serde_json::to_string(&media_map)?.as_bytes())?;

        for (idx, (_, path)) in staged_media.iter().enumerate() {
            zip.start_file(idx.to_string(), options)?;
            zip.write_all(&fs::read(path)?)?;
        }
        zip.finish()?;

        debug!(
            "wrote {} ({} media files)",
            output.display(),
            staged_media.len()
        );
        Ok((notes_written, cards_written))
    }
}

// ─── Public export operations ───────────────────────────────

fn export_message(notes: usize, cards: usize, deck_name: &str) -> String {
    format!("Exported {notes} notes ({cards} cards) to deck '{deck_name}'")
}

/// Export cards as a new deck, regenerating each source note with its
/// original note type. Only the exported cards' template ordinals are
/// generated, so N cards re-import as N cards.
pub fn export_cards_to_deck(
    cards: &[Card],
    deck_name: &str,
    output: Option<&Path>,
    media: &[Arc<MediaFile>],
) -> Result<ExportResult> {
    let groups = group_cards_by_note(cards)?;

    let mut writer = PackageWriter::new(deck_name)?;
    for group in &groups {
        writer.add_note(
            &group.model,
            &group.guid,
            &group.fields,
            &group.tags,
            &group.ordinals,
        )?;
    }
    for file in media {
        writer.stage_media(file)?;
    }

    let deck_path = resolve_output(deck_name, output, "");
    let (notes_created, cards_created) = writer.finish(&deck_path)?;
    let message = export_message(notes_created, cards_created, deck_name);
    info!("{message}");

    Ok(ExportResult {
        deck_path,
        notes_created,
        cards_created,
        message,
    })
}

/// Export notes as a new deck with their own note types and bound media.
pub fn export_notes_to_deck(
    notes: &[Note],
    deck_name: &str,
    output: Option<&Path>,
) -> Result<ExportResult> {
    let typed: Vec<(&Note, &Arc<NoteType>)> = notes
        .iter()
        .map(|note| {
            note.model
                .as_ref()
                .map(|model| (note, model))
                .ok_or(TidyDeckError::MissingModel { card_id: note.id })
        })
        .collect::<Result<_>>()?;

    let mut writer = PackageWriter::new(deck_name)?;
    for (note, model) in typed {
        let fields = model.fit_fields(&note.fields);
        let ordinals = generated_ordinals(model, &fields);
        writer.add_note(model, &note.guid, &fields, &note.tags, &ordinals)?;
        for media in &note.media {
            writer.stage_media(media)?;
        }
    }

    let deck_path = resolve_output(deck_name, output, "");
    let (notes_created, cards_created) = writer.finish(&deck_path)?;
    let message = export_message(notes_created, cards_created, deck_name);
    info!("{message}");

    Ok(ExportResult {
        deck_path,
        notes_created,
        cards_created,
        message,
    })
}

/// Export cards that carry no note type: one note per card on the built-in
/// Basic model, or on the vocabulary model when any card has seven or more
/// fields.
pub fn export_plain_cards(
    cards: &[Card],
    deck_name: &str,
    output: Option<&Path>,
) -> Result<ExportResult> {
    let model = if cards.iter().all(|c| c.fields.len() < VOCAB_FIELD_COUNT) {
        Arc::new(basic_model())
    } else {
        Arc::new(vocab_model())
    };

    let mut writer = PackageWriter::new(deck_name)?;
    for card in cards {
        let guid = card
            .guid
            .clone()
            .unwrap_or_else(|| derived_guid(card.fields.as_slice()));
        writer.add_note(&model, &guid, &card.fields, &card.tags, &[0])?;
    }

    let deck_path = resolve_output(deck_name, output, "");
    let (notes_created, cards_created) = writer.finish(&deck_path)?;
    let message = export_message(notes_created, cards_created, deck_name);
    info!("{message} using the {} note type", model.name);

    Ok(ExportResult {
        deck_path,
        notes_created,
        cards_created,
        message,
    })
}

/// Build vocabulary notes from scratch, bundling any audio files that exist.
pub fn create_vocab_cards(
    deck_name: &str,
    requests: &[VocabCardRequest],
    output: Option<&Path>,
) -> Result<ExportResult> {
    let model = Arc::new(vocab_model());
    let mut writer = PackageWriter::new(deck_name)?;

    for request in requests {
        let term_audio = writer.stage_audio(request.term_audio.as_deref(), &request.term)?;
        let meaning_audio =
            writer.stage_audio(request.meaning_audio.as_deref(), &request.meaning)?;
        let fields = vec![
            request.term.clone(),
            request.reading.clone(),
            request.meaning.clone(),
            request.example.clone(),
            request.example_translation.clone(),
            term_audio,
            meaning_audio,
        ];
        let guid = derived_guid(&fields[..5]);
        writer.add_note(&model, &guid, &fields, &request.tags, &[0])?;
    }

    let deck_path = resolve_output(deck_name, output, "_vocab");
    let (notes_created, cards_created) = writer.finish(&deck_path)?;
    let message = format!("Created {notes_created} bilingual vocab cards in deck '{deck_name}'");
    info!("{message}");

    Ok(ExportResult {
        deck_path,
        notes_created,
        cards_created,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{
        Package, load_cards_from_package, load_deck_names, load_models_from_package,
    };
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn two_way_model() -> NoteType {
        NoteType::new(42, "Two Way")
            .with_fields(["Front", "Back"])
            .with_template("Forward", "{{Front}}", "{{Back}}")
            .with_template("Reverse", "{{#Back}}{{Back}}{{/Back}}", "{{Front}}")
    }

    #[test]
    fn test_deck_id_is_stable_and_distinct() {
        assert_eq!(deck_id_for("Japanese"), deck_id_for("Japanese"));
        assert_ne!(deck_id_for("Japanese"), deck_id_for("Japanese::Core"));
        assert!(deck_id_for("Japanese") > 1);
        assert!(deck_id_for("Japanese") < (1 << 53));
    }

    #[test]
    fn test_default_output_path() {
        let path = default_output_path("My Deck", "");
        assert_eq!(path.file_name().unwrap(), "My_Deck.apkg");
        assert!(path.starts_with(std::env::temp_dir()));
        assert_eq!(output_file_name("My Deck", "_vocab"), "My_Deck_vocab.apkg");
    }

    #[test]
    fn test_referenced_fields_strips_markers() {
        let refs = referenced_fields("{{#Back}}{{text:Back}}{{/Back}} {{FrontSide}} {{ Front }}");
        let expected: BTreeSet<String> = ["Back", "Front"].iter().map(|s| s.to_string()).collect();
        assert_eq!(refs, expected);
    }

    #[test]
    fn test_generated_ordinals_skip_empty_questions() {
        let model = two_way_model();
        assert_eq!(generated_ordinals(&model, &strings(&["a", "b"])), vec![0, 1]);
        assert_eq!(generated_ordinals(&model, &strings(&["a", " "])), vec![0]);
        assert_eq!(generated_ordinals(&model, &strings(&["", ""])), vec![0]);
    }

    #[test]
    fn test_generated_ordinals_cloze() {
        let model = NoteType::new(7, "Cloze")
            .with_fields(["Text", "Extra"])
            .with_template("Cloze", "{{cloze:Text}}", "{{cloze:Text}}")
            .with_kind(NoteTypeKind::Cloze);
        let fields = strings(&["{{c1::Tokyo}} is in {{c3::Japan}}, {{c1::yes}}", ""]);
        assert_eq!(generated_ordinals(&model, &fields), vec![0, 2]);
        assert_eq!(generated_ordinals(&model, &strings(&["plain", ""])), vec![0]);
    }

    #[test]
    fn test_export_requires_model_and_note_id() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.apkg");
        let model = Arc::new(basic_model());

        let no_model = Card::new(5, "Deck", strings(&["a", "b"])).with_note(1, 0);
        let err = export_cards_to_deck(&[no_model], "Deck", Some(&out), &[]).unwrap_err();
        assert!(matches!(err, TidyDeckError::MissingModel { card_id: 5 }));

        let no_note = Card::new(6, "Deck", strings(&["a", "b"])).with_model(model);
        let err = export_cards_to_deck(&[no_note], "Deck", Some(&out), &[]).unwrap_err();
        assert!(matches!(err, TidyDeckError::MissingNoteId { card_id: 6 }));
        assert!(!out.exists());
    }

    #[test]
    fn test_group_cards_merges_ordinals() {
        let model = Arc::new(two_way_model());
        let cards = vec![
            Card::new(1, "D", strings(&["a", "b"])).with_note(10, 0).with_model(Arc::clone(&model)),
            Card::new(2, "D", strings(&["c", "d"])).with_note(11, 1).with_model(Arc::clone(&model)),
            Card::new(3, "D", strings(&["a", "b"])).with_note(10, 1).with_model(Arc::clone(&model)),
        ];
        let groups = group_cards_by_note(&cards).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].ordinals, vec![0, 1]);
        assert_eq!(groups[1].ordinals, vec![1]);
        assert_eq!(groups[1].fields, strings(&["c", "d"]));
    }

    #[test]
    fn test_export_cards_pads_fields_and_keeps_card_count() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("two_way.apkg");
        let model = Arc::new(two_way_model());
        let cards = vec![
            Card::new(1, "D", strings(&["only front"]))
                .with_note(10, 1)
                .with_model(Arc::clone(&model)),
        ];

        let result = export_cards_to_deck(&cards, "Two Way", Some(&out), &[]).unwrap();
        assert_eq!(result.notes_created, 1);
        assert_eq!(result.cards_created, 1);
        assert_eq!(result.message, "Exported 1 notes (1 cards) to deck 'Two Way'");

        let (read_back, models) = load_cards_from_package(&out).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].template_ordinal, 1);
        assert_eq!(read_back[0].fields, strings(&["only front", ""]));
        assert_eq!(read_back[0].deck_name, "Two Way");
        assert_eq!(models[&42].templates.len(), 2);
    }

    #[test]
    fn test_export_to_default_deck_reuses_builtin_id() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("default.apkg");
        let cards = vec![Card::new(1, "D", strings(&["q", "a"]))];
        export_plain_cards(&cards, "Default", Some(&out)).unwrap();

        let package = Package::open(&out).unwrap();
        let decks = load_deck_names(&package.open_database().unwrap()).unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[&DEFAULT_DECK_ID], "Default");

        let (read_back, _) = load_cards_from_package(&out).unwrap();
        assert_eq!(read_back[0].deck_name, "Default");
    }

    #[test]
    fn test_export_plain_cards_picks_model_by_width() {
        let dir = TempDir::new().unwrap();

        let narrow = vec![Card::new(1, "D", strings(&["q", "a"]))];
        let out = dir.path().join("basic.apkg");
        export_plain_cards(&narrow, "Plain", Some(&out)).unwrap();
        let models = load_models_from_package(&out).unwrap();
        assert!(models.contains_key(&BASIC_MODEL_ID));

        let wide = vec![
            Card::new(1, "D", strings(&["q", "a"])),
            Card::new(2, "D", strings(&["t", "r", "m", "e", "x", "", ""])),
        ];
        let out = dir.path().join("vocab.apkg");
        let result = export_plain_cards(&wide, "Plain", Some(&out)).unwrap();
        assert_eq!(result.cards_created, 2);
        let models = load_models_from_package(&out).unwrap();
        assert_eq!(models[&VOCAB_MODEL_ID].field_count(), 7);
    }

    #[test]
    fn test_create_vocab_cards_bundles_audio() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("inu.mp3");
        fs::write(&audio, b"ID3audio").unwrap();

        let requests = vec![
            VocabCardRequest::new("犬", "dog")
                .with_reading("いぬ")
                .with_example("犬が好き", "I like dogs")
                .with_term_audio(&audio)
                .with_meaning_audio(dir.path().join("missing.mp3")),
            VocabCardRequest::new("猫", "cat"),
        ];
        let out = dir.path().join("vocab.apkg");
        let result = create_vocab_cards("Animals", &requests, Some(&out)).unwrap();
        assert_eq!(result.notes_created, 2);
        assert_eq!(result.message, "Created 2 bilingual vocab cards in deck 'Animals'");

        let mut package = Package::open(&out).unwrap();
        assert_eq!(package.media_map().len(), 1);
        let filename = package.media_map()["0"].clone();
        assert!(filename.starts_with("audio_") && filename.ends_with(".mp3"));
        assert_eq!(package.read_media("0").unwrap(), b"ID3audio");

        let (cards, _) = load_cards_from_package(&out).unwrap();
        assert_eq!(cards[0].fields[5], format!("[sound:{filename}]"));
        assert_eq!(cards[0].fields[6], "");
    }

    #[test]
    fn test_vocab_default_output_suffix() {
        let deck = "tidydeck writer suffix test";
        let result = create_vocab_cards(deck, &[], None).unwrap();
        assert_eq!(result.deck_path, default_output_path(deck, "_vocab"));
        assert!(result.deck_path.exists());
        fs::remove_file(&result.deck_path).unwrap();
    }
}
