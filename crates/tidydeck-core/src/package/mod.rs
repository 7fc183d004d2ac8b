//! `.apkg` package codec: reading an archive into notes, cards and note
//! types, and writing filtered sets back out.

pub mod apkg_schema;
pub mod archive;
pub mod schema;
pub mod writer;


use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

pub use archive::Package;
pub use schema::{
    ModelMap, attach_models, load_cards, load_deck_names, load_models, load_note_decks, load_notes,
};
pub use writer::{
    ExportResult, VocabCardRequest, create_vocab_cards, deck_id_for, default_output_path,
    export_cards_to_deck, export_notes_to_deck, export_plain_cards, output_file_name,
};

use crate::error::Result;
use crate::media::MediaResolver;
use crate::models::{Card, Note};

/// Notes of a package with note types, deck names and media attached.
pub fn load_notes_from_package(path: &Path) -> Result<Vec<Note>> {
    let mut package = Package::open(path)?;

    let (mut notes, models, note_decks) = {
        let conn = package.open_database()?;
        let models = load_models(&conn)?;
        let decks = load_deck_names(&conn)?;
        (load_notes(&conn)?, models, load_note_decks(&conn, &decks)?)
    };
    attach_models(&mut notes, &models);

    let mut resolver = MediaResolver::new(&mut package);
    for note in &mut notes {
        note.deck_name = note_decks.get(&note.id).cloned();
        note.media = resolver.bind_fields(note.fields.as_slice());
    }

    debug!("loaded {} notes from {}", notes.len(), path.display());
    Ok(notes)
}

/// Cards of a package together with the note types they reference.
pub fn load_cards_from_package(path: &Path) -> Result<(Vec<Card>, ModelMap)> {
    let package = Package::open(path)?;
    let conn = package.open_database()?;
    let models = load_models(&conn)?;
    let decks = load_deck_names(&conn)?;
    let cards = load_cards(&conn, &models, &decks)?;
    Ok((cards, models))
}

pub fn load_models_from_package(path: &Path) -> Result<ModelMap> {
    let package = Package::open(path)?;
    let conn = package.open_database()?;
    load_models(&conn)
}

/// Deck names stored in a package, sorted.
pub fn package_deck_names(path: &Path) -> Result<Vec<String>> {
    let package = Package::open(path)?;
    let conn = package.open_database()?;
    let names: BTreeSet<String> = load_deck_names(&conn)?.into_values().collect();
    Ok(names.into_iter().collect())
}

/// On-disk name → logical name of every media file in a package.
pub fn list_package_media(path: &Path) -> Result<BTreeMap<String, String>> {
    Ok(Package::open(path)?.media_map().clone())
}

pub fn extract_package_media(path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    Package::open(path)?.extract_media(dest_dir)
}

// ─── Inspection ─────────────────────────────────────────────

const SAMPLE_NOTES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct NoteSample {
    pub id: i64,
    pub model_name: Option<String>,
    pub fields: Vec<String>,
}

/// Overview of a package's contents.
#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub path: PathBuf,
    pub deck_names: Vec<String>,
    pub note_count: usize,
    pub card_count: usize,
    pub model_names: Vec<String>,
    pub media_count: usize,
    /// Field count → number of notes with that many fields.
    pub field_count_distribution: BTreeMap<usize, usize>,
    pub samples: Vec<NoteSample>,
}

pub fn inspect_package(path: &Path) -> Result<PackageSummary> {
    let package = Package::open(path)?;
    let conn = package.open_database()?;

    let models = load_models(&conn)?;
    let decks = load_deck_names(&conn)?;
    let notes = load_notes(&conn)?;
    let card_count: i64 = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;

    let mut field_count_distribution = BTreeMap::new();
    for note in &notes {
        *field_count_distribution.entry(note.fields.len()).or_insert(0) += 1;
    }

    let samples = notes
        .iter()
        .take(SAMPLE_NOTES)
        .map(|note| NoteSample {
            id: note.id,
            model_name: models.get(&note.model_id).map(|m| m.name.clone()),
            fields: note.fields.clone(),
        })
        .collect();

    let deck_names: BTreeSet<String> = decks.into_values().collect();

    Ok(PackageSummary {
        path: path.to_path_buf(),
        deck_names: deck_names.into_iter().collect(),
        note_count: notes.len(),
        card_count: card_count as usize,
        model_names: models.values().map(|m| m.name.clone()).collect(),
        media_count: package.media_map().len(),
        field_count_distribution,
        samples,
    })
}
