pub mod collection;
pub mod config;
pub mod dedup;
pub mod error;
pub mod media;
pub mod models;
pub mod package;
pub mod template_config;

pub use config::AppConfig;
pub use error::{ExitCode, Result, TidyDeckError};
pub use models::*;

pub use collection::Collection;
pub use media::{MediaResolver, detect_media};
pub use template_config::{DecodeStatus, TemplateDecode, TemplateSections, decode_template_config};

pub use dedup::{
    DedupOutcome, DedupStrategy, ExactFieldMatcher, OverlapReport, WordOverlapMatcher,
    analyze_overlap, build_collection_word_set, deduplicate_external_package, deduplicate_notes,
    exclude_deck, normalize_and_split, notes_match_auto, remove_duplicate_notes,
};

pub use package::{
    ExportResult, ModelMap, Package, PackageSummary, VocabCardRequest, create_vocab_cards,
    export_cards_to_deck, export_notes_to_deck, export_plain_cards, extract_package_media,
    inspect_package, list_package_media, load_cards_from_package, load_models_from_package,
    load_notes_from_package, package_deck_names,
};
