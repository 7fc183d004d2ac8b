use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::Note;
use crate::package::load_notes_from_package;

pub const DEFAULT_MAX_WORD_LENGTH: usize = 20;
pub const DEFAULT_STOP_WORDS: &[&str] = &["item", "sentence", "plain"];

static HTML_TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Remove HTML tags, keeping the text between them.
pub fn strip_html(text: &str) -> Cow<'_, str> {
    HTML_TAG_REGEX.replace_all(text, "")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStrategy {
    ExactField,
    WordOverlap,
}

/// Candidates split into the notes to keep and the ones already present.
/// Both lists preserve the input order.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub unique: Vec<Note>,
    pub duplicates: Vec<Note>,
    pub strategy: DedupStrategy,
}

impl DedupOutcome {
    fn partition<F>(candidates: Vec<Note>, strategy: DedupStrategy, mut is_duplicate: F) -> Self
    where
        F: FnMut(&Note) -> bool,
    {
        let (duplicates, unique) = candidates.into_iter().partition(|note| is_duplicate(note));
        Self {
            unique,
            duplicates,
            strategy,
        }
    }
}

// ─── Exact field comparison ─────────────────────────────────

pub type FieldComparator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Trimmed, case-insensitive equality.
pub fn default_field_comparison(candidate: &str, existing: &str) -> bool {
    candidate.trim().to_lowercase() == existing.trim().to_lowercase()
}

/// Matches notes on one or more field positions. Every listed position has to
/// match; a note too short for a position is never a match.
#[derive(Clone)]
pub struct ExactFieldMatcher {
    field_indices: Vec<usize>,
    comparator: FieldComparator,
}

impl Default for ExactFieldMatcher {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for ExactFieldMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExactFieldMatcher")
            .field("field_indices", &self.field_indices)
            .finish_non_exhaustive()
    }
}

impl ExactFieldMatcher {
    pub fn new(field_index: usize) -> Self {
        Self {
            field_indices: vec![field_index],
            comparator: Arc::new(default_field_comparison),
        }
    }

    /// Compare on several positions. An empty list falls back to position 0.
    pub fn with_fields(mut self, field_indices: Vec<usize>) -> Self {
        self.field_indices = if field_indices.is_empty() {
            vec![0]
        } else {
            field_indices
        };
        self
    }

    pub fn with_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.comparator = Arc::new(comparator);
        self
    }

    pub fn field_indices(&self) -> &[usize] {
        &self.field_indices
    }

    pub fn is_match(&self, candidate: &Note, existing: &Note) -> bool {
        self.field_indices.iter().all(|&idx| {
            match (candidate.field(idx), existing.field(idx)) {
                (Some(a), Some(b)) => (self.comparator)(a, b),
                _ => false,
            }
        })
    }

    pub fn matches_any<'a, I>(&self, candidate: &Note, reference: I) -> bool
    where
        I: IntoIterator<Item = &'a Note>,
    {
        reference
            .into_iter()
            .any(|existing| self.is_match(candidate, existing))
    }
}

/// Reference notes that do not belong to `deck_name`, in input order.
pub fn exclude_deck<'a>(reference: &'a [Note], deck_name: &str) -> Vec<&'a Note> {
    reference
        .iter()
        .filter(|note| !note.in_deck(deck_name))
        .collect()
}

/// Split `candidates` into unique notes and notes that already exist in
/// `reference`. When `candidate_deck` is given, reference notes from that same
/// deck are ignored so a deck is never compared against itself.
pub fn remove_duplicate_notes(
    candidates: Vec<Note>,
    candidate_deck: Option<&str>,
    reference: &[Note],
    matcher: &ExactFieldMatcher,
) -> DedupOutcome {
    let existing: Vec<&Note> = match candidate_deck {
        Some(deck) => exclude_deck(reference, deck),
        None => reference.iter().collect(),
    };

    let outcome = DedupOutcome::partition(candidates, DedupStrategy::ExactField, |note| {
        matcher.matches_any(note, existing.iter().copied())
    });
    info!(
        "exact dedup on fields {:?}: {} unique, {} duplicates",
        matcher.field_indices(),
        outcome.unique.len(),
        outcome.duplicates.len()
    );
    outcome
}

// ─── Word-overlap matching ──────────────────────────────────

/// Coarse duplicate detection: a note matches when any one of its fields
/// shares a normalized token with the reference collection.
#[derive(Debug, Clone)]
pub struct WordOverlapMatcher {
    max_word_length: usize,
    stop_words: HashSet<String>,
}

impl Default for WordOverlapMatcher {
    fn default() -> Self {
        Self {
            max_word_length: DEFAULT_MAX_WORD_LENGTH,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl WordOverlapMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_word_length(mut self, max_word_length: usize) -> Self {
        self.max_word_length = max_word_length;
        self
    }

    pub fn with_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_words = words.into_iter().map(|w| w.into().to_lowercase()).collect();
        self
    }

    /// Strip HTML, lowercase, split on `,` `;` `|`, trim, and drop empty,
    /// stop-listed and over-long tokens.
    pub fn normalize_and_split(&self, text: &str) -> HashSet<String> {
        strip_html(text)
            .to_lowercase()
            .split([',', ';', '|'])
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter(|token| !self.stop_words.contains(*token))
            .filter(|token| token.chars().count() <= self.max_word_length)
            .map(str::to_string)
            .collect()
    }

    /// Union of the normalized tokens of every field of every note.
    pub fn build_word_set(&self, notes: &[Note]) -> HashSet<String> {
        notes
            .iter()
            .flat_map(|note| note.fields.iter())
            .flat_map(|field| self.normalize_and_split(field))
            .collect()
    }

    pub fn note_matches(&self, note: &Note, words: &HashSet<String>) -> bool {
        note.fields.iter().any(|field| {
            self.normalize_and_split(field)
                .iter()
                .any(|token| words.contains(token))
        })
    }
}

pub fn normalize_and_split(text: &str, max_word_length: usize) -> HashSet<String> {
    WordOverlapMatcher::default()
        .with_max_word_length(max_word_length)
        .normalize_and_split(text)
}

pub fn build_collection_word_set(notes: &[Note]) -> HashSet<String> {
    WordOverlapMatcher::default().build_word_set(notes)
}

pub fn notes_match_auto(note: &Note, words: &HashSet<String>) -> bool {
    WordOverlapMatcher::default().note_matches(note, words)
}

/// Word-overlap dedup of `candidates` against `reference`.
pub fn deduplicate_notes(
    candidates: Vec<Note>,
    reference: &[Note],
    matcher: &WordOverlapMatcher,
) -> DedupOutcome {
    let words = matcher.build_word_set(reference);
    let outcome = DedupOutcome::partition(candidates, DedupStrategy::WordOverlap, |note| {
        matcher.note_matches(note, &words)
    });
    info!(
        "word-overlap dedup against {} reference words: {} unique, {} duplicates",
        words.len(),
        outcome.unique.len(),
        outcome.duplicates.len()
    );
    outcome
}

/// Load a package and keep the notes that do not overlap `collection`.
pub fn deduplicate_external_package(
    package_path: &Path,
    collection: &[Note],
    matcher: &WordOverlapMatcher,
) -> Result<DedupOutcome> {
    let notes = load_notes_from_package(package_path)?;
    Ok(deduplicate_notes(notes, collection, matcher))
}

// ─── Overlap analysis ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapReport {
    pub deck1_name: String,
    pub deck2_name: String,
    pub deck1_total_notes: usize,
    pub deck2_total_notes: usize,
    pub overlap_notes: usize,
    pub deck1_unique_notes: usize,
    pub deck2_unique_notes: usize,
    pub overlap_percentage_deck1: f64,
    pub overlap_percentage_deck2: f64,
}

/// Overlap between two decks, counting deck1 notes that have an exact match in
/// deck2 at `field_index`.
pub fn analyze_overlap(
    deck1_name: &str,
    deck1: &[Note],
    deck2_name: &str,
    deck2: &[Note],
    field_index: usize,
) -> OverlapReport {
    let matcher = ExactFieldMatcher::new(field_index);
    let overlap = deck1
        .iter()
        .filter(|note| matcher.matches_any(note, deck2))
        .count();

    let percentage = |total: usize| {
        if total > 0 {
            overlap as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    };

    OverlapReport {
        deck1_name: deck1_name.to_string(),
        deck2_name: deck2_name.to_string(),
        deck1_total_notes: deck1.len(),
        deck2_total_notes: deck2.len(),
        overlap_notes: overlap,
        deck1_unique_notes: deck1.len() - overlap,
        deck2_unique_notes: deck2.len().saturating_sub(overlap),
        overlap_percentage_deck1: percentage(deck1.len()),
        overlap_percentage_deck2: percentage(deck2.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: i64, fields: &[&str]) -> Note {
        Note::new(
            id,
            format!("guid{id}"),
            123,
            fields.iter().map(|f| f.to_string()).collect(),
        )
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn ids(notes: &[Note]) -> Vec<i64> {
        notes.iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_normalize_and_split_delimiters() {
        assert_eq!(
            normalize_and_split("apple, banana; cherry|grape", DEFAULT_MAX_WORD_LENGTH),
            set(&["apple", "banana", "cherry", "grape"])
        );
    }

    #[test]
    fn test_normalize_strips_html() {
        assert!(normalize_and_split("<b>bold</b> text with <i>italics</i>", 20).is_empty());
        assert_eq!(
            normalize_and_split("<b>bold</b>, text with <i>italics</i>", 20),
            set(&["bold", "text with italics"])
        );
    }

    #[test]
    fn test_normalize_drops_stop_words() {
        assert_eq!(
            normalize_and_split("item, sentence, plain, valid", 20),
            set(&["valid"])
        );
        assert_eq!(normalize_and_split("ITEM, Plain", 20), set(&[]));
    }

    #[test]
    fn test_normalize_length_bound() {
        assert!(normalize_and_split("short verylongwordthatexceedslimit normal", 10).is_empty());
        assert_eq!(
            normalize_and_split("short, verylongwordthatexceedslimit, normal", 10),
            set(&["short", "normal"])
        );
    }

    #[test]
    fn test_build_collection_word_set() {
        let notes = vec![
            note(1, &["apple pie", "red fruit"]),
            note(2, &["banana split", "yellow fruit"]),
        ];
        assert_eq!(
            build_collection_word_set(&notes),
            set(&["apple pie", "red fruit", "banana split", "yellow fruit"])
        );
    }

    #[test]
    fn test_notes_match_auto() {
        let words = set(&["apple", "pie", "red", "fruit", "banana"]);
        assert!(notes_match_auto(&note(1, &["apple", "green fruit"]), &words));
        assert!(!notes_match_auto(&note(2, &["orange juice", "citrus drink"]), &words));
        assert!(!notes_match_auto(&note(3, &["item", "sentence", "plain"]), &set(&["apple"])));
        assert!(!notes_match_auto(&note(4, &["", ""]), &words));
        assert!(notes_match_auto(&note(5, &["APPLE", "PIE"]), &words));
    }

    #[test]
    fn test_custom_stop_words() {
        let matcher = WordOverlapMatcher::new().with_stop_words(["Noun"]);
        assert_eq!(matcher.normalize_and_split("noun, item"), set(&["item"]));
    }

    #[test]
    fn test_word_overlap_partition_is_complementary() {
        let reference = vec![note(100, &["dog", "inu"]), note(101, &["cat; neko", ""])];
        let candidates = vec![
            note(1, &["Dog", "犬"]),
            note(2, &["bird", "tori"]),
            note(3, &["<b>neko</b>", "cat"]),
            note(4, &["item", "plain"]),
        ];

        let outcome = deduplicate_notes(candidates.clone(), &reference, &WordOverlapMatcher::new());
        assert_eq!(ids(&outcome.duplicates), vec![1, 3]);
        assert_eq!(ids(&outcome.unique), vec![2, 4]);
        assert_eq!(outcome.strategy, DedupStrategy::WordOverlap);

        let mut all: Vec<i64> = ids(&outcome.unique);
        all.extend(ids(&outcome.duplicates));
        all.sort();
        assert_eq!(all, ids(&candidates));
    }

    #[test]
    fn test_empty_reference_keeps_everything() {
        let candidates = vec![note(1, &["a"]), note(2, &["b"])];
        let outcome = deduplicate_notes(candidates.clone(), &[], &WordOverlapMatcher::new());
        assert_eq!(ids(&outcome.unique), vec![1, 2]);

        let outcome = remove_duplicate_notes(candidates, None, &[], &ExactFieldMatcher::default());
        assert_eq!(ids(&outcome.unique), vec![1, 2]);
        assert!(outcome.duplicates.is_empty());
    }

    #[test]
    fn test_exact_match_trims_and_ignores_case() {
        let reference = vec![note(100, &["  Hello ", "x"])];
        let outcome = remove_duplicate_notes(
            vec![note(1, &["hello", "y"]), note(2, &["world", "y"])],
            None,
            &reference,
            &ExactFieldMatcher::default(),
        );
        assert_eq!(ids(&outcome.duplicates), vec![1]);
        assert_eq!(ids(&outcome.unique), vec![2]);
    }

    #[test]
    fn test_exact_short_notes_never_match() {
        let reference = vec![note(100, &["a"])];
        let matcher = ExactFieldMatcher::new(1);
        let outcome = remove_duplicate_notes(vec![note(1, &["a"])], None, &reference, &matcher);
        assert_eq!(ids(&outcome.unique), vec![1]);
    }

    #[test]
    fn test_exact_multiple_fields_all_must_match() {
        let reference = vec![note(100, &["a", "b", "c"])];
        let matcher = ExactFieldMatcher::default().with_fields(vec![0, 2]);
        let outcome = remove_duplicate_notes(
            vec![note(1, &["A", "zzz", "C"]), note(2, &["a", "b", "d"])],
            None,
            &reference,
            &matcher,
        );
        assert_eq!(ids(&outcome.duplicates), vec![1]);
        assert_eq!(ids(&outcome.unique), vec![2]);
    }

    #[test]
    fn test_exact_custom_comparator() {
        let matcher = ExactFieldMatcher::default()
            .with_comparator(|a: &str, b: &str| a.starts_with(b) || b.starts_with(a));
        assert!(matcher.is_match(&note(1, &["tabemasu"]), &note(2, &["tabe"])));
        assert!(!matcher.is_match(&note(1, &["nomu"]), &note(2, &["tabe"])));
    }

    #[test]
    fn test_same_deck_reference_excluded() {
        let reference = vec![
            note(100, &["apple"]).with_deck("Fruit"),
            note(101, &["pear"]).with_deck("Other"),
        ];
        let candidates = vec![
            note(1, &["apple"]).with_deck("Fruit"),
            note(2, &["pear"]).with_deck("Fruit"),
        ];
        let outcome = remove_duplicate_notes(
            candidates,
            Some("Fruit"),
            &reference,
            &ExactFieldMatcher::default(),
        );
        assert_eq!(ids(&outcome.unique), vec![1]);
        assert_eq!(ids(&outcome.duplicates), vec![2]);
    }

    #[test]
    fn test_analyze_overlap_counts() {
        let deck1: Vec<Note> = (0..10).map(|i| note(i, &[&format!("word{i}")])).collect();
        let deck2: Vec<Note> = (0..10)
            .map(|i| {
                let front = if i < 3 { format!("WORD{i}") } else { format!("other{i}") };
                note(100 + i, &[&front])
            })
            .collect();

        let report = analyze_overlap("One", &deck1, "Two", &deck2, 0);
        assert_eq!(report.deck1_total_notes, 10);
        assert_eq!(report.deck2_total_notes, 10);
        assert_eq!(report.overlap_notes, 3);
        assert_eq!(report.deck1_unique_notes, 7);
        assert_eq!(report.deck2_unique_notes, 7);
        assert!((report.overlap_percentage_deck1 - 30.0).abs() < f64::EPSILON);
        assert!((report.overlap_percentage_deck2 - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_analyze_overlap_empty_decks() {
        let report = analyze_overlap("A", &[], "B", &[], 0);
        assert_eq!(report.overlap_notes, 0);
        assert_eq!(report.overlap_percentage_deck1, 0.0);
        assert_eq!(report.overlap_percentage_deck2, 0.0);
    }
}
