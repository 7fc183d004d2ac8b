use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tidydeck_core::{
    AppConfig, Collection, ExactFieldMatcher, ExitCode, TidyDeckError, analyze_overlap,
    deduplicate_external_package, export_cards_to_deck, export_notes_to_deck, inspect_package,
    remove_duplicate_notes,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "tidydeck",
    about = "Inspect, compare and deduplicate Anki decks and packages",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting TIDYDECK_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List all decks with card counts.
    Decks,

    /// List cards in a deck.
    Cards {
        deck: String,
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Search cards by field content.
    Search {
        query: String,
        #[arg(long)]
        deck: Option<String>,
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Show study status of cards, soonest due first.
    Status {
        #[arg(long)]
        deck: Option<String>,
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// List all card templates.
    Templates,

    /// Show the HTML of one card template.
    Template { notetype: String, name: String },

    /// Compare two decks for overlapping notes.
    Compare {
        deck1: String,
        deck2: String,
        /// Field position to compare (defaults to the configured index).
        #[arg(long)]
        field: Option<usize>,
    },

    /// Export a deck without the notes that already exist in other decks.
    Dedupe {
        deck: String,
        /// Field positions that must all match, e.g. `--fields 0,2`.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Export the notes of a package that are not already in the collection.
    ImportDedupe {
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Inspect the contents of a package.
    Inspect { apkg: PathBuf },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

// ─── Config Actions ──────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration.
    List,
    /// Print the config file path.
    Path,
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("TIDYDECK_JSON").as_deref() == Ok("1");

    if let Err(err) = run(cli.command, json_output) {
        let code = err
            .downcast_ref::<TidyDeckError>()
            .map(TidyDeckError::exit_code)
            .unwrap_or(ExitCode::GeneralError);

        if json_output {
            let _ = print_json(&json!({"status":"error","message":format!("{err:#}")}));
        } else {
            eprintln!("Error: {err:#}");
        }
        std::process::exit(code as i32);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, json_output: bool) -> Result<()> {
    let start = Instant::now();
    let config = AppConfig::load()?;

    match command {
        Commands::Decks => {
            let decks = match Collection::open_configured(&config)? {
                Some(col) => col.decks()?,
                None => return no_collection(json_output),
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":{"items":decks,"total":decks.len()},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Found {} decks:", decks.len());
                for deck in &decks {
                    println!("  {} ({} cards)", deck.name, deck.card_count);
                }
            }
        }

        Commands::Cards { deck, limit } => {
            let cards = match Collection::open_configured(&config)? {
                Some(col) => col.cards(Some(deck.as_str()), Some(limit))?,
                None => return no_collection(json_output),
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":{"items":cards,"total":cards.len(),"deck":deck},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Found {} cards in deck '{deck}':", cards.len());
                for card in &cards {
                    println!("  {}: {}", card.id, preview(card.fields.first(), 50));
                }
            }
        }

        Commands::Search { query, deck, limit } => {
            let cards = match Collection::open_configured(&config)? {
                Some(col) => col.search(&query, deck.as_deref(), Some(limit))?,
                None => return no_collection(json_output),
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":{"items":cards,"total":cards.len(),"query":query},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Found {} cards matching '{query}':", cards.len());
                for card in &cards {
                    println!("  {}: {}", card.deck_name, preview(card.fields.first(), 50));
                }
            }
        }

        Commands::Status { deck, limit } => {
            let status = match Collection::open_configured(&config)? {
                Some(col) => col.card_status(deck.as_deref(), Some(limit))?,
                None => return no_collection(json_output),
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":{"items":status,"total":status.len()},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("{:<16} {:<30} {:>5} {:>5} {:>8} {:>5} {:>6}", "card", "deck", "type", "queue", "due", "reps", "lapses");
                for row in &status {
                    let s = &row.scheduling;
                    println!(
                        "{:<16} {:<30} {:>5} {:>5} {:>8} {:>5} {:>6}",
                        row.id, row.deck_name, s.card_type, s.queue, s.due, s.reps, s.lapses
                    );
                }
            }
        }

        Commands::Templates => {
            let templates = match Collection::open_configured(&config)? {
                Some(col) => col.templates()?,
                None => return no_collection(json_output),
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":{"items":templates,"total":templates.len()},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Found {} templates:", templates.len());
                for template in &templates {
                    println!("  {}: {}", template.notetype_name, template.name);
                }
            }
        }

        Commands::Template { notetype, name } => {
            let Some(col) = Collection::open_configured(&config)? else {
                return no_collection(json_output);
            };
            let content = col.template_content(&notetype, &name)?.ok_or_else(|| {
                TidyDeckError::NotFound(format!("template '{name}' of note type '{notetype}'"))
            })?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":content,"meta":{"duration_ms":dur}}))?;
            } else {
                println!("{}: {}", content.notetype_name, content.name);
                println!("\n── Front ──\n{}", content.front_html);
                println!("\n── Back ──\n{}", content.back_html);
                if !content.browser_question.is_empty() {
                    println!("\n── Browser question ──\n{}", content.browser_question);
                }
            }
        }

        // ── Dedup ──────────────────────────────────────────────────────────

        Commands::Compare { deck1, deck2, field } => {
            let Some(col) = Collection::open_configured(&config)? else {
                return no_collection(json_output);
            };
            let notes1 = col.notes(Some(deck1.as_str()))?;
            let notes2 = col.notes(Some(deck2.as_str()))?;
            let field = field.unwrap_or(config.dedup.field_index);
            let report = analyze_overlap(&deck1, &notes1, &deck2, &notes2, field);
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":report,"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Deck comparison: '{deck1}' vs '{deck2}'");
                println!("  {deck1}: {} total notes", report.deck1_total_notes);
                println!("  {deck2}: {} total notes", report.deck2_total_notes);
                println!("  Overlap: {} notes", report.overlap_notes);
                println!("  {deck1} unique: {} notes", report.deck1_unique_notes);
                println!("  {deck2} unique: {} notes", report.deck2_unique_notes);
                println!(
                    "  Overlap percentage: {:.1}% of {deck1}, {:.1}% of {deck2}",
                    report.overlap_percentage_deck1, report.overlap_percentage_deck2
                );
            }
        }

        Commands::Dedupe { deck, fields, output } => {
            let Some(col) = Collection::open_configured(&config)? else {
                return no_collection(json_output);
            };
            let matcher = if fields.is_empty() {
                config.dedup.exact_matcher()
            } else {
                ExactFieldMatcher::default().with_fields(fields)
            };

            let candidates = col.notes(Some(deck.as_str()))?;
            let reference = col.notes(None)?;
            let outcome = remove_duplicate_notes(candidates, Some(deck.as_str()), &reference, &matcher);

            if outcome.unique.is_empty() {
                return nothing_to_export(json_output, outcome.duplicates.len());
            }

            let unique_ids: std::collections::HashSet<i64> =
                outcome.unique.iter().map(|n| n.id).collect();
            let cards: Vec<_> = col
                .cards(Some(deck.as_str()), None)?
                .into_iter()
                .filter(|card| card.note_id.is_some_and(|id| unique_ids.contains(&id)))
                .collect();

            let deck_name = format!("{deck} (Deduplicated)");
            let output = output.unwrap_or_else(|| config.export.output_path_for(&deck_name, ""));
            let result = export_cards_to_deck(&cards, &deck_name, Some(output.as_path()), &[])?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({
                    "status":"ok",
                    "data":{"export":result,"unique_notes":outcome.unique.len(),"duplicate_notes":outcome.duplicates.len()},
                    "meta":{"duration_ms":dur}
                }))?;
            } else {
                println!(
                    "Removed {} duplicate notes, kept {}.",
                    outcome.duplicates.len(),
                    outcome.unique.len()
                );
                println!("{}", result.message);
                println!("  → {}", result.deck_path.display());
            }
        }

        Commands::ImportDedupe { input, output } => {
            if !input.exists() {
                return Err(TidyDeckError::NotFound(format!("input file not found: {}", input.display())).into());
            }
            let collection = match Collection::open_configured(&config)? {
                Some(col) => col.notes(None)?,
                None => Vec::new(),
            };
            if !json_output {
                println!("Loading notes from {}...", input.display());
                println!("Comparing against {} notes in your collection...", collection.len());
            }

            let outcome = deduplicate_external_package(&input, &collection, &config.dedup.word_matcher())?;
            if outcome.unique.is_empty() {
                return nothing_to_export(json_output, outcome.duplicates.len());
            }

            let deck_name = format!("{} (Deduplicated)", file_stem(&input));
            let output = output.unwrap_or_else(|| config.export.output_path_for(&deck_name, ""));
            let result = export_notes_to_deck(&outcome.unique, &deck_name, Some(output.as_path()))?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({
                    "status":"ok",
                    "data":{"export":result,"unique_notes":outcome.unique.len(),"duplicate_notes":outcome.duplicates.len()},
                    "meta":{"duration_ms":dur}
                }))?;
            } else {
                println!("Found {} unique notes to export", outcome.unique.len());
                println!(
                    "Exported {} cards from {} unique notes to {}",
                    result.cards_created,
                    outcome.unique.len(),
                    result.deck_path.display()
                );
            }
        }

        // ── Inspect ────────────────────────────────────────────────────────

        Commands::Inspect { apkg } => {
            let summary = inspect_package(&apkg)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&json!({"status":"ok","data":summary,"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Inspecting {}...", apkg.display());
                println!("Deck names: {}", summary.deck_names.join(", "));
                println!("Total notes: {}", summary.note_count);
                println!("Total cards: {}", summary.card_count);
                println!("Total models: {} ({})", summary.model_names.len(), summary.model_names.join(", "));
                println!("Media files: {}", summary.media_count);

                if !summary.samples.is_empty() {
                    println!("\nSample notes:");
                    for (i, note) in summary.samples.iter().enumerate() {
                        let fields: Vec<String> = note.fields.iter().take(3).map(|f| preview(Some(f), 30)).collect();
                        println!("  {}. [Note {}] {}", i + 1, note.id, fields.join(" | "));
                    }

                    println!("\nField count distribution:");
                    for (count, notes) in &summary.field_count_distribution {
                        println!("  {count} fields: {notes} notes");
                    }
                }
            }
        }

        // ── Config ─────────────────────────────────────────────────────────

        Commands::Config { action } => {
            let dur = start.elapsed().as_millis();
            match action {
                ConfigAction::List => {
                    let collection = config.collection_path();
                    if json_output {
                        print_json(&json!({
                            "status":"ok",
                            "data":{"config":config,"config_path":AppConfig::config_path(),"collection":collection},
                            "meta":{"duration_ms":dur}
                        }))?;
                    } else {
                        print!("{}", config.to_toml()?);
                        match collection {
                            Some(path) => println!("\n# resolved collection: {}", path.display()),
                            None => println!("\n# resolved collection: none"),
                        }
                    }
                }
                ConfigAction::Path => {
                    let path = AppConfig::config_path();
                    if json_output {
                        print_json(&json!({"status":"ok","data":{"path":path},"meta":{"duration_ms":dur}}))?;
                    } else {
                        println!("{}", path.display());
                    }
                }
            }
        }
    }

    debug!("command finished in {} ms", start.elapsed().as_millis());
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

/// No collection found: listings are empty rather than an error.
fn no_collection(json_output: bool) -> Result<()> {
    if json_output {
        print_json(&json!({"status":"ok","data":{"items":[],"total":0},"meta":{"collection":null}}))?;
    } else {
        println!("No Anki collection found. Set TIDYDECK_COLLECTION or [collection] path in the config.");
    }
    Ok(())
}

fn nothing_to_export(json_output: bool, duplicates: usize) -> Result<()> {
    if json_output {
        print_json(&json!({"status":"ok","data":{"unique_notes":0,"duplicate_notes":duplicates}}))?;
    } else {
        println!("No unique notes to export!");
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string())
}

/// First `max` characters of a field, with `...` when cut.
fn preview(field: Option<&String>, max: usize) -> String {
    let Some(text) = field else {
        return "No content".to_string();
    };
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}
