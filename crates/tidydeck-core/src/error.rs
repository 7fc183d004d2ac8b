use thiserror::Error;

/// All errors that can occur in tidydeck-core.
#[derive(Debug, Error)]
pub enum TidyDeckError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid package format: {0}")]
    Format(String),

    #[error("Corrupt collection schema: {0}")]
    CorruptSchema(String),

    #[error("Card {card_id} has no note type reference")]
    MissingModel { card_id: i64 },

    #[error("Card {card_id} has no source note id")]
    MissingNoteId { card_id: i64 },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Process exit codes used by the CLI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotFound = 2,
    InvalidArgs = 3,
    FileSystemError = 4,
}

impl TidyDeckError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            TidyDeckError::NotFound(_) => ExitCode::NotFound,
            TidyDeckError::Format(_)
            | TidyDeckError::CorruptSchema(_)
            | TidyDeckError::Io(_)
            | TidyDeckError::Zip(_) => ExitCode::FileSystemError,
            TidyDeckError::ConfigError(_) => ExitCode::InvalidArgs,
            _ => ExitCode::GeneralError,
        }
    }
}

pub type Result<T> = std::result::Result<T, TidyDeckError>;
