use serde::{Deserialize, Serialize};

/// Separator between deck hierarchy levels inside the live collection.
pub const HIERARCHY_SEPARATOR: char = '\u{1f}';

/// Separator between deck hierarchy levels shown to users.
pub const EXTERNAL_SEPARATOR: &str = "::";

/// A deck with its derived card count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub card_count: u32,
}

/// `Parent\x1fChild` → `Parent::Child`
pub fn deck_name_to_external(internal: &str) -> String {
    internal.replace(HIERARCHY_SEPARATOR, EXTERNAL_SEPARATOR)
}

/// `Parent::Child` → `Parent\x1fChild`
pub fn deck_name_to_internal(external: &str) -> String {
    external.replace(EXTERNAL_SEPARATOR, &HIERARCHY_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deck_name_translation_roundtrip() {
        let internal = deck_name_to_internal("A::B");
        assert_eq!(internal, "A\u{1f}B");
        assert_eq!(deck_name_to_external(&internal), "A::B");
    }

    #[test]
    fn test_deck_name_translation_nested() {
        let external = "Japanese::Core 2k::Audio";
        assert_eq!(
            deck_name_to_external(&deck_name_to_internal(external)),
            external
        );
        assert_eq!(deck_name_to_internal("Default"), "Default");
    }
}
