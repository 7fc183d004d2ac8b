use serde::{Deserialize, Serialize};

/// A card template as listed from the live collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub name: String,
    pub notetype_name: String,
    pub notetype_id: i64,
}

/// A card template with its HTML recovered from the template config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContent {
    pub name: String,
    pub notetype_name: String,
    pub front_html: String,
    pub back_html: String,
    pub browser_question: String,
}
