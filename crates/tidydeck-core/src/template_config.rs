//! Best-effort reader for the binary per-template config blob stored in
//! `templates.config`.
//!
//! The blob is a protobuf message, but only three string fields are of
//! interest (question, answer, browser question). This is a single-byte
//! length-prefix scanner, not a protobuf parser: anything it cannot make sense
//! of is skipped, and the result always carries three strings.

use tracing::debug;

const FRONT_TAG: u8 = 0x0A;
const BACK_TAG: u8 = 0x12;
const BROWSER_QUESTION_TAG: u8 = 0x1A;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSections {
    pub front_html: String,
    pub back_html: String,
    pub browser_question: String,
}

/// How the sections were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Three sections were found.
    Complete,
    /// The scan reached the end with fewer than three sections.
    Padded,
    /// A tag or length prefix ran past the end of the blob.
    Truncated,
}

/// Decoder output. Always populated; `status` tells whether it is a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDecode {
    pub sections: TemplateSections,
    pub status: DecodeStatus,
}

impl TemplateDecode {
    pub fn is_complete(&self) -> bool {
        self.status == DecodeStatus::Complete
    }

    pub fn into_sections(self) -> TemplateSections {
        self.sections
    }
}

pub fn decode_template_config(blob: &[u8]) -> TemplateDecode {
    let mut parts: Vec<String> = Vec::with_capacity(3);
    let mut truncated = false;
    let mut i = 0;

    while i < blob.len() {
        match blob[i] {
            FRONT_TAG | BACK_TAG | BROWSER_QUESTION_TAG => {
                let Some(&len) = blob.get(i + 1) else {
                    truncated = true;
                    break;
                };
                let start = i + 2;
                let end = start + len as usize;
                if end > blob.len() {
                    truncated = true;
                    break;
                }
                parts.push(lossy_utf8(&blob[start..end]).trim().to_string());
                i = end;
            }
            _ => i += 1,
        }
    }

    let status = if truncated {
        DecodeStatus::Truncated
    } else if parts.len() >= 3 {
        DecodeStatus::Complete
    } else {
        DecodeStatus::Padded
    };
    if status != DecodeStatus::Complete {
        debug!(
            "template config: recovered {} of 3 sections ({status:?})",
            parts.len().min(3)
        );
    }

    let mut parts = parts.into_iter();
    let sections = TemplateSections {
        front_html: parts.next().unwrap_or_default(),
        back_html: parts.next().unwrap_or_default(),
        browser_question: parts.next().unwrap_or_default(),
    };

    TemplateDecode { sections, status }
}

/// UTF-8 decode that drops invalid sequences instead of replacing them.
fn lossy_utf8(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}
