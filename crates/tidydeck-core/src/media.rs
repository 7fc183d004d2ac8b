use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::models::MediaFile;
use crate::package::Package;

static IMG_SRC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).unwrap());

static SOUND_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[sound:([^\]]+)\]").unwrap());

/// Filenames referenced by `<img src=...>` and `[sound:...]` markup.
pub fn detect_media<S: AsRef<str>>(fields: &[S]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for field in fields {
        let field = field.as_ref();
        for caps in IMG_SRC_REGEX.captures_iter(field) {
            found.insert(caps[1].to_string());
        }
        for caps in SOUND_REGEX.captures_iter(field) {
            found.insert(caps[1].to_string());
        }
    }
    found
}

/// Binds referenced filenames to payloads stored in a package.
///
/// Payloads are read from the zip only when first referenced and then shared,
/// so every note pointing at the same file holds the same `Arc`.
pub struct MediaResolver<'a> {
    package: &'a mut Package,
    disk_names: HashMap<String, String>,
    cache: HashMap<String, Arc<MediaFile>>,
}

impl<'a> MediaResolver<'a> {
    pub fn new(package: &'a mut Package) -> Self {
        let disk_names = package
            .media_map()
            .iter()
            .map(|(disk, logical)| (logical.clone(), disk.clone()))
            .collect();
        Self {
            package,
            disk_names,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, filename: &str) -> Option<Arc<MediaFile>> {
        if let Some(hit) = self.cache.get(filename) {
            return Some(Arc::clone(hit));
        }

        let Some(disk_name) = self.disk_names.get(filename) else {
            warn!("Media file not found: {filename}");
            return None;
        };

        match self.package.read_media(disk_name) {
            Ok(data) => {
                let media = Arc::new(MediaFile::new(filename, data));
                self.cache.insert(filename.to_string(), Arc::clone(&media));
                Some(media)
            }
            Err(e) => {
                warn!("Media file {filename} ({disk_name}) unreadable: {e}");
                None
            }
        }
    }

    pub fn bind(&mut self, filenames: &BTreeSet<String>) -> Vec<Arc<MediaFile>> {
        filenames
            .iter()
            .filter_map(|name| self.resolve(name))
            .collect()
    }

    pub fn bind_fields<S: AsRef<str>>(&mut self, fields: &[S]) -> Vec<Arc<MediaFile>> {
        let names = detect_media(fields);
        self.bind(&names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_image_and_sound() {
        let found = detect_media(&["<img src=\"x.jpg\">", "[sound:y.mp3]"]);
        assert_eq!(found, set(&["x.jpg", "y.mp3"]));
    }

    #[test]
    fn test_detect_audio_among_plain_fields() {
        let fields = [
            "その子は大粒の涙を浮かべていたの。",
            "The child's eyes were brimming with big tears.<br />粒 -- grain, drop",
            "[sound:a8243f998a6ba4f0c5d57f6eaeb2d66c.mp3]",
            "",
            "sentence:304524",
        ];
        assert_eq!(
            detect_media(&fields),
            set(&["a8243f998a6ba4f0c5d57f6eaeb2d66c.mp3"])
        );
    }

    #[test]
    fn test_detect_is_case_insensitive() {
        let found = detect_media(&["Text with <IMG SRC=\"photo.PNG\">", "[SOUND:audio.MP3]"]);
        assert_eq!(found, set(&["photo.PNG", "audio.MP3"]));
    }

    #[test]
    fn test_detect_collapses_duplicates() {
        let found = detect_media(&[
            "<img src=\"same.jpg\">",
            "[sound:same.mp3]",
            "<img src='same.jpg'>",
            "[sound:same.mp3]",
        ]);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_detect_in_complex_html() {
        let found = detect_media(&[
            "<div><img src=\"complex.jpg\" alt=\"test\" class=\"image\"></div>",
            "<p>Text before <img src=\"inline.png\" /> text after</p>",
            "Text <img src=\"pic1.jpg\"> more [sound:file.mp3] end",
        ]);
        assert_eq!(found, set(&["complex.jpg", "inline.png", "pic1.jpg", "file.mp3"]));
    }

    #[test]
    fn test_detect_nothing() {
        assert!(detect_media(&["Plain text", "No media here"]).is_empty());
        assert!(detect_media::<&str>(&[]).is_empty());
    }
}
