use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Coarse content group of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentGroup {
    Json,
    Code,
    Other,
}

impl ContentGroup {
    /// Whether a JSON parse is worth attempting.
    pub fn is_parseable(&self) -> bool {
        matches!(self, ContentGroup::Json | ContentGroup::Code)
    }
}

pub trait ContentClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> ContentGroup;
}

const SNIFF_LEN: usize = 512;
const CODE_EXTENSIONS: &[&str] = &["sql", "py", "rs", "js", "ts", "yaml", "yml", "toml"];

/// Classifies by extension, falling back to the first non-blank bytes of the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct SniffingClassifier;

impl ContentClassifier for SniffingClassifier {
    fn classify(&self, path: &Path) -> ContentGroup {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        if extension.as_deref() == Some("json") {
            return ContentGroup::Json;
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        let read = File::open(path).and_then(|f| f.take(SNIFF_LEN as u64).read_to_end(&mut head));
        if read.is_err() {
            return ContentGroup::Other;
        }

        // binary payloads are never schemas
        if head.contains(&0) {
            return ContentGroup::Other;
        }

        match head.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') | Some(b'[') => ContentGroup::Json,
            _ if extension
                .as_deref()
                .is_some_and(|e| CODE_EXTENSIONS.contains(&e)) =>
            {
                ContentGroup::Code
            }
            _ => ContentGroup::Other,
        }
    }
}
