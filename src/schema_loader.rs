use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::catalog::{SchemaMap, TableSchema};
use crate::classifier::{ContentClassifier, SniffingClassifier};
use crate::config::SCHEMA_SNAPSHOT_FILE;
use crate::error::AssistantError;
use crate::schema_store::WATERMARK_FILE;
use crate::storage;

/// Reads the cached schema files back into a [`SchemaMap`].
pub struct SchemaLoader {
    schema_root: PathBuf,
    classifier: Box<dyn ContentClassifier>,
}

impl SchemaLoader {
    pub fn new(schema_root: impl Into<PathBuf>) -> Self {
        Self::with_classifier(schema_root, Box::new(SniffingClassifier))
    }

    pub fn with_classifier(
        schema_root: impl Into<PathBuf>,
        classifier: Box<dyn ContentClassifier>,
    ) -> Self {
        Self {
            schema_root: schema_root.into(),
            classifier,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.schema_root.join(SCHEMA_SNAPSHOT_FILE)
    }

    /// Walks the schema tree, rebuilds the map and persists it as the snapshot.
    ///
    /// Files that are not JSON-like, or do not parse as a column list, are skipped.
    pub fn load(&self) -> Result<SchemaMap, AssistantError> {
        if !self.schema_root.is_dir() {
            return Err(AssistantError::MissingPrerequisite {
                path: self.schema_root.display().to_string(),
            });
        }

        let mut schema_map = SchemaMap::new();
        // dot entries are staging files left by interrupted atomic writes
        let walker = WalkDir::new(&self.schema_root)
            .min_depth(1)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable schema entry: {}", e);
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            match (entry.depth(), entry.file_type().is_dir()) {
                (1, true) => {
                    schema_map.entry(name).or_default();
                }
                (2, false) if entry.file_type().is_file() => {
                    if name == WATERMARK_FILE {
                        continue;
                    }
                    if let Some((dataset, table, columns)) = self.read_table(entry.path()) {
                        schema_map.entry(dataset).or_default().insert(table, columns);
                    }
                }
                _ => {}
            }
        }

        storage::write_json(&self.snapshot_path(), &schema_map)?;
        info!(
            "Loaded {} tables across {} datasets into {}",
            schema_map.values().map(|tables| tables.len()).sum::<usize>(),
            schema_map.len(),
            self.snapshot_path().display()
        );

        Ok(schema_map)
    }

    /// Reads the snapshot written by the last [`SchemaLoader::load`].
    pub fn load_snapshot(&self) -> Result<SchemaMap, AssistantError> {
        storage::read_required_json(&self.snapshot_path())
    }

    fn read_table(&self, path: &Path) -> Option<(String, String, TableSchema)> {
        if !self.classifier.classify(path).is_parseable() {
            debug!("Skipping non-JSON file {}", path.display());
            return None;
        }

        let dataset = path.parent()?.file_name()?.to_string_lossy().to_string();
        let table = path.file_stem()?.to_string_lossy().to_string();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Skipping unreadable {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<TableSchema>(&contents) {
            Ok(columns) => Some((dataset, table, columns)),
            Err(e) => {
                debug!("Skipping malformed schema {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}
