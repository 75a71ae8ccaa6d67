//! Label-to-class-index assignment.
//!
//! The registry hands out dense, zero-based [`ClassId`]s in first-seen order.
//! Because first-seen order depends on traversal order, callers walk
//! annotation files in sorted order and reload the previous `classes.txt`
//! before appending to an existing dataset.

mod ids;
mod label;

pub use ids::ClassId;
pub use label::{CasePolicy, LabelCleaner};

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::RailprepError;
use crate::layout::write_atomic;

/// File name of the persisted class index.
pub const CLASS_INDEX_FILE: &str = "classes.txt";

/// Mapping from cleaned label to class index.
#[derive(Clone, Debug, Default)]
pub struct ClassRegistry {
    cleaner: LabelCleaner,
    names: Vec<String>,
    ids: HashMap<String, ClassId>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    pub fn new(cleaner: LabelCleaner) -> Self {
        Self {
            cleaner,
            names: Vec::new(),
            ids: HashMap::new(),
        }
    }

    /// Creates a registry pre-seeded with an ordered label list.
    ///
    /// Seeds are cleaned like any other label; a seed that cleans to the
    /// same entry as an earlier one is ignored.
    pub fn with_labels<I, S>(cleaner: LabelCleaner, labels: I) -> Result<Self, RailprepError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new(cleaner);
        for label in labels {
            registry.resolve(label.as_ref())?;
        }
        Ok(registry)
    }

    /// The cleaning rules this registry applies in [`ClassRegistry::resolve`].
    pub fn cleaner(&self) -> LabelCleaner {
        self.cleaner
    }

    /// Cleans a raw label and returns its class, registering it if new.
    pub fn resolve(&mut self, raw_label: &str) -> Result<ClassId, RailprepError> {
        let cleaned = self
            .cleaner
            .clean(raw_label)
            .ok_or_else(|| RailprepError::EmptyLabel {
                raw: raw_label.to_string(),
            })?;
        Ok(self.register(&cleaned))
    }

    /// Returns the class of an already-cleaned label, registering it if new.
    pub fn register(&mut self, cleaned: &str) -> ClassId {
        if let Some(id) = self.ids.get(cleaned) {
            return *id;
        }

        let id = ClassId::new(self.names.len());
        self.names.push(cleaned.to_string());
        self.ids.insert(cleaned.to_string(), id);
        log::debug!("registered class {} '{}'", id, cleaned);
        id
    }

    /// Forgets every class registered after the first `len`.
    ///
    /// Used to take back classes registered for a record that was not
    /// written after all.
    pub fn truncate(&mut self, len: usize) {
        let len = len.min(self.names.len());
        for name in self.names.drain(len..) {
            self.ids.remove(&name);
        }
    }

    /// Looks up an already-cleaned label without registering it.
    pub fn get(&self, cleaned: &str) -> Option<ClassId> {
        self.ids.get(cleaned).copied()
    }

    /// Returns the cleaned label of a class.
    pub fn name(&self, id: ClassId) -> Option<&str> {
        self.names.get(id.as_usize()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates classes in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(idx, name)| (ClassId::new(idx), name.as_str()))
    }

    /// Renders the class index file: one `<idx>: <label>` line per class.
    pub fn to_index_string(&self) -> String {
        self.iter()
            .map(|(id, name)| format!("{}: {}\n", id, name))
            .collect()
    }

    /// Writes the class index file.
    pub fn save(&self, path: &Path) -> Result<(), RailprepError> {
        write_atomic(path, self.to_index_string().as_bytes())
    }

    /// Reloads a class index written by [`ClassRegistry::save`].
    ///
    /// Entries are taken verbatim. Indices must be dense and ascending from 0.
    pub fn load(path: &Path, cleaner: LabelCleaner) -> Result<Self, RailprepError> {
        let data = fs::read_to_string(path).map_err(RailprepError::Io)?;
        Self::parse_index(&data, path, cleaner)
    }

    fn parse_index(data: &str, path: &Path, cleaner: LabelCleaner) -> Result<Self, RailprepError> {
        let mut registry = Self::new(cleaner);

        for (line_idx, line) in data.lines().enumerate() {
            let line_num = line_idx + 1;
            let invalid = |message: String| RailprepError::ClassIndexInvalid {
                path: path.to_path_buf(),
                line: line_num,
                message,
            };

            let Some((raw_idx, raw_name)) = line.split_once(':') else {
                return Err(invalid("expected '<idx>: <label>'".to_string()));
            };

            let idx = raw_idx
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(format!("invalid class index '{}'", raw_idx.trim())))?;
            if idx != registry.len() {
                return Err(invalid(format!(
                    "class index {} out of sequence; expected {}",
                    idx,
                    registry.len()
                )));
            }

            let name = raw_name.trim();
            if name.is_empty() {
                return Err(invalid(format!("class {} has an empty label", idx)));
            }
            if registry.get(name).is_some() {
                return Err(invalid(format!("label '{}' appears twice", name)));
            }

            registry.register(name);
        }

        Ok(registry)
    }
}

/// Fuzz-only entrypoint for class index parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_class_index(input: &str) -> Result<(), RailprepError> {
    let _ = ClassRegistry::parse_index(input, Path::new("<fuzz>"), LabelCleaner::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids_of(registry: &ClassRegistry) -> Vec<(usize, String)> {
        registry
            .iter()
            .map(|(id, name)| (id.as_usize(), name.to_string()))
            .collect()
    }

    #[test]
    fn case_insensitive_policy_merges_variants() {
        let mut registry = ClassRegistry::new(LabelCleaner::new(CasePolicy::Lowercase));
        for label in ["Vehicle", "train", "vehicle"] {
            registry.resolve(label).expect("non-empty label");
        }

        assert_eq!(
            ids_of(&registry),
            vec![(0, "vehicle".to_string()), (1, "train".to_string())]
        );
    }

    #[test]
    fn case_sensitive_policy_keeps_variants_apart() {
        let mut registry = ClassRegistry::new(LabelCleaner::new(CasePolicy::Preserve));
        for label in ["Vehicle", "train", "vehicle"] {
            registry.resolve(label).expect("non-empty label");
        }

        assert_eq!(
            ids_of(&registry),
            vec![
                (0, "Vehicle".to_string()),
                (1, "train".to_string()),
                (2, "vehicle".to_string())
            ]
        );
    }

    #[test]
    fn punctuation_variants_share_an_entry() {
        let mut registry = ClassRegistry::new(LabelCleaner::default());
        let a = registry.resolve("level/crossing").expect("label");
        let b = registry.resolve(" Level:Crossing ").expect("label");
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_label_is_not_registered() {
        let mut registry = ClassRegistry::new(LabelCleaner::default());
        let err = registry.resolve("   ").unwrap_err();
        assert!(matches!(err, RailprepError::EmptyLabel { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn seeded_labels_take_the_first_ids() {
        let mut registry =
            ClassRegistry::with_labels(LabelCleaner::default(), ["TRAIN", "Vehicle", "train"])
                .expect("seed labels");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("pedestrian").expect("label"), ClassId(2));
        assert_eq!(registry.get("vehicle"), Some(ClassId(1)));
    }

    #[test]
    fn truncate_forgets_later_classes() {
        let mut registry =
            ClassRegistry::with_labels(LabelCleaner::default(), ["vehicle", "train"])
                .expect("seed labels");
        registry.register("person");
        registry.truncate(2);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("person"), None);
        assert_eq!(registry.register("signal"), ClassId(2));

        registry.truncate(10);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn index_file_roundtrips() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join(CLASS_INDEX_FILE);

        let registry =
            ClassRegistry::with_labels(LabelCleaner::default(), ["vehicle", "train", "pedestrian"])
                .expect("seed labels");
        registry.save(&path).expect("save registry");

        assert_eq!(
            fs::read_to_string(&path).expect("read index"),
            "0: vehicle\n1: train\n2: pedestrian\n"
        );

        let mut restored = ClassRegistry::load(&path, LabelCleaner::default()).expect("load");
        assert_eq!(ids_of(&restored), ids_of(&registry));
        assert_eq!(restored.resolve("crossing").expect("label"), ClassId(3));
    }

    #[test]
    fn load_rejects_gaps_and_duplicates() {
        let path = Path::new("classes.txt");

        let err = ClassRegistry::parse_index("0: a\n2: b\n", path, LabelCleaner::default())
            .unwrap_err();
        assert!(matches!(err, RailprepError::ClassIndexInvalid { line: 2, .. }));

        let err = ClassRegistry::parse_index("0: a\n1: a\n", path, LabelCleaner::default())
            .unwrap_err();
        assert!(matches!(err, RailprepError::ClassIndexInvalid { line: 2, .. }));

        let err =
            ClassRegistry::parse_index("zero: a\n", path, LabelCleaner::default()).unwrap_err();
        assert!(matches!(err, RailprepError::ClassIndexInvalid { line: 1, .. }));
    }
}
