//! Label vocabulary
//!
//! The position of a class name in the vocabulary is the index of the model
//! output unit for that class. Vocabularies are persisted as plain text, one
//! name per line in index order.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::error::{LeafGuardError, Result};

/// Ordered, duplicate-free list of class names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    /// Build a vocabulary, rejecting empty lists, blank names and duplicates.
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(LeafGuardError::Dataset(
                "label vocabulary must contain at least one class".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if label.trim().is_empty() {
                return Err(LeafGuardError::Dataset("blank class name".to_string()));
            }
            if label.contains('\n') || label.contains('\r') {
                return Err(LeafGuardError::Dataset(format!(
                    "class name contains a line break: {:?}",
                    label
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(LeafGuardError::Dataset(format!(
                    "duplicate class name: {}",
                    label
                )));
            }
        }

        Ok(Self { labels })
    }

    /// Vocabulary from discovered class directory names, sorted lexicographically
    pub fn from_class_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut labels: Vec<String> = names.into_iter().map(Into::into).collect();
        labels.sort();
        Self::new(labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == name)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// SHA-256 over the names in index order. Reordering changes the fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for label in &self.labels {
            hasher.update(label.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Write one label per line, in index order
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut contents = self.labels.join("\n");
        contents.push('\n');
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Read a label file written by [`LabelVocabulary::save`].
    ///
    /// Trailing blank lines are ignored; blank lines in between are an error
    /// because they would shift every following index.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LeafGuardError::PathNotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let mut lines: Vec<String> = contents
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }

        Self::new(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_class_names_sorts() {
        let vocab = LabelVocabulary::from_class_names([
            "Tomato___healthy",
            "Apple___Black_rot",
            "Corn_(maize)___Common_rust_",
        ])
        .unwrap();

        assert_eq!(vocab.get(0), Some("Apple___Black_rot"));
        assert_eq!(vocab.get(2), Some("Tomato___healthy"));
        assert_eq!(vocab.index_of("Corn_(maize)___Common_rust_"), Some(1));
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(LabelVocabulary::new(vec![]).is_err());
        assert!(LabelVocabulary::new(names(&["a", "a"])).is_err());
        assert!(LabelVocabulary::new(names(&["a", " "])).is_err());
    }

    #[test]
    fn test_save_writes_one_label_per_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("labels.txt");
        let vocab = LabelVocabulary::new(names(&["Apple___healthy", "Grape___Esca"])).unwrap();

        vocab.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Apple___healthy\nGrape___Esca\n");
        assert_eq!(LabelVocabulary::load(&path).unwrap(), vocab);
    }

    #[test]
    fn test_load_rejects_interior_blank_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "a\n\nb\n").unwrap();

        assert!(LabelVocabulary::load(&path).is_err());
    }

    #[test]
    fn test_load_handles_crlf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "a\r\nb\r\n\r\n").unwrap();

        let vocab = LabelVocabulary::load(&path).unwrap();
        assert_eq!(vocab.labels(), &names(&["a", "b"])[..]);
    }

    #[test]
    fn test_fingerprint_depends_on_order() {
        let ab = LabelVocabulary::new(names(&["a", "b"])).unwrap();
        let ba = LabelVocabulary::new(names(&["b", "a"])).unwrap();
        assert_ne!(ab.fingerprint(), ba.fingerprint());
        assert_eq!(ab.fingerprint(), ab.clone().fingerprint());
    }
}
