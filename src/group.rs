//! Template Groups - Variants Sharing One Dataset
//!
//! `camp#summer.json` and `camp#winter.json` both belong to group `camp` and
//! render from the `camp` dataset.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::directive::LayerDirective;
use crate::document::{prefix_and_suffix, DocumentError, DocumentReader, TemplateDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    Discovered,
    Validated,
    Rendering,
    Completed,
}

impl GroupState {
    pub fn can_advance_to(self, next: GroupState) -> bool {
        use GroupState::*;
        matches!(
            (self, next),
            (Discovered, Validated) | (Discovered, Completed) | (Validated, Rendering) | (Validated, Completed) | (Rendering, Completed)
        )
    }
}

pub struct TemplateGroup {
    pub prefix: String,
    pub documents: Vec<TemplateDocument>,
    pub shared_dataset: Dataset,
    /// Templates sharing the prefix before any suffix filter.
    discovered: usize,
    state: GroupState,
}

impl TemplateGroup {
    pub fn new(prefix: impl Into<String>, documents: Vec<TemplateDocument>, shared_dataset: Dataset) -> Self {
        Self {
            prefix: prefix.into(),
            discovered: documents.len(),
            documents,
            shared_dataset,
            state: GroupState::Discovered,
        }
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: GroupState) {
        debug_assert!(self.state.can_advance_to(next), "{:?} -> {:?}", self.state, next);
        debug!(group = %self.prefix, from = ?self.state, to = ?next, "group state");
        self.state = next;
    }

    /// Union of directives across all documents, in discovery order.
    pub fn directives(&self) -> Vec<&LayerDirective> {
        self.documents.iter().flat_map(|d| d.directives()).collect()
    }

    pub fn with_discovered(mut self, discovered: usize) -> Self {
        self.discovered = discovered.max(self.documents.len());
        self
    }

    pub fn discovered(&self) -> usize {
        self.discovered
    }

    /// Output names carry the suffix whenever the prefix has several templates,
    /// even if only one of them is being rendered.
    pub fn is_multi_document(&self) -> bool {
        self.discovered > 1
    }
}

/// Template files in `dir` whose prefix is `prefix`, sorted by file name.
///
/// `only` restricts the result to the listed suffixes.
pub fn discover_templates(
    dir: &Path,
    prefix: &str,
    extension: &str,
    only: &[String],
) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut matches = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |e| e != extension) {
            continue;
        }
        let (file_prefix, suffix) = prefix_and_suffix(&path);
        if file_prefix != prefix {
            continue;
        }
        if !only.is_empty() && !only.iter().any(|s| s == &suffix) {
            continue;
        }
        matches.push(path);
    }
    matches.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!(prefix, count = matches.len(), "discovered templates");
    Ok(matches)
}

/// Every distinct prefix among template files in `dir`, sorted.
pub fn list_prefixes(dir: &Path, extension: &str) -> Result<Vec<String>, std::io::Error> {
    let mut prefixes = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == extension) {
            let (prefix, _) = prefix_and_suffix(&path);
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
    }
    prefixes.sort();
    Ok(prefixes)
}

/// Open every discovered template. The first unreadable one fails the lot.
pub fn open_all(reader: &dyn DocumentReader, paths: &[PathBuf]) -> Result<Vec<TemplateDocument>, DocumentError> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let document = reader.open_template(path)?;
        info!(template = %document.file_name(), directives = document.directives().len(), "loaded template");
        documents.push(document);
    }
    Ok(documents)
}
