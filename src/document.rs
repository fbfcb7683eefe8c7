//! Template Documents - Layered Stencils
//!
//! The engine only ever reads a document. Per-row content is supplied as a
//! side-table of overrides (see `pipeline::UnitPlan`), never by mutating nodes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::directive::{self, DirectiveError, DirectiveKind, LayerDirective, Parsed};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Template unreadable: {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Template {path} requires engine >= {required}, current is {current}")]
    EngineVersionMismatch {
        path: PathBuf,
        required: String,
        current: String,
    },
}

/// Integer pixel rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self { left, top, width, height }
    }

    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Text,
    Pixel,
}

/// Styling a text layer was authored with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    pub font_size: f32,
    pub color: [u8; 4],
}

impl Default for TextStyle {
    fn default() -> Self {
        Self { font_size: default_font_size(), color: default_text_color() }
    }
}

fn default_font_size() -> f32 { 24.0 }
fn default_text_color() -> [u8; 4] { [0, 0, 0, 255] }
fn default_true() -> bool { true }

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateNode {
    pub name: String,
    pub kind: NodeKind,
    pub bounds: Rect,
    pub visible: bool,
    pub directive: Option<LayerDirective>,
    pub text_style: TextStyle,
    /// Flat colour painted over the bounds when the node has no pixel data.
    pub fill: Option<[u8; 4]>,
    /// Encoded PNG of the node's own pixels, positioned at `bounds`.
    pub pixels: Option<Vec<u8>>,
    pub children: Vec<TemplateNode>,
}

/// Index path from the document root to a node.
pub type NodePath = Vec<usize>;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveIssue {
    pub node: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TemplateDocument {
    pub file_path: PathBuf,
    pub prefix: String,
    pub suffix: String,
    pub canvas: Size,
    pub background: [u8; 4],
    pub nodes: Vec<TemplateNode>,
    /// Node names that looked managed but could not be used.
    pub directive_issues: Vec<DirectiveIssue>,
}

/// Split a file stem at its first `#`: `camp#summer` -> (`camp`, `summer`).
pub fn split_stem(stem: &str) -> (String, String) {
    match stem.split_once('#') {
        Some((prefix, suffix)) => (prefix.to_string(), suffix.to_string()),
        None => (stem.to_string(), String::new()),
    }
}

/// Prefix/suffix of a template path, from its file stem.
pub fn prefix_and_suffix(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    split_stem(&stem)
}

impl TemplateDocument {
    pub fn new(file_path: impl Into<PathBuf>, canvas: Size, nodes: Vec<TemplateNode>) -> Self {
        let file_path = file_path.into();
        let (prefix, suffix) = prefix_and_suffix(&file_path);
        let mut document = Self {
            file_path,
            prefix,
            suffix,
            canvas,
            background: [0, 0, 0, 0],
            nodes,
            directive_issues: vec![],
        };
        document.attach_directives();
        document
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Every managed node, in document order, with its path.
    pub fn managed_nodes(&self) -> Vec<(NodePath, &TemplateNode, &LayerDirective)> {
        let mut found = vec![];
        collect_managed(&self.nodes, &mut vec![], &mut found);
        found
    }

    pub fn directives(&self) -> Vec<&LayerDirective> {
        self.managed_nodes().into_iter().map(|(_, _, d)| d).collect()
    }

    pub fn node(&self, path: &[usize]) -> Option<&TemplateNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get(*first)?;
        for index in rest {
            node = node.children.get(*index)?;
        }
        Some(node)
    }

    fn attach_directives(&mut self) {
        let mut issues = vec![];
        for node in &mut self.nodes {
            attach(node, &mut issues);
        }
        for issue in &issues {
            warn!(
                template = %self.file_path.display(),
                node = %issue.node,
                "{}",
                issue.message
            );
        }
        self.directive_issues = issues;
    }
}

fn attach(node: &mut TemplateNode, issues: &mut Vec<DirectiveIssue>) {
    node.directive = match directive::parse(&node.name) {
        Ok(Parsed::Managed(d)) => {
            let on_group = node.kind == NodeKind::Group;
            if on_group && !matches!(d.kind, DirectiveKind::Visibility) {
                issues.push(DirectiveIssue {
                    node: node.name.clone(),
                    message: format!("{} directive cannot drive a group", d.kind.label()),
                });
                None
            } else {
                Some(d)
            }
        }
        Ok(Parsed::NotManaged) => None,
        Err(e) => {
            issues.push(issue_from(&node.name, &e));
            None
        }
    };
    for child in &mut node.children {
        attach(child, issues);
    }
}

fn issue_from(name: &str, error: &DirectiveError) -> DirectiveIssue {
    DirectiveIssue { node: name.to_string(), message: error.to_string() }
}

fn collect_managed<'a>(
    nodes: &'a [TemplateNode],
    path: &mut NodePath,
    found: &mut Vec<(NodePath, &'a TemplateNode, &'a LayerDirective)>,
) {
    for (index, node) in nodes.iter().enumerate() {
        path.push(index);
        if let Some(d) = &node.directive {
            found.push((path.clone(), node, d));
        }
        collect_managed(&node.children, path, found);
        path.pop();
    }
}

/// Reads template documents from disk.
pub trait DocumentReader {
    /// File extension (without dot) of documents this reader understands.
    fn extension(&self) -> &str;
    fn open_template(&self, path: &Path) -> Result<TemplateDocument, DocumentError>;
}

// --- JSON layered-document format ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLayout {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub background: Option<[u8; 4]>,
    #[serde(default)]
    pub engine_min_version: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeLayout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLayout {
    pub name: String,
    pub kind: NodeKind,
    pub bounds: Rect,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub fill: Option<[u8; 4]>,
    /// Base64 PNG.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_text_color")]
    pub color: [u8; 4],
    #[serde(default)]
    pub children: Vec<NodeLayout>,
}

impl NodeLayout {
    fn into_node(self, path: &Path) -> Result<TemplateNode, DocumentError> {
        let pixels = match self.data {
            Some(encoded) => Some(
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())
                    .map_err(|e| DocumentError::Unreadable {
                        path: path.to_path_buf(),
                        reason: format!("node '{}' has invalid pixel data: {}", self.name, e),
                    })?,
            ),
            None => None,
        };
        let children = self
            .children
            .into_iter()
            .map(|c| c.into_node(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TemplateNode {
            name: self.name,
            kind: self.kind,
            bounds: self.bounds,
            visible: self.visible,
            directive: None,
            text_style: TextStyle { font_size: self.font_size, color: self.color },
            fill: self.fill,
            pixels,
            children,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct JsonDocumentReader;

impl JsonDocumentReader {
    pub fn new() -> Self {
        Self
    }

    pub fn from_layout(path: &Path, layout: DocumentLayout) -> Result<TemplateDocument, DocumentError> {
        if let Some(required) = &layout.engine_min_version {
            check_engine_version(path, required)?;
        }
        let nodes = layout
            .nodes
            .into_iter()
            .map(|n| n.into_node(path))
            .collect::<Result<Vec<_>, _>>()?;
        let mut document = TemplateDocument::new(path, Size::new(layout.width, layout.height), nodes);
        if let Some(bg) = layout.background {
            document.background = bg;
        }
        Ok(document)
    }
}

impl DocumentReader for JsonDocumentReader {
    fn extension(&self) -> &str {
        "json"
    }

    fn open_template(&self, path: &Path) -> Result<TemplateDocument, DocumentError> {
        let unreadable = |reason: String| DocumentError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let layout: DocumentLayout =
            serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        if layout.width == 0 || layout.height == 0 {
            return Err(unreadable("canvas has zero area".into()));
        }
        let document = Self::from_layout(path, layout)?;
        debug!(
            template = %path.display(),
            managed = document.managed_nodes().len(),
            "opened template"
        );
        Ok(document)
    }
}

fn check_engine_version(path: &Path, required: &str) -> Result<(), DocumentError> {
    let engine = semver::Version::parse(ENGINE_VERSION).map_err(|e| DocumentError::Unreadable {
        path: path.to_path_buf(),
        reason: format!("invalid engine version: {}", e),
    })?;
    let min = semver::Version::parse(required).map_err(|e| DocumentError::Unreadable {
        path: path.to_path_buf(),
        reason: format!("invalid engineMinVersion '{}': {}", required, e),
    })?;
    if engine < min {
        return Err(DocumentError::EngineVersionMismatch {
            path: path.to_path_buf(),
            required: required.to_string(),
            current: ENGINE_VERSION.to_string(),
        });
    }
    Ok(())
}
