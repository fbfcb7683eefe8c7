//! Render Pipeline - Single Entry Point
//!
//! CRITICAL: every group is validated before its first row renders. No bypass.
//!
//! A group moves Discovered -> Validated -> Rendering -> Completed. Each
//! (row, document) unit renders from a fresh side-table of node overrides;
//! the template documents themselves are never touched. A failing unit is
//! recorded and the loop moves on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compositor::{GeometryError, ImageCompositor, ImagePlacement};
use crate::config::RenderConfig;
use crate::dataset::{coerce_visibility, preprocess_text, DataRow, Dataset, DatasetReader, JsonDatasetReader};
use crate::directive::{DirectiveKind, TextParams};
use crate::document::{
    prefix_and_suffix, DirectiveIssue, DocumentReader, JsonDocumentReader, NodePath, Size, TemplateDocument, TemplateNode,
};
use crate::fonts::{FontError, FontFace, FontSource};
use crate::group::{discover_templates, open_all, GroupState, TemplateGroup};
use crate::hashing::{compute_manifest_hash, sha256_hex};
use crate::raster::RasterWriter;
use crate::text::{PlacedBox, TextBlock, TextLayoutEngine};
use crate::validation::{RowValidator, ValidationReport};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// Failure of a single (row, document) unit. The batch continues.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UnitError {
    #[error("{message}")]
    FontNotFound { message: String },

    #[error("{message}")]
    InvalidImageGeometry { message: String },

    #[error("Image source unreadable: {path}: {reason}")]
    ImageSourceUnreadable { path: String, reason: String },

    #[error("Rasterization failed: {reason}")]
    RasterizationFailed { reason: String },

    #[error("Could not write {path}: {reason}")]
    OutputWriteFailed { path: String, reason: String },
}

impl From<FontError> for UnitError {
    fn from(e: FontError) -> Self {
        UnitError::FontNotFound { message: e.to_string() }
    }
}

impl From<GeometryError> for UnitError {
    fn from(e: GeometryError) -> Self {
        UnitError::InvalidImageGeometry { message: e.to_string() }
    }
}

/// Failure that stops a whole group before or instead of rendering.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GroupError {
    #[error("Dataset is missing required columns: {}", columns.join(", "))]
    MissingColumn { columns: Vec<String> },

    #[error("Dataset unreadable: {reason}")]
    DatasetUnreadable { reason: String },

    #[error("Template unreadable: {reason}")]
    TemplateUnreadable { reason: String },

    #[error("No templates with prefix '{prefix}' in {dir}")]
    NoTemplates { prefix: String, dir: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    #[value(alias = "jpeg")]
    Jpg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
        }
    }
}

// --- Per-unit side-table ---

pub struct TextOverride {
    pub block: TextBlock,
    pub placed: PlacedBox,
    pub params: TextParams,
    pub color: [u8; 4],
    pub face: Rc<dyn FontFace>,
}

pub struct ImageOverride {
    pub image: image::RgbaImage,
    pub placement: ImagePlacement,
}

pub enum NodeOverride {
    Visibility(bool),
    Text(TextOverride),
    Image(ImageOverride),
    /// Managed content slot with nothing to show for this row.
    Blank,
}

/// Everything a writer needs to know about one row, keyed by node path.
#[derive(Default)]
pub struct UnitPlan {
    overrides: HashMap<NodePath, NodeOverride>,
}

impl UnitPlan {
    pub fn insert(&mut self, path: NodePath, value: NodeOverride) {
        self.overrides.insert(path, value);
    }

    pub fn get(&self, path: &[usize]) -> Option<&NodeOverride> {
        self.overrides.get(path)
    }

    /// Effective visibility of a node for this unit.
    pub fn is_visible(&self, path: &[usize], node: &TemplateNode) -> bool {
        match self.get(path) {
            Some(NodeOverride::Visibility(v)) => *v,
            _ => node.visible,
        }
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// Rasterises a document with a unit's overrides applied.
pub trait DocumentWriter {
    fn export(&self, document: &TemplateDocument, plan: &UnitPlan, format: OutputFormat) -> Result<Vec<u8>, UnitError>;
}

// --- Results ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success { path: PathBuf, sha256: String },
    Failure { error: UnitError },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    /// 1-based data row.
    pub row: usize,
    pub document: String,
    pub output_name: String,
    pub outcome: Outcome,
}

impl RenderResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub prefix: String,
    pub state: GroupState,
    pub documents: Vec<String>,
    pub validation: Option<ValidationReport>,
    pub group_error: Option<GroupError>,
    pub directive_issues: Vec<IssueRecord>,
    pub output_dir: Option<PathBuf>,
    pub results: Vec<RenderResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRecord {
    pub template: String,
    pub node: String,
    pub message: String,
}

impl GroupReport {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            state: GroupState::Discovered,
            documents: vec![],
            validation: None,
            group_error: None,
            directive_issues: vec![],
            output_dir: None,
            results: vec![],
        }
    }

    fn fail(mut self, error: GroupError) -> Self {
        error!(group = %self.prefix, "{}", error);
        self.group_error = Some(error);
        self.state = GroupState::Completed;
        self
    }

    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Failed units, plus one for a group-level failure.
    pub fn failures(&self) -> usize {
        let units = self.results.len() - self.successes();
        units + usize::from(self.group_error.is_some())
    }

    pub fn succeeded(&self) -> bool {
        self.failures() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub engine_version: String,
    pub groups: Vec<GroupReport>,
}

/// Run-independent view of a summary: names, counts and failure kinds.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Fingerprint<'a> {
    engine_version: &'a str,
    groups: Vec<GroupFingerprint<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupFingerprint<'a> {
    prefix: &'a str,
    group_error: Option<&'a GroupError>,
    units: Vec<(usize, &'a str, &'a str, bool)>,
}

impl BatchSummary {
    pub fn total_successes(&self) -> usize {
        self.groups.iter().map(GroupReport::successes).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.groups.iter().map(GroupReport::failures).sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.total_failures() == 0
    }

    /// Hash over everything except run id, timestamps and output locations.
    pub fn manifest_hash(&self) -> Result<String, serde_json::Error> {
        let fingerprint = Fingerprint {
            engine_version: &self.engine_version,
            groups: self
                .groups
                .iter()
                .map(|g| GroupFingerprint {
                    prefix: &g.prefix,
                    group_error: g.group_error.as_ref(),
                    units: g
                        .results
                        .iter()
                        .map(|r| (r.row, r.document.as_str(), r.output_name.as_str(), r.is_success()))
                        .collect(),
                })
                .collect(),
        };
        compute_manifest_hash(&fingerprint)
    }

    pub fn write_manifest(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut value = serde_json::to_value(self)?;
        if let (Some(map), Ok(hash)) = (value.as_object_mut(), self.manifest_hash()) {
            map.insert("manifestHash".into(), serde_json::Value::String(hash));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&value)?)
    }
}

// --- Naming ---

/// Row counter behind the `image_{n}` default names, shared by every group of one run.
#[derive(Debug, Default)]
pub struct RowCounter {
    issued: usize,
}

impl RowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_row(&mut self) -> usize {
        self.issued += 1;
        self.issued
    }
}

/// `{base}_{suffix}.{ext}` for multi-document groups, else `{base}.{ext}`.
pub fn output_file_name(row: &DataRow, n: usize, suffix: &str, multi_document: bool, format: OutputFormat) -> String {
    let base = row.file_name().unwrap_or_else(|| format!("image_{}", n));
    let stem = if multi_document && !suffix.is_empty() {
        format!("{}_{}", base, suffix)
    } else {
        base
    };
    format!("{}.{}", sanitize_filename(&stem), format.extension())
}

/// Make a string safe as a file name on every platform.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned = name.to_string();
    for escape in ["_x000D_", "_x000A_", "_x0009_"] {
        cleaned = cleaned.replace(escape, "");
    }
    let replaced: String = cleaned
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed: String = replaced
        .trim_matches(|c| c == ' ' || c == '.')
        .chars()
        .take(200)
        .collect();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed
    }
}

// --- Orchestrator ---

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub format: OutputFormat,
    /// Restrict rendering to documents with these suffixes.
    pub only: Vec<String>,
}

/// The render pipeline - single entry point for batch runs
pub struct RenderOrchestrator {
    config: RenderConfig,
    documents: Box<dyn DocumentReader>,
    datasets: Box<dyn DatasetReader>,
    writer: Box<dyn DocumentWriter>,
    fonts: Box<dyn FontSource>,
    validator: RowValidator,
}

impl RenderOrchestrator {
    pub fn new(config: RenderConfig, fonts: Box<dyn FontSource>) -> Self {
        let writer = RasterWriter::new(config.jpeg_quality);
        Self {
            config,
            documents: Box::new(JsonDocumentReader::new()),
            datasets: Box::new(JsonDatasetReader::new()),
            writer: Box::new(writer),
            fonts,
            validator: RowValidator::new(),
        }
    }

    pub fn with_document_reader(mut self, reader: Box<dyn DocumentReader>) -> Self {
        self.documents = reader;
        self
    }

    pub fn with_dataset_reader(mut self, reader: Box<dyn DatasetReader>) -> Self {
        self.datasets = reader;
        self
    }

    pub fn with_writer(mut self, writer: Box<dyn DocumentWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Find a group's templates and dataset.
    pub fn discover(&self, prefix: &str, only: &[String]) -> Result<TemplateGroup, GroupError> {
        let templates_dir = &self.config.templates_dir;
        let dataset_path = self.datasets.locate(&self.config.data_dir, prefix);

        // Naming depends on every template sharing the prefix, so count before `only` narrows.
        let mut paths = discover_templates(templates_dir, prefix, self.documents.extension(), &[])
            .map_err(|e| GroupError::TemplateUnreadable {
                reason: format!("{}: {}", templates_dir.display(), e),
            })?;
        paths.retain(|p| p != &dataset_path);
        let discovered = paths.len();
        if !only.is_empty() {
            paths.retain(|p| {
                let (_, suffix) = prefix_and_suffix(p);
                only.iter().any(|s| s == &suffix)
            });
        }
        if paths.is_empty() {
            return Err(GroupError::NoTemplates {
                prefix: prefix.to_string(),
                dir: templates_dir.display().to_string(),
            });
        }

        let documents = open_all(self.documents.as_ref(), &paths)
            .map_err(|e| GroupError::TemplateUnreadable { reason: e.to_string() })?;
        let dataset = self
            .datasets
            .read_rows(&dataset_path)
            .map_err(|e| GroupError::DatasetUnreadable { reason: e.to_string() })?;
        info!(
            group = prefix,
            templates = documents.len(),
            discovered,
            rows = dataset.rows.len(),
            "discovered group"
        );
        Ok(TemplateGroup::new(prefix, documents, dataset).with_discovered(discovered))
    }

    /// Validate a group's dataset against the union of its directives.
    ///
    /// This is the ONLY validation entry point.
    pub fn validate_group(&self, group: &TemplateGroup) -> ValidationReport {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        self.validator.validate(&group.shared_dataset, &group.directives())
    }

    /// Render every addressed group, in order. Group failures never stop siblings.
    pub fn run(&mut self, prefixes: &[String], options: &RunOptions) -> BatchSummary {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, groups = prefixes.len(), format = options.format.extension(), "batch started");

        let mut counter = RowCounter::new();
        let groups = prefixes
            .iter()
            .map(|prefix| self.run_group(prefix, options, &mut counter, started_at))
            .collect();

        let summary = BatchSummary {
            run_id,
            started_at,
            engine_version: ENGINE_VERSION.to_string(),
            groups,
        };
        info!(
            %run_id,
            successes = summary.total_successes(),
            failures = summary.total_failures(),
            "batch finished"
        );
        summary
    }

    /// Drive one group through its states and render every unit.
    ///
    /// CRITICAL: validation always runs first; a fatal report renders nothing.
    pub fn run_group(
        &mut self,
        prefix: &str,
        options: &RunOptions,
        counter: &mut RowCounter,
        started_at: DateTime<Utc>,
    ) -> GroupReport {
        let mut report = GroupReport::new(prefix);
        let mut group = match self.discover(prefix, &options.only) {
            Ok(group) => group,
            Err(e) => return report.fail(e),
        };
        report.documents = group.documents.iter().map(TemplateDocument::file_name).collect();
        report.directive_issues = group
            .documents
            .iter()
            .flat_map(|d| d.directive_issues.iter().map(move |i| issue_record(d, i)))
            .collect();

        // MANDATORY: validation before any row is processed.
        let validation = self.validate_group(&group);
        group.advance(GroupState::Validated);
        report.validation = Some(validation.clone());
        if validation.is_fatal {
            group.advance(GroupState::Completed);
            return report.fail(GroupError::MissingColumn {
                columns: validation.missing_columns.into_iter().collect(),
            });
        }

        group.advance(GroupState::Rendering);
        let output_dir = self.group_output_dir(prefix, started_at);
        report.output_dir = Some(output_dir.clone());

        for (index, row) in group.shared_dataset.rows.iter().enumerate() {
            let n = counter.next_row();
            for document in &group.documents {
                let output_name = output_file_name(row, n, &document.suffix, group.is_multi_document(), options.format);
                let target = output_dir.join(&output_name);
                let outcome = match self.render_unit(document, row, &group.shared_dataset, options.format, &target) {
                    Ok(sha256) => {
                        info!(group = prefix, row = index + 1, output = %target.display(), "exported");
                        Outcome::Success { path: target, sha256 }
                    }
                    Err(e) => {
                        warn!(group = prefix, row = index + 1, template = %document.file_name(), error = %e, "unit failed");
                        Outcome::Failure { error: e }
                    }
                };
                report.results.push(RenderResult {
                    row: index + 1,
                    document: document.file_name(),
                    output_name,
                    outcome,
                });
            }
        }

        group.advance(GroupState::Completed);
        report.state = group.state();
        info!(group = prefix, successes = report.successes(), failures = report.failures(), "group completed");
        report
    }

    fn group_output_dir(&self, prefix: &str, started_at: DateTime<Utc>) -> PathBuf {
        let name = if self.config.timestamped_output {
            format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), prefix)
        } else {
            prefix.to_string()
        };
        self.config.output_dir.join(sanitize_filename(&name))
    }

    /// Plan, rasterise and write one unit. Returns the output's SHA-256.
    fn render_unit(
        &mut self,
        document: &TemplateDocument,
        row: &DataRow,
        dataset: &Dataset,
        format: OutputFormat,
        target: &Path,
    ) -> Result<String, UnitError> {
        let plan = self.plan_unit(document, row, dataset)?;
        debug!(template = %document.file_name(), overrides = plan.len(), "planned unit");
        let bytes = self.writer.export(document, &plan, format)?;

        let write_failed = |e: std::io::Error| UnitError::OutputWriteFailed {
            path: target.display().to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }
        fs::write(target, &bytes).map_err(write_failed)?;
        Ok(sha256_hex(&bytes))
    }

    /// Build the override side-table for one (row, document) pair.
    pub fn plan_unit(&mut self, document: &TemplateDocument, row: &DataRow, dataset: &Dataset) -> Result<UnitPlan, UnitError> {
        let mut plan = UnitPlan::default();

        for (path, node, directive) in document.managed_nodes() {
            let cell = row.get(&directive.variable_name);
            let value = match &directive.kind {
                DirectiveKind::Visibility => {
                    let visible = coerce_visibility(&cell).unwrap_or_else(|issue| {
                        warn!(node = %node.name, column = %directive.variable_name, "{}; treating as hidden", issue.0);
                        false
                    });
                    NodeOverride::Visibility(visible)
                }
                DirectiveKind::Text(params) => {
                    let text = preprocess_text(&cell);
                    let face = self.fonts.face(&document.prefix, node.text_style.font_size)?;
                    let block = TextLayoutEngine::layout(&text, node.bounds.width, params.wrap, face.as_ref());
                    let placed = TextLayoutEngine::place(node.bounds, params, block.size);
                    NodeOverride::Text(TextOverride {
                        block,
                        placed,
                        params: *params,
                        color: node.text_style.color,
                        face,
                    })
                }
                DirectiveKind::Image(params) => {
                    if cell.is_blank() {
                        NodeOverride::Blank
                    } else {
                        let source = dataset.resolve_path(&cell.as_text());
                        let image = load_image(&source)?;
                        let placement = ImageCompositor::place(
                            Size::new(image.width(), image.height()),
                            node.bounds,
                            params,
                        )?;
                        NodeOverride::Image(ImageOverride { image, placement })
                    }
                }
            };
            plan.insert(path, value);
        }

        Ok(plan)
    }
}

fn load_image(path: &Path) -> Result<image::RgbaImage, UnitError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|e| UnitError::ImageSourceUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn issue_record(document: &TemplateDocument, issue: &DirectiveIssue) -> IssueRecord {
    IssueRecord {
        template: document.file_name(),
        node: issue.node.clone(),
        message: issue.message.clone(),
    }
}
