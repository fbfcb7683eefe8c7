//! ForgeBatch Core - Template Batch Renderer
//!
//! Layer names carry directives (`@title#t_c_m`, `@photo#i_contain_lt`,
//! `@badge#v`). Every dataset row renders once per template in its group.
//!
//! # The Rules (Non-Negotiable)
//! 1. Layer Names Are Contracts
//! 2. Validation Before Rendering
//! 3. Templates Are Never Mutated
//! 4. One Bad Row Never Stops The Batch
//! 5. Identical Inputs, Identical Manifest

pub mod directive;
pub mod document;
pub mod dataset;
pub mod fonts;
pub mod text;
pub mod compositor;
pub mod validation;
pub mod group;
pub mod pipeline;
pub mod raster;
pub mod hashing;
pub mod config;
pub mod logging;

pub use directive::{parse, Anchor, DirectiveError, DirectiveKind, Fit, HAlign, ImageParams, LayerDirective, Parsed, TextParams, VAlign};
pub use document::{DocumentReader, JsonDocumentReader, Rect, Size, TemplateDocument, TemplateNode};
pub use dataset::{coerce_visibility, CellValue, DataRow, Dataset, DatasetReader, JsonDatasetReader};
pub use fonts::{FontConfig, FontError, FontFace, FontResolver, FontSource};
pub use text::{PlacedBox, TextBlock, TextLayoutEngine, TextMeasure};
pub use compositor::{GeometryError, ImageCompositor, ImagePlacement};
pub use validation::{RowValidator, ValidationReport, ValidationRule};
pub use group::{GroupState, TemplateGroup};
pub use pipeline::{BatchSummary, DocumentWriter, GroupError, GroupReport, OutputFormat, RenderOrchestrator, RenderResult, RunOptions, UnitError};
pub use raster::RasterWriter;
pub use hashing::{canonical_json, compute_manifest_hash, sha256_hex};
pub use config::{ConfigError, LoggingConfig, RenderConfig};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
