//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured findings.
//! Policy: a missing column is fatal for the group, everything else is a warning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use crate::dataset::{coerce_visibility, Dataset, FILE_NAME_COLUMN};
use crate::directive::{DirectiveKind, LayerDirective};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeWarning {
    /// 1-based data row.
    pub row: usize,
    pub column: String,
    pub issue: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    MissingColumn(String),
    UnusedColumn(String),
    Type(TypeWarning),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub missing_columns: BTreeSet<String>,
    pub type_warnings: Vec<TypeWarning>,
    pub unused_columns: BTreeSet<String>,
    pub is_fatal: bool,
}

impl ValidationReport {
    pub fn has_warnings(&self) -> bool {
        !self.type_warnings.is_empty() || !self.unused_columns.is_empty()
    }

    /// Human-readable lines, errors first.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![];
        if !self.missing_columns.is_empty() {
            let names: Vec<_> = self.missing_columns.iter().map(String::as_str).collect();
            lines.push(format!("error: dataset is missing required columns: {}", names.join(", ")));
        }
        for w in &self.type_warnings {
            lines.push(format!("warning: row {}, column '{}': {}", w.row, w.column, w.issue));
        }
        for column in &self.unused_columns {
            lines.push(format!("warning: column '{}' is not used by any template", column));
        }
        lines
    }
}

/// Validation rule trait - produces findings
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn check(&self, dataset: &Dataset, directives: &[&LayerDirective]) -> Vec<Finding>;
}

// --- Concrete Rules ---

pub struct RequiredColumnsRule;

impl ValidationRule for RequiredColumnsRule {
    fn name(&self) -> &'static str { "required_columns" }

    fn check(&self, dataset: &Dataset, directives: &[&LayerDirective]) -> Vec<Finding> {
        let required: BTreeSet<&str> = directives.iter().map(|d| d.variable_name.as_str()).collect();
        required
            .into_iter()
            .filter(|name| !dataset.has_column(name))
            .map(|name| Finding::MissingColumn(name.to_string()))
            .collect()
    }
}

pub struct UnusedColumnsRule;

impl ValidationRule for UnusedColumnsRule {
    fn name(&self) -> &'static str { "unused_columns" }

    fn check(&self, dataset: &Dataset, directives: &[&LayerDirective]) -> Vec<Finding> {
        let used: BTreeSet<&str> = directives.iter().map(|d| d.variable_name.as_str()).collect();
        dataset
            .schema
            .iter()
            .filter(|c| c.as_str() != FILE_NAME_COLUMN && !used.contains(c.as_str()))
            .map(|c| Finding::UnusedColumn(c.clone()))
            .collect()
    }
}

pub struct VisibilityValuesRule;

impl ValidationRule for VisibilityValuesRule {
    fn name(&self) -> &'static str { "visibility_values" }

    fn check(&self, dataset: &Dataset, directives: &[&LayerDirective]) -> Vec<Finding> {
        let columns = columns_of(directives, |k| matches!(k, DirectiveKind::Visibility));
        let mut findings = vec![];
        for (index, row) in dataset.rows.iter().enumerate() {
            for column in &columns {
                if !dataset.has_column(column) {
                    continue;
                }
                if let Err(issue) = coerce_visibility(&row.get(column)) {
                    findings.push(Finding::Type(TypeWarning {
                        row: index + 1,
                        column: column.to_string(),
                        issue: format!("{}; treated as hidden", issue.0),
                    }));
                }
            }
        }
        findings
    }
}

pub struct ImageSourcesRule;

impl ValidationRule for ImageSourcesRule {
    fn name(&self) -> &'static str { "image_sources" }

    fn check(&self, dataset: &Dataset, directives: &[&LayerDirective]) -> Vec<Finding> {
        let columns = columns_of(directives, |k| matches!(k, DirectiveKind::Image(_)));
        let mut findings = vec![];
        for (index, row) in dataset.rows.iter().enumerate() {
            for column in &columns {
                let cell = row.get(column);
                if cell.is_blank() {
                    continue;
                }
                let path = dataset.resolve_path(&cell.as_text());
                if !path.exists() {
                    findings.push(Finding::Type(TypeWarning {
                        row: index + 1,
                        column: column.to_string(),
                        issue: format!("image file does not exist: {}", path.display()),
                    }));
                }
            }
        }
        findings
    }
}

fn columns_of<'a>(directives: &[&'a LayerDirective], pick: impl Fn(&DirectiveKind) -> bool) -> BTreeSet<&'a str> {
    directives
        .iter()
        .filter(|d| pick(&d.kind))
        .map(|d| d.variable_name.as_str())
        .collect()
}

/// Validator orchestrates rules and applies policy
pub struct RowValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl RowValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredColumnsRule),
                Box::new(UnusedColumnsRule),
                Box::new(VisibilityValuesRule),
                Box::new(ImageSourcesRule),
            ],
        }
    }

    pub fn validate(&self, dataset: &Dataset, directives: &[&LayerDirective]) -> ValidationReport {
        let mut report = ValidationReport::default();

        for rule in &self.rules {
            for finding in rule.check(dataset, directives) {
                match finding {
                    Finding::MissingColumn(c) => {
                        report.missing_columns.insert(c);
                    }
                    Finding::UnusedColumn(c) => {
                        report.unused_columns.insert(c);
                    }
                    Finding::Type(w) => {
                        warn!(rule = rule.name(), row = w.row, column = %w.column, "{}", w.issue);
                        report.type_warnings.push(w);
                    }
                }
            }
        }

        report.is_fatal = !report.missing_columns.is_empty();
        report
    }
}

impl Default for RowValidator {
    fn default() -> Self {
        Self::new()
    }
}
