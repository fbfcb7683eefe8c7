//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use forgebatch_core::fonts::{FontError, FontFace, FontSource};
use forgebatch_core::pipeline::{GroupError, Outcome, UnitError};
use forgebatch_core::text::TextMeasure;
use forgebatch_core::{FontResolver, GroupState, OutputFormat, RenderConfig, RenderOrchestrator, RunOptions};

/// Every glyph is a solid 10x20 box.
struct BoxFace;

impl TextMeasure for BoxFace {
    fn line_width(&self, line: &str) -> u32 {
        line.chars().count() as u32 * 10
    }

    fn line_height(&self) -> u32 {
        20
    }
}

impl FontFace for BoxFace {
    fn draw_line(&self, line: &str, plot: &mut dyn FnMut(i64, i64, f32)) {
        for x in 0..self.line_width(line) as i64 {
            for y in 0..20 {
                plot(x, y, 1.0);
            }
        }
    }
}

struct BoxFonts;

impl FontSource for BoxFonts {
    fn face(&mut self, _prefix: &str, _size: f32) -> Result<Rc<dyn FontFace>, FontError> {
        Ok(Rc::new(BoxFace))
    }
}

const RED: [u8; 4] = [255, 0, 0, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> RenderConfig {
        RenderConfig {
            templates_dir: self.root().join("templates"),
            data_dir: self.root().join("data"),
            output_dir: self.root().join("out"),
            fonts_config: self.root().join("fonts.json"),
            fonts_dir: self.root().join("fonts"),
            timestamped_output: false,
            ..RenderConfig::default()
        }
    }

    fn template(&self, file: &str, nodes: Value) {
        let layout = json!({ "width": 200, "height": 100, "background": WHITE, "nodes": nodes });
        fs::write(self.root().join("templates").join(file), layout.to_string()).unwrap();
    }

    fn dataset(&self, prefix: &str, rows: Value) {
        fs::write(self.root().join("data").join(format!("{}.json", prefix)), rows.to_string()).unwrap();
    }

    fn output(&self, prefix: &str, name: &str) -> PathBuf {
        self.root().join("out").join(prefix).join(name)
    }

    fn orchestrator(&self) -> RenderOrchestrator {
        RenderOrchestrator::new(self.config(), Box::new(BoxFonts))
    }
}

fn png() -> RunOptions {
    RunOptions { format: OutputFormat::Png, only: vec![] }
}

fn pixel(path: &Path, x: u32, y: u32) -> [u8; 4] {
    image::open(path).unwrap().to_rgba8().get_pixel(x, y).0
}

fn title_and_badge() -> Value {
    json!([
        { "name": "@title#t_c_m", "kind": "text", "bounds": { "left": 0, "top": 0, "width": 200, "height": 100 } },
        { "name": "@show#v", "kind": "pixel", "visible": false, "fill": RED,
          "bounds": { "left": 0, "top": 0, "width": 10, "height": 10 } }
    ])
}

#[test]
fn invariant_text_centered_and_badge_shown() {
    let ws = Workspace::new();
    ws.template("card.json", title_and_badge());
    ws.dataset("card", json!([{ "title": "Hello", "show": "TRUE" }]));

    let summary = ws.orchestrator().run(&["card".to_string()], &png());
    assert!(summary.all_succeeded());

    let out = ws.output("card", "image_1.png");
    assert!(out.exists());
    // "Hello" is 50x20, centered in 200x100 -> (75, 40)
    assert_eq!(pixel(&out, 100, 50), BLACK);
    assert_eq!(pixel(&out, 75, 40), BLACK);
    assert_eq!(pixel(&out, 74, 50), WHITE);
    assert_eq!(pixel(&out, 125, 50), WHITE);
    assert_eq!(pixel(&out, 100, 39), WHITE);
    // authored hidden, shown by the row
    assert_eq!(pixel(&out, 5, 5), RED);
}

#[test]
fn invariant_visibility_never_leaks_between_rows() {
    let ws = Workspace::new();
    ws.template("card.json", title_and_badge());
    ws.dataset(
        "card",
        json!([
            { "title": "a", "show": "yes", "File_name": "first" },
            { "title": "b", "show": "FALSE", "File_name": "second" },
            { "title": "c", "show": "maybe", "File_name": "third" },
            { "title": "d", "show": 1, "File_name": "fourth" }
        ]),
    );

    let summary = ws.orchestrator().run(&["card".to_string()], &png());
    assert!(summary.all_succeeded());

    assert_eq!(pixel(&ws.output("card", "first.png"), 5, 5), RED);
    assert_eq!(pixel(&ws.output("card", "second.png"), 5, 5), WHITE);
    // not in the truthy set: hidden, reported as a warning
    assert_eq!(pixel(&ws.output("card", "third.png"), 5, 5), WHITE);
    assert_eq!(pixel(&ws.output("card", "fourth.png"), 5, 5), RED);

    let validation = summary.groups[0].validation.as_ref().unwrap();
    assert!(!validation.is_fatal);
    assert!(validation.type_warnings.iter().any(|w| w.row == 3 && w.column == "show"));
}

#[test]
fn invariant_group_variants_share_row_number() {
    let ws = Workspace::new();
    let nodes = json!([{ "name": "@headline#t", "kind": "text", "bounds": { "left": 0, "top": 0, "width": 200, "height": 40 } }]);
    ws.template("camp#summer.json", nodes.clone());
    ws.template("camp#winter.json", nodes);
    ws.dataset("camp", json!([{ "headline": "Sale" }, { "headline": "More", "File_name": "hero" }]));

    let summary = ws.orchestrator().run(&["camp".to_string()], &png());
    assert!(summary.all_succeeded());
    assert_eq!(summary.total_successes(), 4);

    for name in ["image_1_summer.png", "image_1_winter.png", "hero_summer.png", "hero_winter.png"] {
        assert!(ws.output("camp", name).exists(), "{}", name);
    }
    let group = &summary.groups[0];
    assert_eq!(group.documents, vec!["camp#summer.json", "camp#winter.json"]);
    assert_eq!(group.state, GroupState::Completed);
}

#[test]
fn invariant_only_filter_selects_variants() {
    let ws = Workspace::new();
    let nodes = json!([{ "name": "@headline#t", "kind": "text", "bounds": { "left": 0, "top": 0, "width": 200, "height": 40 } }]);
    ws.template("camp#summer.json", nodes.clone());
    ws.template("camp#winter.json", nodes);
    ws.dataset("camp", json!([{ "headline": "Sale" }]));

    let options = RunOptions { format: OutputFormat::Jpg, only: vec!["winter".to_string()] };
    let summary = ws.orchestrator().run(&["camp".to_string()], &options);
    assert_eq!(summary.total_successes(), 1);
    // the group still has two templates, so the suffix stays
    assert!(ws.output("camp", "image_1_winter.jpg").exists());
    assert!(!ws.output("camp", "image_1.jpg").exists());
}

#[test]
fn invariant_filtered_runs_never_overwrite_each_other() {
    let ws = Workspace::new();
    let nodes = json!([{ "name": "@headline#t", "kind": "text", "bounds": { "left": 0, "top": 0, "width": 200, "height": 40 } }]);
    ws.template("camp#summer.json", nodes.clone());
    ws.template("camp#winter.json", nodes);
    ws.dataset("camp", json!([{ "headline": "Sale" }]));

    for suffix in ["summer", "winter"] {
        let options = RunOptions { format: OutputFormat::Png, only: vec![suffix.to_string()] };
        let summary = ws.orchestrator().run(&["camp".to_string()], &options);
        assert!(summary.all_succeeded());
        assert_eq!(summary.groups[0].results[0].output_name, format!("image_1_{}.png", suffix));
    }

    let mut files: Vec<String> = fs::read_dir(ws.root().join("out").join("camp"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["image_1_summer.png", "image_1_winter.png"]);
}

#[test]
fn invariant_default_names_count_across_groups_of_one_run() {
    let ws = Workspace::new();
    let nodes = json!([{ "name": "@headline#t", "kind": "text", "bounds": { "left": 0, "top": 0, "width": 200, "height": 40 } }]);
    ws.template("a.json", nodes.clone());
    ws.template("b.json", nodes);
    ws.dataset("a", json!([{ "headline": "one" }]));
    ws.dataset("b", json!([{ "headline": "two" }]));

    let summary = ws.orchestrator().run(&["a".to_string(), "b".to_string()], &png());
    assert!(summary.all_succeeded());
    assert_eq!(summary.groups[0].results[0].output_name, "image_1.png");
    assert_eq!(summary.groups[1].results[0].output_name, "image_2.png");
    assert!(ws.output("b", "image_2.png").exists());
}

#[test]
fn invariant_missing_column_blocks_rendering() {
    let ws = Workspace::new();
    ws.template("card.json", title_and_badge());
    ws.dataset("card", json!([{ "title": "Hello" }]));

    let summary = ws.orchestrator().run(&["card".to_string()], &png());

    assert!(!summary.all_succeeded());
    let group = &summary.groups[0];
    assert!(group.results.is_empty());
    assert_eq!(group.state, GroupState::Completed);
    assert_eq!(group.group_error, Some(GroupError::MissingColumn { columns: vec!["show".to_string()] }));
    assert!(group.validation.as_ref().unwrap().is_fatal);
    assert!(!ws.root().join("out").join("card").exists());
}

#[test]
fn invariant_sibling_groups_survive_group_failure() {
    let ws = Workspace::new();
    ws.template("card.json", title_and_badge());
    ws.dataset("card", json!([{ "title": "Hello", "show": true }]));
    ws.template("orphan.json", title_and_badge());

    let prefixes = ["absent".to_string(), "orphan".to_string(), "card".to_string()];
    let summary = ws.orchestrator().run(&prefixes, &png());

    assert!(matches!(summary.groups[0].group_error, Some(GroupError::NoTemplates { .. })));
    assert!(matches!(summary.groups[1].group_error, Some(GroupError::DatasetUnreadable { .. })));
    assert!(summary.groups[2].succeeded());
    assert_eq!(summary.total_failures(), 2);
    assert!(ws.output("card", "image_1.png").exists());
}

#[test]
fn invariant_row_failure_is_isolated() {
    let ws = Workspace::new();
    ws.template(
        "gallery.json",
        json!([{ "name": "@photo#i_contain", "kind": "pixel", "bounds": { "left": 0, "top": 0, "width": 100, "height": 100 } }]),
    );
    image::RgbaImage::from_pixel(40, 20, image::Rgba(RED))
        .save(ws.root().join("data").join("red.png"))
        .unwrap();
    ws.dataset("gallery", json!([{ "photo": "red.png" }, { "photo": "missing.png" }, { "photo": "" }]));

    let summary = ws.orchestrator().run(&["gallery".to_string()], &png());
    let group = &summary.groups[0];

    assert_eq!(group.results.len(), 3);
    assert_eq!(group.successes(), 2);
    assert_eq!(group.failures(), 1);
    assert!(group.group_error.is_none());
    assert!(matches!(
        &group.results[1].outcome,
        Outcome::Failure { error: UnitError::ImageSourceUnreadable { .. } }
    ));
    // earlier and later rows are kept on disk
    let first = ws.output("gallery", "image_1.png");
    assert_eq!(pixel(&first, 50, 50), RED);
    assert!(!ws.output("gallery", "image_2.png").exists());
    assert!(ws.output("gallery", "image_3.png").exists());
    assert!(!summary.all_succeeded());
}

#[test]
fn invariant_missing_font_config_falls_back_to_default() {
    let ws = Workspace::new();
    ws.template("card.json", title_and_badge());
    ws.dataset("card", json!([{ "title": "Hello", "show": true }]));
    let config = ws.config();

    let mut resolver = FontResolver::from_config_file(&config.fonts_config, &config.fonts_dir, &config.default_font);
    assert_eq!(resolver.resolve("card"), config.fonts_dir.join(&config.default_font));

    // the default font file is absent too: text units fail, nothing fatal
    let mut orchestrator = RenderOrchestrator::new(config, Box::new(resolver));
    let summary = orchestrator.run(&["card".to_string()], &png());
    let group = &summary.groups[0];
    assert!(group.group_error.is_none());
    assert_eq!(group.state, GroupState::Completed);
    match &group.results[0].outcome {
        Outcome::Failure { error: UnitError::FontNotFound { message } } => {
            assert!(message.contains("AlibabaPuHuiTi-2-85-Bold.ttf"));
            assert!(message.contains("fonts.json"));
        }
        other => panic!("expected FontNotFound, got {:?}", other),
    }
}

#[test]
fn invariant_manifest_hash_stable() {
    let ws = Workspace::new();
    ws.template("card.json", title_and_badge());
    ws.dataset("card", json!([{ "title": "Hello", "show": "TRUE" }, { "title": "Bye", "show": "0" }]));

    let first = ws.orchestrator().run(&["card".to_string()], &png());
    let second = ws.orchestrator().run(&["card".to_string()], &png());

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.manifest_hash().unwrap(), second.manifest_hash().unwrap());

    // identical inputs render identical bytes
    let hashes = |s: &forgebatch_core::BatchSummary| -> Vec<String> {
        s.groups[0]
            .results
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Success { sha256, .. } => Some(sha256.clone()),
                Outcome::Failure { .. } => None,
            })
            .collect()
    };
    assert_eq!(hashes(&first), hashes(&second));

    let manifest = ws.root().join("out").join("manifest.json");
    first.write_manifest(&manifest).unwrap();
    let written: Value = serde_json::from_str(&fs::read_to_string(&manifest).unwrap()).unwrap();
    assert_eq!(written["manifestHash"], json!(first.manifest_hash().unwrap()));
}

#[test]
fn invariant_bad_directive_does_not_block_template() {
    let ws = Workspace::new();
    ws.template(
        "card.json",
        json!([
            { "name": "@title#t_c_m", "kind": "text", "bounds": { "left": 0, "top": 0, "width": 200, "height": 100 } },
            { "name": "@oops#x", "kind": "pixel", "fill": RED, "bounds": { "left": 0, "top": 0, "width": 10, "height": 10 } }
        ]),
    );
    ws.dataset("card", json!([{ "title": "Hi" }]));

    let summary = ws.orchestrator().run(&["card".to_string()], &png());
    let group = &summary.groups[0];
    assert!(group.succeeded());
    assert_eq!(group.directive_issues.len(), 1);
    assert_eq!(group.directive_issues[0].node, "@oops#x");
    // unmanaged node keeps its authored pixels
    assert_eq!(pixel(&ws.output("card", "image_1.png"), 5, 5), RED);
}

#[cfg(feature = "test-hooks")]
#[test]
fn invariant_render_calls_validate() {
    use forgebatch_core::pipeline::{get_validation_call_count, reset_validation_call_count};

    let ws = Workspace::new();
    ws.template("card.json", title_and_badge());
    ws.dataset("card", json!([{ "title": "Hello", "show": true }]));

    reset_validation_call_count();
    let summary = ws.orchestrator().run(&["card".to_string()], &png());
    assert!(summary.all_succeeded());
    assert!(get_validation_call_count() >= 1);
}
