//! Font Resolution - Prefix To Font File
//!
//! `fonts.json` maps a template prefix to a font file. Keys starting with `_`
//! are comments. A missing or broken config never stops a run; every prefix
//! then falls back to the default font.

use rusttype::{point, Font, Scale};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::text::TextMeasure;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FontError {
    #[error(
        "Font not found for prefix '{prefix}': {path} (configured in {config}, expected under {fonts_dir})"
    )]
    FontNotFound {
        prefix: String,
        path: PathBuf,
        config: PathBuf,
        fonts_dir: PathBuf,
    },

    #[error("Font file {path} could not be parsed")]
    InvalidFont { path: PathBuf },
}

/// Prefix -> font reference, comment keys removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontConfig {
    pub entries: BTreeMap<String, String>,
}

impl FontConfig {
    /// Load `fonts.json`. Absent or invalid config yields an empty mapping.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(config = %path.display(), error = %e, "font config unavailable, using default font");
                return Self::default();
            }
        };
        match Self::parse(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(config = %path.display(), error = %e, "font config is not valid JSON, using default font");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;
        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            if key.starts_with('_') {
                continue;
            }
            match value {
                serde_json::Value::String(font) => {
                    entries.insert(key, font);
                }
                other => warn!(prefix = %key, value = %other, "ignoring non-string font entry"),
            }
        }
        Ok(Self { entries })
    }
}

/// Resolves and loads fonts once per prefix for the whole run.
pub struct FontResolver {
    config: FontConfig,
    config_path: PathBuf,
    fonts_dir: PathBuf,
    default_font: PathBuf,
    resolved: HashMap<String, PathBuf>,
    loaded: HashMap<PathBuf, Font<'static>>,
}

impl FontResolver {
    pub fn new(config: FontConfig, config_path: impl Into<PathBuf>, fonts_dir: impl Into<PathBuf>, default_font: impl Into<PathBuf>) -> Self {
        let fonts_dir = fonts_dir.into();
        let default_font = in_dir(&fonts_dir, &default_font.into());
        Self {
            config,
            config_path: config_path.into(),
            fonts_dir,
            default_font,
            resolved: HashMap::new(),
            loaded: HashMap::new(),
        }
    }

    /// Load the config at `config_path` and build a resolver over it.
    pub fn from_config_file(config_path: &Path, fonts_dir: &Path, default_font: &Path) -> Self {
        Self::new(FontConfig::load(config_path), config_path, fonts_dir, default_font)
    }

    pub fn default_font(&self) -> &Path {
        &self.default_font
    }

    /// Font path for a prefix. Does not touch the file system.
    pub fn resolve(&mut self, prefix: &str) -> PathBuf {
        if let Some(path) = self.resolved.get(prefix) {
            return path.clone();
        }
        let path = match self.config.entries.get(prefix) {
            Some(font) => in_dir(&self.fonts_dir, Path::new(font)),
            None => {
                warn!(prefix, default = %self.default_font.display(), "no font configured for prefix, using default font");
                self.default_font.clone()
            }
        };
        debug!(prefix, font = %path.display(), "resolved font");
        self.resolved.insert(prefix.to_string(), path.clone());
        path
    }

    /// Resolve and load the font for a prefix, reading the file on first use.
    pub fn load(&mut self, prefix: &str) -> Result<Font<'static>, FontError> {
        let path = self.resolve(prefix);
        if let Some(font) = self.loaded.get(&path) {
            return Ok(font.clone());
        }
        let bytes = fs::read(&path).map_err(|_| FontError::FontNotFound {
            prefix: prefix.to_string(),
            path: path.clone(),
            config: self.config_path.clone(),
            fonts_dir: self.fonts_dir.clone(),
        })?;
        let font = Font::try_from_vec(bytes).ok_or_else(|| FontError::InvalidFont { path: path.clone() })?;
        self.loaded.insert(path, font.clone());
        Ok(font)
    }
}

fn in_dir(dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        dir.join(file)
    }
}

impl FontSource for FontResolver {
    fn face(&mut self, prefix: &str, size: f32) -> Result<Rc<dyn FontFace>, FontError> {
        let font = self.load(prefix)?;
        Ok(Rc::new(GlyphFace::new(font, size)))
    }
}

/// A font at one pixel size: measures lines and rasterises them.
pub trait FontFace: TextMeasure {
    /// Calls `plot(x, y, coverage)` for each covered pixel of `line`,
    /// relative to the top-left of the line box.
    fn draw_line(&self, line: &str, plot: &mut dyn FnMut(i64, i64, f32));
}

/// Hands out font faces per template prefix.
pub trait FontSource {
    fn face(&mut self, prefix: &str, size: f32) -> Result<Rc<dyn FontFace>, FontError>;
}

/// A rusttype font at a fixed pixel size.
#[derive(Clone)]
pub struct GlyphFace {
    pub font: Font<'static>,
    pub scale: Scale,
}

impl GlyphFace {
    pub fn new(font: Font<'static>, size: f32) -> Self {
        Self { font, scale: Scale::uniform(size) }
    }
}

impl TextMeasure for GlyphFace {
    fn line_width(&self, line: &str) -> u32 {
        let glyphs: Vec<_> = self.font.layout(line, self.scale, point(0.0, 0.0)).collect();
        let Some(last) = glyphs.last() else { return 0 };
        let advance = last.position().x + last.unpositioned().h_metrics().advance_width;
        advance.ceil().max(0.0) as u32
    }

    fn line_height(&self) -> u32 {
        let v = self.font.v_metrics(self.scale);
        (v.ascent - v.descent).ceil().max(1.0) as u32
    }
}

impl FontFace for GlyphFace {
    fn draw_line(&self, line: &str, plot: &mut dyn FnMut(i64, i64, f32)) {
        let ascent = self.font.v_metrics(self.scale).ascent;
        for glyph in self.font.layout(line, self.scale, point(0.0, ascent)) {
            if let Some(bb) = glyph.pixel_bounding_box() {
                glyph.draw(|gx, gy, coverage| {
                    plot(bb.min.x as i64 + gx as i64, bb.min.y as i64 + gy as i64, coverage)
                });
            }
        }
    }
}
