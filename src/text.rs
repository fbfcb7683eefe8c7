//! Text Layout - Alignment, Wrap, Rotation
//!
//! Placement is computed against the layer's authored (unrotated) bounds.
//! Rotation is a post-placement transform: the block spins about its centre
//! and its bounding box is then shifted so the alignment anchor stays put.

use serde::{Deserialize, Serialize};

use crate::directive::{HAlign, TextParams, VAlign};
use crate::document::{Rect, Size};

/// Line advance as a multiple of line height.
pub const LINE_SPACING: f64 = 1.2;

/// Width/height measurement for a single font at a single size.
pub trait TextMeasure {
    fn line_width(&self, line: &str) -> u32;
    fn line_height(&self) -> u32;
}

/// Lines ready to draw plus their natural (unrotated) block size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub line_widths: Vec<u32>,
    pub line_height: u32,
    pub line_advance: u32,
    pub size: Size,
}

impl TextBlock {
    /// X offset of a line inside the block for the given alignment.
    pub fn line_offset(&self, index: usize, align: HAlign) -> i64 {
        let width = self.line_widths.get(index).copied().unwrap_or(0);
        align.offset(self.size.width as i64, width as i64)
    }
}

/// Where a text block lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedBox {
    /// Top-left of the unrotated block.
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub rotation_deg: f64,
    /// Alignment anchor point, identical before and after rotation.
    pub anchor: (f64, f64),
    /// Top-left and size of the rotated block's bounding box.
    pub rotated_x: i64,
    pub rotated_y: i64,
    pub rotated_width: u32,
    pub rotated_height: u32,
}

pub struct TextLayoutEngine;

impl TextLayoutEngine {
    /// Break `text` into lines and measure the resulting block.
    pub fn layout(text: &str, max_width: u32, wrap: bool, measure: &dyn TextMeasure) -> TextBlock {
        let lines = if wrap {
            wrap_lines(text, max_width, measure)
        } else {
            text.split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect()
        };
        let line_widths: Vec<u32> = lines.iter().map(|l| measure.line_width(l)).collect();
        let line_height = measure.line_height();
        let line_advance = (line_height as f64 * LINE_SPACING).round() as u32;
        let count = lines.len().max(1) as u32;
        let height = line_height + line_advance * (count - 1);
        let width = line_widths.iter().copied().max().unwrap_or(0);
        TextBlock {
            lines,
            line_widths,
            line_height,
            line_advance,
            size: Size::new(width, height),
        }
    }

    /// Place a block of `measured` size inside `bounds`.
    pub fn place(bounds: Rect, params: &TextParams, measured: Size) -> PlacedBox {
        let x = bounds.left as i64 + params.h_align.offset(bounds.width as i64, measured.width as i64);
        let y = bounds.top as i64 + params.v_align.offset(bounds.height as i64, measured.height as i64);

        let w = measured.width as f64;
        let h = measured.height as f64;
        let fx = params.h_align.factor();
        let fy = params.v_align.factor();
        let anchor = (x as f64 + fx * w, y as f64 + fy * h);

        let (rotated_width, rotated_height) = rotated_extent(w, h, params.rotation_deg);
        let (rotated_x, rotated_y) = if params.rotation_deg == 0.0 {
            (x, y)
        } else {
            (
                (anchor.0 - fx * rotated_width).round() as i64,
                (anchor.1 - fy * rotated_height).round() as i64,
            )
        };

        PlacedBox {
            x,
            y,
            width: measured.width,
            height: measured.height,
            rotation_deg: params.rotation_deg,
            anchor,
            rotated_x,
            rotated_y,
            rotated_width: rotated_width.round() as u32,
            rotated_height: rotated_height.round() as u32,
        }
    }
}

/// Axis-aligned extent of a `w`x`h` box rotated by `degrees`.
pub fn rotated_extent(w: f64, h: f64, degrees: f64) -> (f64, f64) {
    if degrees == 0.0 {
        return (w, h);
    }
    let theta = degrees.to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    (w * cos + h * sin, w * sin + h * cos)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{3000}'..='\u{303F}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{FF00}'..='\u{FFEF}')
}

/// Break a paragraph into (token, preceded_by_space) pairs. CJK characters
/// are tokens of their own.
fn tokens(paragraph: &str) -> Vec<(String, bool)> {
    let mut out = vec![];
    let mut word = String::new();
    let mut space_before = false;
    let mut pending_space = false;

    let flush = |word: &mut String, out: &mut Vec<(String, bool)>, space_before: &mut bool| {
        if !word.is_empty() {
            out.push((std::mem::take(word), *space_before));
            *space_before = false;
        }
    };

    for c in paragraph.chars() {
        if c.is_whitespace() {
            flush(&mut word, &mut out, &mut space_before);
            pending_space = true;
        } else if is_cjk(c) {
            flush(&mut word, &mut out, &mut space_before);
            out.push((c.to_string(), pending_space));
            pending_space = false;
        } else {
            if word.is_empty() {
                space_before = pending_space;
                pending_space = false;
            }
            word.push(c);
        }
    }
    flush(&mut word, &mut out, &mut space_before);
    out
}

fn wrap_lines(text: &str, max_width: u32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = vec![];
    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim_end_matches('\r');
        let mut current = String::new();
        for (token, space_before) in tokens(paragraph) {
            let candidate = if current.is_empty() {
                token.clone()
            } else if space_before {
                format!("{} {}", current, token)
            } else {
                format!("{}{}", current, token)
            };
            if current.is_empty() || measure.line_width(&candidate) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current = token;
            }
            // an over-long word is split by characters
            while measure.line_width(&current) > max_width && current.chars().count() > 1 {
                let (head, tail) = split_to_width(&current, max_width, measure);
                lines.push(head);
                current = tail;
            }
        }
        lines.push(current);
    }
    lines
}

/// Longest prefix (at least one char) fitting `max_width`, and the rest.
fn split_to_width(line: &str, max_width: u32, measure: &dyn TextMeasure) -> (String, String) {
    let mut end = 0;
    for (index, c) in line.char_indices() {
        let next = index + c.len_utf8();
        if end > 0 && measure.line_width(&line[..next]) > max_width {
            break;
        }
        end = next;
    }
    (line[..end].to_string(), line[end..].to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Every char advances `advance` pixels.
    pub(crate) struct FixedMeasure {
        pub advance: u32,
        pub height: u32,
    }

    impl TextMeasure for FixedMeasure {
        fn line_width(&self, line: &str) -> u32 {
            line.chars().count() as u32 * self.advance
        }

        fn line_height(&self) -> u32 {
            self.height
        }
    }

    fn params(h: HAlign, v: VAlign, rotation: f64) -> TextParams {
        TextParams { h_align: h, v_align: v, wrap: false, rotation_deg: rotation }
    }

    const BOUNDS: Rect = Rect { left: 100, top: 50, width: 400, height: 200 };

    #[test]
    fn test_horizontal_alignment_exact() {
        let size = Size::new(120, 30);
        assert_eq!(TextLayoutEngine::place(BOUNDS, &params(HAlign::Left, VAlign::Top, 0.0), size).x, 100);
        assert_eq!(TextLayoutEngine::place(BOUNDS, &params(HAlign::Center, VAlign::Top, 0.0), size).x, 240);
        assert_eq!(TextLayoutEngine::place(BOUNDS, &params(HAlign::Right, VAlign::Top, 0.0), size).x, 380);
    }

    #[test]
    fn test_vertical_alignment_exact() {
        let size = Size::new(120, 30);
        assert_eq!(TextLayoutEngine::place(BOUNDS, &params(HAlign::Left, VAlign::Top, 0.0), size).y, 50);
        assert_eq!(TextLayoutEngine::place(BOUNDS, &params(HAlign::Left, VAlign::Middle, 0.0), size).y, 135);
        assert_eq!(TextLayoutEngine::place(BOUNDS, &params(HAlign::Left, VAlign::Bottom, 0.0), size).y, 220);
    }

    #[test]
    fn test_overflowing_text_centres_symmetrically() {
        let placed = TextLayoutEngine::place(BOUNDS, &params(HAlign::Center, VAlign::Top, 0.0), Size::new(500, 30));
        assert_eq!(placed.x, 50);
        let right = TextLayoutEngine::place(BOUNDS, &params(HAlign::Right, VAlign::Top, 0.0), Size::new(500, 30));
        assert_eq!(right.x, 0);
    }

    #[test]
    fn test_zero_rotation_bbox_is_block() {
        let placed = TextLayoutEngine::place(BOUNDS, &params(HAlign::Center, VAlign::Middle, 0.0), Size::new(121, 31));
        assert_eq!((placed.rotated_x, placed.rotated_y), (placed.x, placed.y));
        assert_eq!((placed.rotated_width, placed.rotated_height), (121, 31));
    }

    #[test]
    fn test_rotation_keeps_anchor() {
        let size = Size::new(120, 30);
        for (h, v) in [(HAlign::Left, VAlign::Top), (HAlign::Center, VAlign::Middle), (HAlign::Right, VAlign::Bottom)] {
            let flat = TextLayoutEngine::place(BOUNDS, &params(h, v, 0.0), size);
            let turned = TextLayoutEngine::place(BOUNDS, &params(h, v, 30.0), size);
            assert_eq!(flat.anchor, turned.anchor);
            let ax = turned.rotated_x as f64 + h.factor() * turned.rotated_width as f64;
            let ay = turned.rotated_y as f64 + v.factor() * turned.rotated_height as f64;
            assert!((ax - turned.anchor.0).abs() <= 1.0);
            assert!((ay - turned.anchor.1).abs() <= 1.0);
        }
    }

    #[test]
    fn test_rotation_90_swaps_extent() {
        let placed = TextLayoutEngine::place(BOUNDS, &params(HAlign::Center, VAlign::Middle, 90.0), Size::new(120, 30));
        assert_eq!((placed.rotated_width, placed.rotated_height), (30, 120));
        // centre stays at the centre of the bounds
        assert_eq!(placed.rotated_x, 285);
        assert_eq!(placed.rotated_y, 90);
    }

    #[test]
    fn test_rotation_round_trip_within_a_pixel() {
        let size = Size::new(137, 41);
        for theta in [15.0, 33.3, 45.0, 72.5] {
            for (h, v) in [(HAlign::Left, VAlign::Bottom), (HAlign::Right, VAlign::Top), (HAlign::Center, VAlign::Middle)] {
                let forward = TextLayoutEngine::place(BOUNDS, &params(h, v, theta), size);
                let back = TextLayoutEngine::place(BOUNDS, &params(h, v, -theta), size);
                assert!((forward.rotated_x - back.rotated_x).abs() <= 1);
                assert!((forward.rotated_y - back.rotated_y).abs() <= 1);
                assert_eq!(forward.anchor, back.anchor);
            }
        }
    }

    #[test]
    fn test_rotation_round_trip_on_mirrored_anchor() {
        // even block so centring has no floor bias
        let size = Size::new(138, 42);
        let (cx2, cy2) = (2 * BOUNDS.left as i64 + BOUNDS.width as i64, 2 * BOUNDS.top as i64 + BOUNDS.height as i64);
        let pairs = [
            ((HAlign::Left, VAlign::Top), (HAlign::Right, VAlign::Bottom)),
            ((HAlign::Right, VAlign::Top), (HAlign::Left, VAlign::Bottom)),
            ((HAlign::Center, VAlign::Bottom), (HAlign::Center, VAlign::Top)),
        ];
        for theta in [15.0, 33.3, 45.0, 72.5] {
            for ((h, v), (mh, mv)) in pairs {
                let forward = TextLayoutEngine::place(BOUNDS, &params(h, v, theta), size);
                let back = TextLayoutEngine::place(BOUNDS, &params(mh, mv, -theta), size);

                assert!((cx2 as f64 - forward.anchor.0 - back.anchor.0).abs() <= 1.0);
                assert!((cy2 as f64 - forward.anchor.1 - back.anchor.1).abs() <= 1.0);

                assert_eq!(forward.rotated_width, back.rotated_width);
                assert_eq!(forward.rotated_height, back.rotated_height);
                let mirrored_x = cx2 - forward.rotated_x - forward.rotated_width as i64;
                let mirrored_y = cy2 - forward.rotated_y - forward.rotated_height as i64;
                assert!((mirrored_x - back.rotated_x).abs() <= 1, "{:?} {}", (h, v), theta);
                assert!((mirrored_y - back.rotated_y).abs() <= 1, "{:?} {}", (h, v), theta);
            }
        }
    }

    #[test]
    fn test_layout_single_line() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("Hello", 1000, false, &m);
        assert_eq!(block.lines, vec!["Hello"]);
        assert_eq!(block.size, Size::new(50, 20));
    }

    #[test]
    fn test_layout_keeps_explicit_lines_without_wrap() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("ab\nabcd", 10, false, &m);
        assert_eq!(block.lines, vec!["ab", "abcd"]);
        assert_eq!(block.size, Size::new(40, 44));
        assert_eq!(block.line_offset(0, HAlign::Right), 20);
        assert_eq!(block.line_offset(0, HAlign::Center), 10);
    }

    #[test]
    fn test_wrap_on_words() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("the quick brown fox", 100, true, &m);
        assert_eq!(block.lines, vec!["the quick", "brown fox"]);
        assert_eq!(block.size.height, 20 + 24);
    }

    #[test]
    fn test_wrap_cjk_per_character() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("批量导出图片工具", 30, true, &m);
        assert_eq!(block.lines, vec!["批量导", "出图片", "工具"]);
    }

    #[test]
    fn test_wrap_breaks_long_word() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("abcdefgh", 30, true, &m);
        assert_eq!(block.lines, vec!["abc", "def", "gh"]);
    }

    #[test]
    fn test_single_word_wrap_uses_single_line_height() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("word", 1000, true, &m);
        assert_eq!(block.lines.len(), 1);
        assert_eq!(block.size.height, 20);
        let placed = TextLayoutEngine::place(
            BOUNDS,
            &TextParams { wrap: true, v_align: VAlign::Bottom, ..Default::default() },
            block.size,
        );
        assert_eq!(placed.y, 50 + 200 - 20);
    }

    #[test]
    fn test_empty_text() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("", 100, true, &m);
        assert_eq!(block.lines, vec![""]);
        assert_eq!(block.size, Size::new(0, 20));
    }

    #[test]
    fn test_wrap_respects_hard_breaks() {
        let m = FixedMeasure { advance: 10, height: 20 };
        let block = TextLayoutEngine::layout("one\ntwo three", 100, true, &m);
        assert_eq!(block.lines, vec!["one", "two three"]);
    }
}
