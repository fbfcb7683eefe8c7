//! Directive Grammar - Layer Names Are Instructions
//!
//! A managed node name has the form `@<variable>#<op>[_<param>...]`.
//! Names that do not start with `@` are not managed and are left alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DirectiveError {
    #[error("Malformed directive '{name}': {reason}")]
    MalformedDirective { name: String, reason: String },

    #[error("Unknown operation '{op}' in '{name}' (expected v, t or i)")]
    UnknownOperation { name: String, op: String },

    #[error("Unknown {kind} parameter '{token}' in '{name}'")]
    UnknownParameter { name: String, kind: &'static str, token: String },

    #[error("Invalid rotation '{token}' in '{name}'")]
    InvalidRotation { name: String, token: String },

    #[error("Conflicting parameter '{token}' in '{name}': {axis} already set")]
    ConflictingParameter { name: String, token: String, axis: &'static str },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

impl HAlign {
    /// Fraction of the free space that lies before the content.
    pub fn factor(self) -> f64 {
        match self {
            HAlign::Left => 0.0,
            HAlign::Center => 0.5,
            HAlign::Right => 1.0,
        }
    }

    /// Offset of content of size `inner` inside `outer`, floored to the pixel.
    pub fn offset(self, outer: i64, inner: i64) -> i64 {
        match self {
            HAlign::Left => 0,
            HAlign::Center => (outer - inner).div_euclid(2),
            HAlign::Right => outer - inner,
        }
    }
}

impl VAlign {
    pub fn factor(self) -> f64 {
        match self {
            VAlign::Top => 0.0,
            VAlign::Middle => 0.5,
            VAlign::Bottom => 1.0,
        }
    }

    pub fn offset(self, outer: i64, inner: i64) -> i64 {
        match self {
            VAlign::Top => 0,
            VAlign::Middle => (outer - inner).div_euclid(2),
            VAlign::Bottom => outer - inner,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    #[default]
    Cover,
    Contain,
}

/// One cell of the 3x3 anchor grid, e.g. `rt` = right/top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub horizontal: HAlign,
    pub vertical: VAlign,
}

impl Default for Anchor {
    fn default() -> Self {
        Self { horizontal: HAlign::Center, vertical: VAlign::Middle }
    }
}

impl Anchor {
    pub const ALL: [&'static str; 9] = ["lt", "ct", "rt", "lm", "cm", "rm", "lb", "cb", "rb"];

    pub fn from_token(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let horizontal = match chars.next()? {
            'l' => HAlign::Left,
            'c' => HAlign::Center,
            'r' => HAlign::Right,
            _ => return None,
        };
        let vertical = match chars.next()? {
            't' => VAlign::Top,
            'm' => VAlign::Middle,
            'b' => VAlign::Bottom,
            _ => return None,
        };
        if chars.next().is_some() {
            return None;
        }
        Some(Self { horizontal, vertical })
    }

    pub fn token(&self) -> String {
        let h = match self.horizontal {
            HAlign::Left => 'l',
            HAlign::Center => 'c',
            HAlign::Right => 'r',
        };
        let v = match self.vertical {
            VAlign::Top => 't',
            VAlign::Middle => 'm',
            VAlign::Bottom => 'b',
        };
        format!("{}{}", h, v)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextParams {
    pub h_align: HAlign,
    pub v_align: VAlign,
    pub wrap: bool,
    /// Clockwise positive, degrees.
    pub rotation_deg: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParams {
    pub fit: Fit,
    pub anchor: Anchor,
}

/// Closed set of operations a node can be driven by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectiveKind {
    Visibility,
    Text(TextParams),
    Image(ImageParams),
}

impl DirectiveKind {
    pub fn label(&self) -> &'static str {
        match self {
            DirectiveKind::Visibility => "visibility",
            DirectiveKind::Text(_) => "text",
            DirectiveKind::Image(_) => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDirective {
    pub variable_name: String,
    pub kind: DirectiveKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Managed(LayerDirective),
    NotManaged,
}

/// Parse a node name into a directive.
pub fn parse(node_name: &str) -> Result<Parsed, DirectiveError> {
    let Some(body) = node_name.strip_prefix('@') else {
        return Ok(Parsed::NotManaged);
    };

    let malformed = |reason: &str| DirectiveError::MalformedDirective {
        name: node_name.to_string(),
        reason: reason.to_string(),
    };

    let (variable, op_string) = body
        .split_once('#')
        .ok_or_else(|| malformed("missing '#<operation>'"))?;
    if variable.is_empty() {
        return Err(malformed("empty variable name"));
    }
    if op_string.is_empty() {
        return Err(malformed("empty operation"));
    }

    let mut segments = op_string.split('_');
    let op = segments.next().unwrap_or_default();
    let tokens: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();

    let kind = match op {
        "v" => {
            if let Some(token) = tokens.first() {
                return Err(DirectiveError::UnknownParameter {
                    name: node_name.to_string(),
                    kind: "visibility",
                    token: token.to_string(),
                });
            }
            DirectiveKind::Visibility
        }
        "t" => DirectiveKind::Text(parse_text_params(node_name, &tokens)?),
        "i" => DirectiveKind::Image(parse_image_params(node_name, &tokens)?),
        _ => {
            return Err(DirectiveError::UnknownOperation {
                name: node_name.to_string(),
                op: op.to_string(),
            })
        }
    };

    Ok(Parsed::Managed(LayerDirective {
        variable_name: variable.to_string(),
        kind,
    }))
}

/// Assigns an axis once; re-assigning the same value is fine, a different one is not.
fn assign<T: PartialEq + Copy>(
    slot: &mut Option<T>,
    value: T,
    axis: &'static str,
    name: &str,
    token: &str,
) -> Result<(), DirectiveError> {
    match slot {
        Some(existing) if *existing != value => Err(DirectiveError::ConflictingParameter {
            name: name.to_string(),
            token: token.to_string(),
            axis,
        }),
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}

fn parse_text_params(name: &str, tokens: &[&str]) -> Result<TextParams, DirectiveError> {
    let mut h_align = None;
    let mut v_align = None;
    let mut rotation = None;
    let mut wrap = false;

    for &token in tokens {
        match token {
            "l" => assign(&mut h_align, HAlign::Left, "horizontal alignment", name, token)?,
            "c" => assign(&mut h_align, HAlign::Center, "horizontal alignment", name, token)?,
            "r" => assign(&mut h_align, HAlign::Right, "horizontal alignment", name, token)?,
            "m" => assign(&mut v_align, VAlign::Middle, "vertical alignment", name, token)?,
            "b" => assign(&mut v_align, VAlign::Bottom, "vertical alignment", name, token)?,
            "p" => wrap = true,
            "pt" | "pm" | "pb" => {
                wrap = true;
                let v = match token {
                    "pt" => VAlign::Top,
                    "pm" => VAlign::Middle,
                    _ => VAlign::Bottom,
                };
                assign(&mut v_align, v, "vertical alignment", name, token)?;
            }
            t if t.starts_with('a') => {
                let degrees = parse_rotation(&t[1..]).ok_or_else(|| {
                    DirectiveError::InvalidRotation {
                        name: name.to_string(),
                        token: token.to_string(),
                    }
                })?;
                if rotation.is_some_and(|r: f64| r != degrees) {
                    return Err(DirectiveError::ConflictingParameter {
                        name: name.to_string(),
                        token: token.to_string(),
                        axis: "rotation",
                    });
                }
                rotation = Some(degrees);
            }
            _ => {
                return Err(DirectiveError::UnknownParameter {
                    name: name.to_string(),
                    kind: "text",
                    token: token.to_string(),
                })
            }
        }
    }

    Ok(TextParams {
        h_align: h_align.unwrap_or_default(),
        v_align: v_align.unwrap_or_default(),
        wrap,
        rotation_deg: rotation.unwrap_or(0.0),
    })
}

/// `-?[0-9.]+` with at most one decimal point and at least one digit.
fn parse_rotation(suffix: &str) -> Option<f64> {
    let digits = suffix.strip_prefix('-').unwrap_or(suffix);
    let valid = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|&c| c == '.').count() <= 1
        && digits.chars().any(|c| c.is_ascii_digit());
    if !valid {
        return None;
    }
    suffix.parse::<f64>().ok().filter(|d| d.is_finite())
}

fn parse_image_params(name: &str, tokens: &[&str]) -> Result<ImageParams, DirectiveError> {
    let mut fit = None;
    let mut anchor = None;

    for &token in tokens {
        match token {
            "cover" => assign(&mut fit, Fit::Cover, "fit mode", name, token)?,
            "contain" => assign(&mut fit, Fit::Contain, "fit mode", name, token)?,
            _ => match Anchor::from_token(token) {
                Some(a) => assign(&mut anchor, a, "anchor", name, token)?,
                None => {
                    return Err(DirectiveError::UnknownParameter {
                        name: name.to_string(),
                        kind: "image",
                        token: token.to_string(),
                    })
                }
            },
        }
    }

    Ok(ImageParams {
        fit: fit.unwrap_or_default(),
        anchor: anchor.unwrap_or_default(),
    })
}
