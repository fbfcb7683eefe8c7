//! Image Fit - Cover And Contain On A 3x3 Anchor Grid

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directive::{Anchor, Fit, ImageParams};
use crate::document::{Rect, Size};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid image geometry: source {source_w}x{source_h}, target {target_w}x{target_h}")]
pub struct GeometryError {
    pub source_w: u32,
    pub source_h: u32,
    pub target_w: u32,
    pub target_h: u32,
}

/// Region of the source to sample and where on the canvas it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePlacement {
    /// In source pixel coordinates.
    pub crop: Rect,
    /// In canvas coordinates.
    pub dest: Rect,
}

pub struct ImageCompositor;

impl ImageCompositor {
    pub fn place(source: Size, target: Rect, params: &ImageParams) -> Result<ImagePlacement, GeometryError> {
        if source.width == 0 || source.height == 0 || target.is_empty() {
            return Err(GeometryError {
                source_w: source.width,
                source_h: source.height,
                target_w: target.width,
                target_h: target.height,
            });
        }
        Ok(match params.fit {
            Fit::Cover => cover(source, target, params.anchor),
            Fit::Contain => contain(source, target, params.anchor),
        })
    }
}

fn cover(source: Size, target: Rect, anchor: Anchor) -> ImagePlacement {
    let (sw, sh) = (source.width as f64, source.height as f64);
    let (tw, th) = (target.width as f64, target.height as f64);
    let scale = (tw / sw).max(th / sh);

    // the part of the source that maps onto the target once scaled
    let crop_w = ((tw / scale).round() as u32).clamp(1, source.width);
    let crop_h = ((th / scale).round() as u32).clamp(1, source.height);
    let crop_x = anchor.horizontal.offset(source.width as i64, crop_w as i64);
    let crop_y = anchor.vertical.offset(source.height as i64, crop_h as i64);

    ImagePlacement {
        crop: Rect::new(crop_x as i32, crop_y as i32, crop_w, crop_h),
        dest: target,
    }
}

fn contain(source: Size, target: Rect, anchor: Anchor) -> ImagePlacement {
    let (sw, sh) = (source.width as f64, source.height as f64);
    let (tw, th) = (target.width as f64, target.height as f64);
    let scale = (tw / sw).min(th / sh).min(1.0);

    let dest_w = ((sw * scale).round() as u32).clamp(1, target.width);
    let dest_h = ((sh * scale).round() as u32).clamp(1, target.height);
    let dest_x = target.left as i64 + anchor.horizontal.offset(target.width as i64, dest_w as i64);
    let dest_y = target.top as i64 + anchor.vertical.offset(target.height as i64, dest_h as i64);

    ImagePlacement {
        crop: Rect::new(0, 0, source.width, source.height),
        dest: Rect::new(dest_x as i32, dest_y as i32, dest_w, dest_h),
    }
}
