//! Raster Export - Documents To PNG/JPEG
//!
//! Nodes are painted back to front in document order. A node's own pixels
//! are replaced by its unit override when it has one; hidden nodes hide
//! their whole subtree.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use std::io::Cursor;

use crate::document::{NodePath, TemplateDocument, TemplateNode};
use crate::pipeline::{DocumentWriter, ImageOverride, NodeOverride, OutputFormat, TextOverride, UnitError, UnitPlan};

#[derive(Debug, Clone)]
pub struct RasterWriter {
    pub jpeg_quality: u8,
}

impl RasterWriter {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality: jpeg_quality.clamp(1, 100) }
    }

    /// Composite the document for one unit.
    pub fn compose(&self, document: &TemplateDocument, plan: &UnitPlan) -> Result<RgbaImage, UnitError> {
        let mut canvas = RgbaImage::from_pixel(
            document.canvas.width,
            document.canvas.height,
            Rgba(document.background),
        );
        paint_nodes(&mut canvas, &document.nodes, &mut vec![], plan)?;
        Ok(canvas)
    }

    fn encode(&self, canvas: RgbaImage, format: OutputFormat) -> Result<Vec<u8>, UnitError> {
        let failed = |e: image::ImageError| UnitError::RasterizationFailed { reason: e.to_string() };
        let mut bytes = Vec::new();
        match format {
            OutputFormat::Png => {
                DynamicImage::ImageRgba8(canvas)
                    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                    .map_err(failed)?;
            }
            OutputFormat::Jpg => {
                // JPEG has no alpha; flatten onto white.
                let mut flat = RgbaImage::from_pixel(canvas.width(), canvas.height(), Rgba([255, 255, 255, 255]));
                imageops::overlay(&mut flat, &canvas, 0, 0);
                let rgb = DynamicImage::ImageRgba8(flat).to_rgb8();
                let encoder = JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality);
                rgb.write_with_encoder(encoder).map_err(failed)?;
            }
        }
        Ok(bytes)
    }
}

impl Default for RasterWriter {
    fn default() -> Self {
        Self::new(95)
    }
}

impl DocumentWriter for RasterWriter {
    fn export(&self, document: &TemplateDocument, plan: &UnitPlan, format: OutputFormat) -> Result<Vec<u8>, UnitError> {
        let canvas = self.compose(document, plan)?;
        self.encode(canvas, format)
    }
}

fn paint_nodes(
    canvas: &mut RgbaImage,
    nodes: &[TemplateNode],
    path: &mut NodePath,
    plan: &UnitPlan,
) -> Result<(), UnitError> {
    for (index, node) in nodes.iter().enumerate() {
        path.push(index);
        if plan.is_visible(path, node) {
            match plan.get(path) {
                Some(NodeOverride::Text(text)) => paint_text(canvas, text),
                Some(NodeOverride::Image(image)) => paint_image(canvas, image),
                Some(NodeOverride::Blank) => {}
                Some(NodeOverride::Visibility(_)) | None => paint_own(canvas, node)?,
            }
            paint_nodes(canvas, &node.children, path, plan)?;
        }
        path.pop();
    }
    Ok(())
}

fn paint_own(canvas: &mut RgbaImage, node: &TemplateNode) -> Result<(), UnitError> {
    let bounds = node.bounds;
    if bounds.is_empty() {
        return Ok(());
    }
    let layer = if let Some(pixels) = &node.pixels {
        let decoded = image::load_from_memory(pixels)
            .map_err(|e| UnitError::RasterizationFailed {
                reason: format!("node '{}': {}", node.name, e),
            })?
            .to_rgba8();
        if decoded.dimensions() == (bounds.width, bounds.height) {
            decoded
        } else {
            imageops::resize(&decoded, bounds.width, bounds.height, FilterType::Triangle)
        }
    } else if let Some(fill) = node.fill {
        RgbaImage::from_pixel(bounds.width, bounds.height, Rgba(fill))
    } else {
        return Ok(());
    };
    imageops::overlay(canvas, &layer, bounds.left as i64, bounds.top as i64);
    Ok(())
}

fn paint_text(canvas: &mut RgbaImage, text: &TextOverride) {
    let block = &text.block;
    if block.lines.is_empty() || block.size.width == 0 || block.size.height == 0 {
        return;
    }
    let mut buffer = RgbaImage::new(block.size.width, block.size.height);
    let [r, g, b, a] = text.color;
    for (i, line) in block.lines.iter().enumerate() {
        let x0 = block.line_offset(i, text.params.h_align);
        let y0 = i as i64 * block.line_advance as i64;
        text.face.draw_line(line, &mut |x, y, coverage| {
            let (px, py) = (x0 + x, y0 + y);
            if px < 0 || py < 0 || px >= buffer.width() as i64 || py >= buffer.height() as i64 {
                return;
            }
            let alpha = (a as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
            let pixel = buffer.get_pixel_mut(px as u32, py as u32);
            if alpha > pixel[3] {
                *pixel = Rgba([r, g, b, alpha]);
            }
        });
    }

    let placed = &text.placed;
    if placed.rotation_deg == 0.0 {
        imageops::overlay(canvas, &buffer, placed.x, placed.y);
        return;
    }
    let (w, h) = (placed.width as f32, placed.height as f32);
    let (rw, rh) = (placed.rotated_width.max(1), placed.rotated_height.max(1));
    let projection = Projection::translate(-w / 2.0, -h / 2.0)
        .and_then(Projection::rotate((placed.rotation_deg as f32).to_radians()))
        .and_then(Projection::translate(rw as f32 / 2.0, rh as f32 / 2.0));
    let mut rotated = RgbaImage::new(rw, rh);
    warp_into(&buffer, &projection, Interpolation::Bilinear, Rgba([0, 0, 0, 0]), &mut rotated);
    imageops::overlay(canvas, &rotated, placed.rotated_x, placed.rotated_y);
}

fn paint_image(canvas: &mut RgbaImage, image: &ImageOverride) {
    let crop = image.placement.crop;
    let dest = image.placement.dest;
    if crop.is_empty() || dest.is_empty() {
        return;
    }
    let region = imageops::crop_imm(&image.image, crop.left.max(0) as u32, crop.top.max(0) as u32, crop.width, crop.height).to_image();
    let scaled = if region.dimensions() == (dest.width, dest.height) {
        region
    } else {
        imageops::resize(&region, dest.width, dest.height, FilterType::Lanczos3)
    };
    imageops::overlay(canvas, &scaled, dest.left as i64, dest.top as i64);
}
