use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::warn;

use wrapguard_core::config::RoiDrawConfig;
use wrapguard_core::{DetectionResult, RoiPixels};

use crate::error::DetectorError;

/// Loads the configured overlay font, if any. Failure to load is logged and
/// treated as "no font" rather than a fatal error — status text is cosmetic.
pub fn load_font(path: Option<&Path>) -> Option<FontVec> {
    let path = path?;
    match std::fs::read(path) {
        Ok(bytes) => match FontVec::try_from_vec(bytes) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "overlay font is not valid TrueType/OpenType data");
                None
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read overlay font");
            None
        }
    }
}

/// Renders the annotated overlay described in §4.3.7: ROI rectangle colored
/// by in-ROI state, person boxes, status/countdown/clamp/paper-roll text,
/// and the clamp polygon when one is tracked. `font` is `None` when no
/// overlay font was configured or it failed to load — the
/// rectangle/boxes/polygon still draw.
pub fn render_annotated(
    frame: &RgbImage,
    roi: &RoiPixels,
    result: &DetectionResult,
    draw_cfg: &RoiDrawConfig,
    detection_enabled: bool,
    font: Option<&FontVec>,
) -> RgbImage {
    let mut canvas = frame.clone();

    let roi_color = if result.person_in_roi {
        rgb(draw_cfg.alarm_color_rgb)
    } else {
        rgb(draw_cfg.normal_color_rgb)
    };
    draw_roi_rect(&mut canvas, roi, roi_color, draw_cfg.thickness);
    draw_person_boxes(&mut canvas, &result.person_boxes, rgb(draw_cfg.box_color_rgb));

    if let Some(font) = font {
        for (i, line) in status_lines(result, detection_enabled).iter().enumerate() {
            draw_text_mut(
                &mut canvas,
                rgb(draw_cfg.box_color_rgb),
                6,
                6 + (i as i32) * 18,
                PxScale::from(16.0),
                font,
                line,
            );
        }
    }

    if let Some(polygon) = result.clamp_polygon {
        draw_polygon(&mut canvas, &polygon, rgb(draw_cfg.box_color_rgb));
    }

    canvas
}

fn status_lines(result: &DetectionResult, detection_enabled: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if !detection_enabled {
        lines.push("DETECTION DISABLED".to_string());
    }
    lines.push(format!(
        "person_in_roi={} count={}",
        result.person_in_roi, result.person_count
    ));
    if let Some(countdown) = result.auto_start_countdown_sec {
        lines.push(format!("auto-start in {countdown:.1}s"));
    }
    if result.clamp_detected {
        lines.push(format!("clamp conf={:.2}", result.clamp_conf));
    }
    if result.paper_roll_detected {
        lines.push("paper roll detected".to_string());
    }
    lines
}

fn draw_roi_rect(canvas: &mut RgbImage, roi: &RoiPixels, color: Rgb<u8>, thickness: u32) {
    let (x0, y0, x1, y1) = roi.as_int_rect();
    let (w, h) = ((x1 - x0).max(1) as u32, (y1 - y0).max(1) as u32);
    for t in 0..thickness.max(1) {
        draw_hollow_rect_mut(
            canvas,
            Rect::at(x0 - t as i32, y0 - t as i32).of_size(w + 2 * t, h + 2 * t),
            color,
        );
    }
}

fn draw_person_boxes(canvas: &mut RgbImage, boxes: &[(f32, f32, f32, f32)], color: Rgb<u8>) {
    for &(x0, y0, x1, y1) in boxes {
        let (x0, y0, x1, y1) = (x0 as i32, y0 as i32, x1 as i32, y1 as i32);
        let (w, h) = ((x1 - x0).max(1) as u32, (y1 - y0).max(1) as u32);
        draw_hollow_rect_mut(canvas, Rect::at(x0, y0).of_size(w, h), color);
    }
}

fn draw_polygon(canvas: &mut RgbImage, polygon: &[(f32, f32); 4], color: Rgb<u8>) {
    for i in 0..4 {
        let (x0, y0) = polygon[i];
        let (x1, y1) = polygon[(i + 1) % 4];
        imageproc::drawing::draw_line_segment_mut(canvas, (x0, y0), (x1, y1), color);
    }
}

fn rgb((r, g, b): (u8, u8, u8)) -> Rgb<u8> {
    Rgb([r, g, b])
}

/// Resizes to the configured display size and encodes as JPEG at the
/// configured quality.
pub fn encode_jpeg(frame: &RgbImage, width: u32, height: u32, quality: u8) -> Result<Vec<u8>, DetectorError> {
    let resized = if frame.width() == width && frame.height() == height {
        frame.clone()
    } else {
        imageops::resize(frame, width, height, imageops::FilterType::Triangle)
    };

    let mut buf = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(&resized)
        .map_err(|e| DetectorError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::GenericImageView;
    use wrapguard_core::RoiNorm;

    fn sample_result(person_in_roi: bool) -> DetectionResult {
        DetectionResult {
            ts: Utc::now(),
            person_in_roi,
            person_count: if person_in_roi { 1 } else { 0 },
            raw_detected: person_in_roi,
            clamp_detected: false,
            clamp_conf: 0.0,
            clamp_polygon: None,
            clamp_angle_deg: None,
            paper_roll_detected: false,
            auto_start_countdown_sec: None,
            auto_start_signal: false,
            person_boxes: Vec::new(),
            annotated_jpeg: None,
            clean_jpeg: None,
        }
    }

    #[test]
    fn renders_without_a_font_and_without_panicking() {
        let frame = RgbImage::new(64, 64);
        let roi = RoiNorm::new(0.1, 0.1, 0.9, 0.9).unwrap().to_pixels(64, 64);
        let out = render_annotated(&frame, &roi, &sample_result(true), &RoiDrawConfig::default(), true, None);
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn draws_a_person_box_without_panicking() {
        let frame = RgbImage::new(64, 64);
        let roi = RoiNorm::new(0.1, 0.1, 0.9, 0.9).unwrap().to_pixels(64, 64);
        let mut result = sample_result(true);
        result.person_boxes = vec![(10.0, 10.0, 30.0, 30.0)];
        let out = render_annotated(&frame, &roi, &result, &RoiDrawConfig::default(), true, None);
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn encode_jpeg_resizes_to_requested_dimensions() {
        let frame = RgbImage::new(64, 64);
        let jpeg = encode_jpeg(&frame, 32, 32, 80).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (32, 32));
    }

    #[test]
    fn missing_font_file_is_handled_gracefully() {
        assert!(load_font(Some(Path::new("/nonexistent/font.ttf"))).is_none());
    }

    #[test]
    fn no_font_configured_returns_none() {
        assert!(load_font(None).is_none());
    }
}
