use std::path::Path;

use image::{imageops, RgbImage};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::DetectorError;
use crate::models::{ObbInstance, ObbModel, PersonPose, PoseModel};
use wrapguard_core::Keypoint;

/// Letterbox-resizes into a square `size`×`size` canvas and returns the
/// CHW/RGB/0..1 tensor plus the scale+padding needed to map detections back
/// to the original frame.
struct Preprocessed {
    tensor: ndarray::Array4<f32>,
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

fn letterbox(frame: &RgbImage, size: u32) -> Preprocessed {
    let (w, h) = (frame.width(), frame.height());
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let (new_w, new_h) = ((w as f32 * scale) as u32, (h as f32 * scale) as u32);
    let resized = imageops::resize(frame, new_w.max(1), new_h.max(1), imageops::FilterType::Triangle);

    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let mut canvas = RgbImage::from_pixel(size, size, image::Rgb([114, 114, 114]));
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, px) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px.0[c] as f32 / 255.0;
        }
    }

    Preprocessed { tensor, scale, pad_x, pad_y }
}

fn unletterbox(x: f32, y: f32, p: &Preprocessed) -> (f32, f32) {
    ((x - p.pad_x) / p.scale, (y - p.pad_y) / p.scale)
}

fn iou(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> f32 {
    let ix1 = a.0.max(b.0);
    let iy1 = a.1.max(b.1);
    let ix2 = a.2.min(b.2);
    let iy2 = a.3.min(b.3);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a.2 - a.0).max(0.0) * (a.3 - a.1).max(0.0);
    let area_b = (b.2 - b.0).max(0.0) * (b.3 - b.1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy NMS over (score, bbox) pairs, returning the surviving indices.
fn nms(boxes: &[(f32, (f32, f32, f32, f32))], iou_thresh: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| boxes[b].0.partial_cmp(&boxes[a].0).unwrap());
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for &i in &order {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order {
            if j == i || suppressed[j] {
                continue;
            }
            if iou(boxes[i].1, boxes[j].1) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }
    keep
}

/// YOLOv8-pose ONNX model: 17-keypoint human pose, loaded once at startup.
pub struct OrtPoseModel {
    session: Session,
    img_size: u32,
    confidence: f32,
}

impl OrtPoseModel {
    pub fn load(path: &Path, img_size: u32, confidence: f32) -> Result<Self, DetectorError> {
        let session = Session::builder()
            .and_then(|b| Ok(b.with_optimization_level(GraphOptimizationLevel::Level3)?))
            .and_then(|mut b| b.commit_from_file(path))
            .map_err(|e| DetectorError::ModelLoad {
                path: path.display().to_string(),
                source: anyhow::Error::new(e),
            })?;
        Ok(OrtPoseModel { session, img_size, confidence })
    }
}

impl PoseModel for OrtPoseModel {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<PersonPose>, DetectorError> {
        let pre = letterbox(frame, self.img_size);
        let input =
            Tensor::from_array(pre.tensor.clone()).map_err(|e| DetectorError::PoseInference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => input])
            .map_err(|e| DetectorError::PoseInference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::PoseInference(e.to_string()))?;

        // YOLOv8-pose head: [1, 56, N] = 4 bbox + 1 obj + 17*3 keypoints, transposed.
        let n = shape[2] as usize;
        let stride = shape[1] as usize;
        let mut candidates = Vec::new();
        for i in 0..n {
            let get = |row: usize| data[row * n + i];
            let obj = get(4);
            if obj < self.confidence {
                continue;
            }
            let (cx, cy, bw, bh) = (get(0), get(1), get(2), get(3));
            let bbox = (cx - bw / 2.0, cy - bh / 2.0, cx + bw / 2.0, cy + bh / 2.0);
            let mut keypoints = Vec::with_capacity(17);
            for k in 0..17 {
                let base = 5 + k * 3;
                if base + 2 >= stride {
                    break;
                }
                let (kx, ky) = unletterbox(get(base), get(base + 1), &pre);
                keypoints.push(Keypoint { x: kx, y: ky, confidence: get(base + 2) });
            }
            let (x0, y0) = unletterbox(bbox.0, bbox.1, &pre);
            let (x1, y1) = unletterbox(bbox.2, bbox.3, &pre);
            candidates.push((obj, (x0, y0, x1, y1), keypoints));
        }

        let boxes: Vec<(f32, (f32, f32, f32, f32))> =
            candidates.iter().map(|(score, bbox, _)| (*score, *bbox)).collect();
        let keep = nms(&boxes, 0.45);

        Ok(keep
            .into_iter()
            .map(|i| {
                let (score, bbox, keypoints) = candidates[i].clone();
                PersonPose { keypoints, bbox_xyxy: bbox, confidence: score }
            })
            .collect())
    }
}

/// YOLOv8-OBB ONNX model: oriented boxes over {forklift_clamp,
/// paper_roll_small, paper_roll_big}.
pub struct OrtObbModel {
    session: Session,
    img_size: u32,
    confidence: f32,
}

impl OrtObbModel {
    pub fn load(path: &Path, img_size: u32, confidence: f32) -> Result<Self, DetectorError> {
        let session = Session::builder()
            .and_then(|b| Ok(b.with_optimization_level(GraphOptimizationLevel::Level3)?))
            .and_then(|mut b| b.commit_from_file(path))
            .map_err(|e| DetectorError::ModelLoad {
                path: path.display().to_string(),
                source: anyhow::Error::new(e),
            })?;
        Ok(OrtObbModel { session, img_size, confidence })
    }
}

impl ObbModel for OrtObbModel {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<ObbInstance>, DetectorError> {
        let pre = letterbox(frame, self.img_size);
        let input =
            Tensor::from_array(pre.tensor.clone()).map_err(|e| DetectorError::ObbInference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => input])
            .map_err(|e| DetectorError::ObbInference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::ObbInference(e.to_string()))?;

        // YOLOv8-OBB head: [1, 4 + num_classes + 1, N] = cx,cy,w,h,{cls scores},angle.
        let n = shape[2] as usize;
        let stride = shape[1] as usize;
        let num_classes = stride - 5;
        let mut candidates = Vec::new();
        for i in 0..n {
            let get = |row: usize| data[row * n + i];
            let (best_class, best_score) = (0..num_classes)
                .map(|c| (c as u32, get(4 + c)))
                .fold((0u32, 0.0f32), |acc, x| if x.1 > acc.1 { x } else { acc });
            if best_score < self.confidence {
                continue;
            }
            let (cx, cy, bw, bh) = (get(0), get(1), get(2), get(3));
            let angle = get(4 + num_classes);
            let (ucx, ucy) = unletterbox(cx, cy, &pre);
            let (uw, uh) = (bw / pre.scale, bh / pre.scale);
            let polygon = rotated_corners(ucx, ucy, uw, uh, angle);
            let aabb = aabb_of(&polygon);
            candidates.push((best_score, aabb, ObbInstance {
                class_id: best_class,
                confidence: best_score,
                polygon,
                angle_deg: angle.to_degrees(),
            }));
        }

        let boxes: Vec<(f32, (f32, f32, f32, f32))> =
            candidates.iter().map(|(s, bbox, _)| (*s, *bbox)).collect();
        let keep = nms(&boxes, 0.45);

        Ok(keep.into_iter().map(|i| candidates[i].2.clone()).collect())
    }
}

fn rotated_corners(cx: f32, cy: f32, w: f32, h: f32, angle_rad: f32) -> [(f32, f32); 4] {
    let (sin, cos) = angle_rad.sin_cos();
    let hw = w / 2.0;
    let hh = h / 2.0;
    let corners = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)];
    let mut out = [(0.0f32, 0.0f32); 4];
    for (i, (dx, dy)) in corners.into_iter().enumerate() {
        out[i] = (cx + dx * cos - dy * sin, cy + dx * sin + dy * cos);
    }
    out
}

fn aabb_of(polygon: &[(f32, f32); 4]) -> (f32, f32, f32, f32) {
    let xs = polygon.iter().map(|p| p.0);
    let ys = polygon.iter().map(|p| p.1);
    (
        xs.clone().fold(f32::MAX, f32::min),
        ys.clone().fold(f32::MAX, f32::min),
        xs.fold(f32::MIN, f32::max),
        ys.fold(f32::MIN, f32::max),
    )
}
