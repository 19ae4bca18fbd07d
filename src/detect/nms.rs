use crate::detect::result::Detection;

/// Greedy non-maximum suppression: sort by confidence descending, suppress
/// boxes overlapping an already-kept box above `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_unstable_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if detections[i].bbox.iou(&detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
        kept.push(detections[i].clone());
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(conf: f32, x: f32) -> Detection {
        Detection::new(
            "car",
            conf,
            BoundingBox::new(x, 0.0, x + 10.0, 10.0).unwrap(),
        )
    }

    #[test]
    fn nms_keeps_highest_confidence_of_overlapping_pair() {
        let a = det(0.9, 0.0);
        let b = det(0.6, 2.0); // heavy overlap with a
        let kept = non_max_suppression(vec![b, a], 0.45);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let a = det(0.9, 0.0);
        let b = det(0.6, 100.0);
        let kept = non_max_suppression(vec![a, b], 0.45);
        assert_eq!(kept.len(), 2);
    }
}
