use crate::bounding_box::BoundingBox;

fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let width = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let height = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    width.max(0.) * height.max(0.)
}

fn union(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    box1.area() + box2.area() - intersection(box1, box2)
}

fn iou(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

/// Greedy class-agnostic NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while let Some(best) = boxes.first().copied() {
        result.push(best);
        boxes = boxes
            .into_iter()
            .skip(1)
            .filter(|candidate| iou(&best, candidate) < iou_threshold)
            .collect();
    }

    result
}
