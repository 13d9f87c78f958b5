//! Turns raw detector boxes into response records and summary statistics.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::detector::RawBox;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    /// 1-based, in detector order, scoped to one response.
    pub id: usize,
    pub class_id: usize,
    pub class_name: String,
    /// Percentage in [0, 100], two decimals.
    pub confidence: f64,
    pub bbox: BoundingBox,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StatsSummary {
    pub total_detections: usize,
    pub unique_classes: usize,
    pub avg_confidence: f64,
    pub max_confidence: f64,
    pub min_confidence: f64,
    pub classes_detected: BTreeSet<String>,
}

/// Round half away from zero to two decimals. Used for every reported float.
pub fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    // Avoid serializing "-0.0".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

pub fn class_name(class_names: &[String], class_id: usize) -> String {
    class_names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// Build records in the order the detector returned them. No re-sorting.
pub fn normalize(raw_boxes: &[RawBox], class_names: &[String]) -> (Vec<DetectionRecord>, StatsSummary) {
    let detections: Vec<DetectionRecord> = raw_boxes
        .iter()
        .enumerate()
        .map(|(i, raw)| to_record(i + 1, raw, class_names))
        .collect();
    let stats = summarize(&detections);
    (detections, stats)
}

fn to_record(id: usize, raw: &RawBox, class_names: &[String]) -> DetectionRecord {
    let confidence = round2((f64::from(raw.confidence) * 100.0).clamp(0.0, 100.0));
    let (x1, x2) = ordered(raw.x1, raw.x2);
    let (y1, y2) = ordered(raw.y1, raw.y2);

    DetectionRecord {
        id,
        class_id: raw.class_id,
        class_name: class_name(class_names, raw.class_id),
        confidence,
        bbox: BoundingBox {
            x1: round2(x1),
            y1: round2(y1),
            x2: round2(x2),
            y2: round2(y2),
        },
    }
}

fn ordered(a: f32, b: f32) -> (f64, f64) {
    let (a, b) = (f64::from(a), f64::from(b));
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Aggregate statistics. All numeric fields are zero for an empty slice.
pub fn summarize(detections: &[DetectionRecord]) -> StatsSummary {
    if detections.is_empty() {
        return StatsSummary::default();
    }

    let classes_detected: BTreeSet<String> =
        detections.iter().map(|d| d.class_name.clone()).collect();
    let total: f64 = detections.iter().map(|d| d.confidence).sum();
    let max = detections.iter().map(|d| d.confidence).fold(f64::MIN, f64::max);
    let min = detections.iter().map(|d| d.confidence).fold(f64::MAX, f64::min);

    StatsSummary {
        total_detections: detections.len(),
        unique_classes: classes_detected.len(),
        avg_confidence: round2(total / detections.len() as f64),
        max_confidence: max,
        min_confidence: min,
        classes_detected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        ["person", "bicycle", "car"].iter().map(|s| s.to_string()).collect()
    }

    fn raw(class_id: usize, confidence: f32) -> RawBox {
        RawBox { class_id, confidence, x1: 10.0, y1: 20.0, x2: 30.0, y2: 40.0 }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(91.000_002_6), 91.0);
        assert_eq!(round2(12.346), 12.35);
        assert_eq!(round2(70.5), 70.5);
        assert_eq!(round2(-0.001), 0.0);
        assert!(!round2(-0.001).is_sign_negative());
    }

    #[test]
    fn test_two_box_scenario() {
        let (detections, stats) = normalize(&[raw(0, 0.91), raw(2, 0.5)], &names());

        assert_eq!(detections[0].id, 1);
        assert_eq!(detections[0].class_name, "person");
        assert_eq!(detections[0].confidence, 91.0);
        assert_eq!(detections[1].id, 2);
        assert_eq!(detections[1].class_name, "car");
        assert_eq!(detections[1].confidence, 50.0);

        assert_eq!(stats.total_detections, 2);
        assert_eq!(stats.unique_classes, 2);
        assert_eq!(stats.avg_confidence, 70.5);
        assert_eq!(stats.max_confidence, 91.0);
        assert_eq!(stats.min_confidence, 50.0);
        let expected: BTreeSet<String> = ["person", "car"].iter().map(|s| s.to_string()).collect();
        assert_eq!(stats.classes_detected, expected);
    }

    #[test]
    fn test_order_is_preserved() {
        let (detections, _) = normalize(&[raw(1, 0.3), raw(0, 0.99), raw(1, 0.6)], &names());
        let confidences: Vec<f64> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![30.0, 99.0, 60.0]);
        let ids: Vec<usize> = detections.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_input() {
        let (detections, stats) = normalize(&[], &names());
        assert!(detections.is_empty());
        assert_eq!(stats.total_detections, 0);
        assert_eq!(stats.unique_classes, 0);
        assert_eq!(stats.avg_confidence, 0.0);
        assert_eq!(stats.max_confidence, 0.0);
        assert_eq!(stats.min_confidence, 0.0);
        assert!(stats.classes_detected.is_empty());
    }

    #[test]
    fn test_bbox_ordering_and_rounding() {
        let flipped = RawBox { class_id: 0, confidence: 0.5, x1: 30.456, y1: 40.0, x2: 10.123, y2: 20.0 };
        let (detections, _) = normalize(&[flipped], &names());
        let bbox = &detections[0].bbox;
        assert!(bbox.x1 <= bbox.x2 && bbox.y1 <= bbox.y2);
        assert_eq!(bbox.x1, 10.12);
        assert_eq!(bbox.x2, 30.46);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let (detections, _) = normalize(&[raw(0, 1.2), raw(0, -0.1)], &names());
        assert_eq!(detections[0].confidence, 100.0);
        assert_eq!(detections[1].confidence, 0.0);
    }

    #[test]
    fn test_unknown_class_gets_placeholder_name() {
        let (detections, stats) = normalize(&[raw(42, 0.7)], &names());
        assert_eq!(detections[0].class_name, "class_42");
        assert_eq!(stats.unique_classes, 1);
    }

    #[test]
    fn test_stats_serialize_shape() {
        let (_, stats) = normalize(&[raw(0, 0.91), raw(0, 0.5)], &names());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["unique_classes"], 1);
        assert_eq!(json["classes_detected"], serde_json::json!(["person"]));
    }
}
