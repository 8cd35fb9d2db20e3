//! Pixel-space detections and the labels document they are read from.

use std::path::Path;

/// Label of boxes that outline panels rather than defects.
pub const PANEL_LABEL: &str = "solarpanels";

/// Defect classes produced by the thermal detector.
pub const KNOWN_DEFECT_CLASSES: [&str; 3] = ["hotspots", "faultydiodes", "offlinepanels"];

/// Why a detection box cannot be placed in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefectGeometryError {
    /// A box field is NaN or infinite.
    NonFinite,
    /// `left` or `top` is negative.
    NegativeOrigin { left: f64, top: f64 },
    /// `width` or `height` is not strictly positive.
    NonPositiveSize { width: f64, height: f64 },
}

impl std::fmt::Display for DefectGeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFinite => write!(f, "bounding box has non-finite fields"),
            Self::NegativeOrigin { left, top } => {
                write!(f, "bounding box origin ({}, {}) is negative", left, top)
            }
            Self::NonPositiveSize { width, height } => {
                write!(f, "bounding box size {}x{} is not positive", width, height)
            }
        }
    }
}

impl std::error::Error for DefectGeometryError {}

/// Axis-aligned box in detection pixel space.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn validate(&self) -> Result<(), DefectGeometryError> {
        let fields = [self.left, self.top, self.width, self.height];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(DefectGeometryError::NonFinite);
        }
        if self.left < 0.0 || self.top < 0.0 {
            return Err(DefectGeometryError::NegativeOrigin {
                left: self.left,
                top: self.top,
            });
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(DefectGeometryError::NonPositiveSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Box center as pixel `[row, col]`.
    pub fn center(&self) -> [f64; 2] {
        [self.top + self.height * 0.5, self.left + self.width * 0.5]
    }

    /// Corners as pixel `[row, col]`, clockwise from top-left.
    pub fn corners(&self) -> [[f64; 2]; 4] {
        let right = self.left + self.width;
        let bottom = self.top + self.height;
        [
            [self.top, self.left],
            [self.top, right],
            [bottom, right],
            [bottom, self.left],
        ]
    }
}

/// One defect detection. `index` is its position among the defects of the
/// labels document and is the defect's identity for the whole run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Defect {
    pub index: usize,
    pub bbox: BoundingBox,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Defect {
    pub fn is_known_class(&self) -> bool {
        KNOWN_DEFECT_CLASSES.contains(&self.label.as_str())
    }
}

fn nan() -> f64 {
    f64::NAN
}

/// Box entry of the labels document. Missing numeric fields become NaN so a
/// single malformed box is rejected on its own instead of failing the parse.
#[derive(Debug, Clone, serde::Deserialize)]
struct LabeledBox {
    #[serde(default = "nan")]
    left: f64,
    #[serde(default = "nan")]
    top: f64,
    #[serde(default = "nan")]
    width: f64,
    #[serde(default = "nan")]
    height: f64,
    #[serde(default)]
    label: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct LabelRecord {
    #[serde(rename = "boundingBox")]
    bounding_box: BoxGroup,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct BoxGroup {
    #[serde(rename = "boundingBoxes", default)]
    bounding_boxes: Vec<LabeledBox>,
}

/// Detections split into defects and panel outlines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    pub defects: Vec<Defect>,
    pub panels: Vec<BoundingBox>,
}

impl DetectionSet {
    /// Parse a labels document. Only the first record is read; a document
    /// that is not a list, or is an empty list, yields no detections.
    pub fn from_labels_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let first = match value {
            serde_json::Value::Array(mut records) if !records.is_empty() => records.swap_remove(0),
            _ => return Ok(Self::default()),
        };
        let record: LabelRecord = serde_json::from_value(first)?;
        Ok(Self::from_boxes(record.bounding_box.bounding_boxes))
    }

    pub fn from_labels_str(raw: &str) -> Result<Self, serde_json::Error> {
        Self::from_labels_value(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Ok(Self::from_labels_str(&data)?)
    }

    fn from_boxes(boxes: Vec<LabeledBox>) -> Self {
        let mut out = Self::default();
        for b in boxes {
            let bbox = BoundingBox::new(b.left, b.top, b.width, b.height);
            if b.label == PANEL_LABEL {
                out.panels.push(bbox);
            } else {
                out.defects.push(Defect {
                    index: out.defects.len(),
                    bbox,
                    label: b.label,
                    confidence: b.confidence,
                });
            }
        }
        out
    }
}
