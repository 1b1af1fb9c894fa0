use crate::bounding_box::{BoundingBox, BoxCoords, Detection};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorLabel {
    pub label: String,
    pub color: [u8; 3],
}

/// Class id to label table, indexed by the detector's class id.
#[derive(Debug, Clone, Default)]
pub struct ClassLabels {
    labels: Vec<ColorLabel>,
}

impl ClassLabels {
    pub fn new(labels: Vec<ColorLabel>) -> Self {
        Self { labels }
    }

    pub fn load(path: &Path) -> Result<Self, LabelsError> {
        let file = File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, LabelsError> {
        let mut labels = Vec::new();

        for (index, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            labels.push(parse_line(&line).map_err(|reason| LabelsError::InvalidLine {
                line: index + 1,
                reason,
            })?);
        }

        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn resolve(&self, bbox: &BoundingBox) -> Detection {
        let (name, color) = match self.labels.get(bbox.class_id) {
            Some(color_label) => (color_label.label.clone(), color_label.color),
            None => (format!("Unknown class {}", bbox.class_id), [0, 0, 0]),
        };

        Detection {
            name,
            class_id: bbox.class_id,
            confidence: bbox.confidence,
            bbox: BoxCoords {
                x1: bbox.x1,
                y1: bbox.y1,
                x2: bbox.x2,
                y2: bbox.y2,
            },
            color,
        }
    }
}

fn parse_line(line: &str) -> Result<ColorLabel, String> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("expected `label,red,green,blue`, got `{}`", line));
    }

    let channel = |value: &str, name: &str| {
        value
            .trim()
            .parse::<u8>()
            .map_err(|_| format!("invalid {} value `{}`", name, value.trim()))
    };

    Ok(ColorLabel {
        label: parts[0].trim().to_string(),
        color: [
            channel(parts[1], "red")?,
            channel(parts[2], "green")?,
            channel(parts[3], "blue")?,
        ],
    })
}
