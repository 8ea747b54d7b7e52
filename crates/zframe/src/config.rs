//! Z-frame model selection and fiducial topology files.
//!
//! A topology file describes where the frame's fiducial rods sit in frame
//! coordinates, one line per group. `Side 1` and `Side 2` lines carry a
//! leading ordinal that is not part of the geometry; `Base` lines do not.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("topology line \"{0}\" carries no coordinates")]
    EmptyGroup(&'static str),
    #[error("topology text contains no recognized Side/Base lines")]
    NoGroups,
}

/// Supported Z-frame hardware models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZFrameKind {
    Z001,
    Z002,
    Z003,
}

impl ZFrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ZFrameKind::Z001 => "z001",
            ZFrameKind::Z002 => "z002",
            ZFrameKind::Z003 => "z003",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "z001" => ZFrameKind::Z001,
            "z002" => ZFrameKind::Z002,
            "z003" => ZFrameKind::Z003,
            _ => return None,
        })
    }

    /// How many fiducial rods this model presents in a cross-section.
    pub fn required_fiducials(self) -> usize {
        match self {
            ZFrameKind::Z001 => 7,
            ZFrameKind::Z002 | ZFrameKind::Z003 => 9,
        }
    }

    pub fn config_file_name(self) -> &'static str {
        match self {
            ZFrameKind::Z001 => "zframe001.txt",
            ZFrameKind::Z002 => "zframe002.txt",
            ZFrameKind::Z003 => "zframe003.txt",
        }
    }
}

/// Parsed fiducial topology: flat coordinate lists for the two side plates
/// and the base, in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZFrameTopology {
    pub side1: Vec<f64>,
    pub side2: Vec<f64>,
    pub base: Vec<f64>,
}

impl ZFrameTopology {
    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        let mut side1 = Vec::new();
        let mut side2 = Vec::new();
        let mut base = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("Side 1") {
                side1.extend(extract_numbers(rest));
            } else if let Some(rest) = line.strip_prefix("Side 2") {
                side2.extend(extract_numbers(rest));
            } else if let Some(rest) = line.strip_prefix("Base") {
                base.extend(extract_numbers(rest));
            }
        }
        if side1.is_empty() && side2.is_empty() && base.is_empty() {
            return Err(TopologyError::NoGroups);
        }
        if side1.is_empty() {
            return Err(TopologyError::EmptyGroup("Side 1"));
        }
        if side2.is_empty() {
            return Err(TopologyError::EmptyGroup("Side 2"));
        }
        if base.is_empty() {
            return Err(TopologyError::EmptyGroup("Base"));
        }
        Ok(Self { side1, side2, base })
    }

    /// Space-joined coordinate list, the argument form consumed by
    /// registration backends.
    pub fn to_argument_string(&self) -> String {
        self.side1
            .iter()
            .chain(self.side2.iter())
            .chain(self.base.iter())
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Pulls signed decimal tokens out of a line, ignoring everything else.
fn extract_numbers(text: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        if bytes[i] == b'-' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            i += 1;
        }
        if i < bytes.len() && bytes[i].is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'.' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if let Ok(value) = text[start..i].parse::<f64>() {
                numbers.push(value);
            }
        } else {
            i += 1;
        }
    }
    numbers
}
