use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// PostScript points per millimetre.
pub const POINTS_PER_MM: f64 = 72.0 / 25.4;

/// Physical page size in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PageSize {
    pub const A4: PageSize = PageSize {
        width_mm: 210.0,
        height_mm: 297.0,
    };

    pub const LETTER: PageSize = PageSize {
        width_mm: 215.9,
        height_mm: 279.4,
    };

    pub fn width_pt(&self) -> f64 {
        self.width_mm * POINTS_PER_MM
    }

    pub fn height_pt(&self) -> f64 {
        self.height_mm * POINTS_PER_MM
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::A4
    }
}

#[derive(Debug, Error)]
pub enum PageSizeParseError {
    #[error("Invalid page size: expected a4, letter or WIDTHxHEIGHT in mm (e.g., 210x297)")]
    InvalidFormat,
    #[error("Invalid width: {0}")]
    InvalidWidth(String),
    #[error("Invalid height: {0}")]
    InvalidHeight(String),
    #[error("Page dimensions must be positive")]
    NonPositive,
}

impl FromStr for PageSize {
    type Err = PageSizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "a4" => return Ok(PageSize::A4),
            "letter" => return Ok(PageSize::LETTER),
            _ => {}
        }

        let (width, height) = trimmed
            .split_once('x')
            .ok_or(PageSizeParseError::InvalidFormat)?;
        if height.contains('x') {
            return Err(PageSizeParseError::InvalidFormat);
        }

        let width_mm: f64 = width
            .trim()
            .parse()
            .map_err(|_| PageSizeParseError::InvalidWidth(width.to_string()))?;
        let height_mm: f64 = height
            .trim()
            .parse()
            .map_err(|_| PageSizeParseError::InvalidHeight(height.to_string()))?;

        if !(width_mm > 0.0 && height_mm > 0.0) || !width_mm.is_finite() || !height_mm.is_finite()
        {
            return Err(PageSizeParseError::NonPositive);
        }

        Ok(PageSize {
            width_mm,
            height_mm,
        })
    }
}

impl TryFrom<String> for PageSize {
    type Error = PageSizeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PageSize> for String {
    fn from(size: PageSize) -> Self {
        size.to_string()
    }
}

impl std::fmt::Display for PageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width_mm, self.height_mm)
    }
}
