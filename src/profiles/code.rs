//! Scannable connection codes.
//!
//! A code is a pure function of the connection string; nothing about the
//! profile beyond its link goes into it.

use std::fmt;
use std::str::FromStr;

use qrcode::render::{svg, unicode};
use qrcode::QrCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot encode link as a QR code: {0}")]
pub struct CodeError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeFormat {
    /// Standalone SVG document.
    Svg,
    /// Half-block text for a terminal.
    Terminal,
}

impl FromStr for CodeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "svg" => Ok(CodeFormat::Svg),
            "terminal" | "text" => Ok(CodeFormat::Terminal),
            other => Err(format!("unknown code format '{}' (svg, terminal)", other)),
        }
    }
}

impl fmt::Display for CodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeFormat::Svg => f.write_str("svg"),
            CodeFormat::Terminal => f.write_str("terminal"),
        }
    }
}

pub fn render(link: &str, format: CodeFormat) -> Result<String, CodeError> {
    let code = QrCode::new(link.as_bytes()).map_err(|e| CodeError(e.to_string()))?;
    let image = match format {
        CodeFormat::Svg => code
            .render::<svg::Color>()
            .min_dimensions(256, 256)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build(),
        // inverted so the code reads on dark terminal backgrounds
        CodeFormat::Terminal => code
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build(),
    };
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "vless://0f8e6b8c-3c1b-4d4e-9a43-3a8f3b9f1a11@203.0.113.7:443?type=tcp#bob";

    #[test]
    fn test_svg() {
        let svg = render(LINK, CodeFormat::Svg).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("#000000"));
    }

    #[test]
    fn test_terminal() {
        let text = render(LINK, CodeFormat::Terminal).unwrap();
        assert!(text.lines().count() > 10);
        assert_eq!(text, render(LINK, CodeFormat::Terminal).unwrap());
    }

    #[test]
    fn test_too_long() {
        let huge = "x".repeat(8000);
        assert!(render(&huge, CodeFormat::Svg).is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("SVG".parse::<CodeFormat>().unwrap(), CodeFormat::Svg);
        assert_eq!("terminal".parse::<CodeFormat>().unwrap(), CodeFormat::Terminal);
        assert!("png".parse::<CodeFormat>().is_err());
    }
}
