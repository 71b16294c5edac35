//! Pixel formats and the negotiation policy applied when a session is configured.

use crate::backend::DeviceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PixelFormat {
    Mono8,
    Mono10,
    Mono12,
    Mono14,
    Mono16,
    BayerRG8,
    BayerGR8,
    BayerGB8,
    BayerBG8,
    BayerRG12,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Yuv422,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono10 => "Mono10",
            PixelFormat::Mono12 => "Mono12",
            PixelFormat::Mono14 => "Mono14",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::BayerGR8 => "BayerGR8",
            PixelFormat::BayerGB8 => "BayerGB8",
            PixelFormat::BayerBG8 => "BayerBG8",
            PixelFormat::BayerRG12 => "BayerRG12",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Bgr8 => "BGR8",
            PixelFormat::Rgba8 => "RGBA8",
            PixelFormat::Bgra8 => "BGRA8",
            PixelFormat::Yuv422 => "YUV422Packed",
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRG8
            | PixelFormat::BayerGR8
            | PixelFormat::BayerGB8
            | PixelFormat::BayerBG8 => 1,
            PixelFormat::Mono10
            | PixelFormat::Mono12
            | PixelFormat::Mono14
            | PixelFormat::Mono16
            | PixelFormat::BayerRG12
            | PixelFormat::Yuv422 => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    /// Formats the frame consumer can display without conversion.
    pub fn is_host_native(&self) -> bool {
        matches!(
            self,
            PixelFormat::Mono8
                | PixelFormat::Mono16
                | PixelFormat::Rgb8
                | PixelFormat::Bgr8
                | PixelFormat::Rgba8
                | PixelFormat::Bgra8
        )
    }

    pub fn is_color(&self) -> bool {
        matches!(
            self,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 | PixelFormat::Rgba8 | PixelFormat::Bgra8
        )
    }

    pub fn is_mono(&self) -> bool {
        matches!(
            self,
            PixelFormat::Mono8
                | PixelFormat::Mono10
                | PixelFormat::Mono12
                | PixelFormat::Mono14
                | PixelFormat::Mono16
        )
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s {
            "Mono8" => PixelFormat::Mono8,
            "Mono10" => PixelFormat::Mono10,
            "Mono12" => PixelFormat::Mono12,
            "Mono14" => PixelFormat::Mono14,
            "Mono16" => PixelFormat::Mono16,
            "BayerRG8" => PixelFormat::BayerRG8,
            "BayerGR8" => PixelFormat::BayerGR8,
            "BayerGB8" => PixelFormat::BayerGB8,
            "BayerBG8" => PixelFormat::BayerBG8,
            "BayerRG12" => PixelFormat::BayerRG12,
            "RGB8" | "RGB8Packed" => PixelFormat::Rgb8,
            "BGR8" | "BGR8Packed" => PixelFormat::Bgr8,
            "RGBA8" | "RGBA8Packed" => PixelFormat::Rgba8,
            "BGRA8" | "BGRA8Packed" => PixelFormat::Bgra8,
            "YUV422Packed" => PixelFormat::Yuv422,
            other => return Err(format!("unknown pixel format: {other}")),
        };
        Ok(format)
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PixelFormat> for String {
    fn from(f: PixelFormat) -> Self {
        f.as_str().to_string()
    }
}

/// Outcome of format negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub format: PixelFormat,
    /// The consumer must convert frames (e.g. demosaic) before display.
    pub needs_host_conversion: bool,
}

/// Pick a capture format from what the device offers, in device order:
/// a host-native color format, else raw `BayerRG8` (converted on the host),
/// else a host-native monochrome format.
pub fn negotiate(available: &[PixelFormat]) -> Result<Negotiated, DeviceError> {
    if let Some(f) = available.iter().find(|f| f.is_host_native() && f.is_color()) {
        return Ok(Negotiated {
            format: f.clone(),
            needs_host_conversion: false,
        });
    }
    if available.contains(&PixelFormat::BayerRG8) {
        return Ok(Negotiated {
            format: PixelFormat::BayerRG8,
            needs_host_conversion: true,
        });
    }
    if let Some(f) = available.iter().find(|f| f.is_host_native() && f.is_mono()) {
        return Ok(Negotiated {
            format: f.clone(),
            needs_host_conversion: false,
        });
    }
    let offered: Vec<&str> = available.iter().map(PixelFormat::as_str).collect();
    Err(DeviceError::Config(format!(
        "no supported pixel format among [{}]",
        offered.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use PixelFormat::*;

    #[test]
    fn test_prefers_color() {
        let n = negotiate(&[Mono8, BayerRG8, Bgr8, Rgb8]).unwrap();
        assert_eq!(n.format, Bgr8);
        assert!(!n.needs_host_conversion);
    }

    #[test]
    fn test_bayer_before_mono() {
        let n = negotiate(&[Mono8, BayerRG8, Mono12]).unwrap();
        assert_eq!(n.format, BayerRG8);
        assert!(n.needs_host_conversion);
    }

    #[test]
    fn test_mono_fallback() {
        let n = negotiate(&[Mono12, Mono16, Mono8]).unwrap();
        assert_eq!(n.format, Mono16);
    }

    #[test]
    fn test_other_bayer_is_not_accepted() {
        assert!(negotiate(&[BayerGR8]).is_err());
    }

    #[test]
    fn test_nothing_usable() {
        let err = negotiate(&[Mono12, Yuv422]).unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
        assert!(negotiate(&[]).is_err());
    }

    #[test]
    fn test_parse_legacy_names() {
        assert_eq!("RGB8Packed".parse::<PixelFormat>().unwrap(), Rgb8);
        assert!("Mono9".parse::<PixelFormat>().is_err());
    }
}
