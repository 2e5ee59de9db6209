use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RasterPoolError;

/// Identifier of a GPU-visible tile resource, assigned by the tile manager.
pub type ResourceId = u64;

/// Pixel layout of a tile resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceFormat {
    #[default]
    Rgba8888,
    Bgra8888,
    Rgba4444,
    Rgb565,
    Luminance8,
}

impl ResourceFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ResourceFormat::Rgba8888 | ResourceFormat::Bgra8888 => 4,
            ResourceFormat::Rgba4444 | ResourceFormat::Rgb565 => 2,
            ResourceFormat::Luminance8 => 1,
        }
    }
}

impl std::fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceFormat::Rgba8888 => write!(f, "rgba8888"),
            ResourceFormat::Bgra8888 => write!(f, "bgra8888"),
            ResourceFormat::Rgba4444 => write!(f, "rgba4444"),
            ResourceFormat::Rgb565 => write!(f, "rgb565"),
            ResourceFormat::Luminance8 => write!(f, "luminance8"),
        }
    }
}

impl FromStr for ResourceFormat {
    type Err = RasterPoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgba8888" => Ok(ResourceFormat::Rgba8888),
            "bgra8888" => Ok(ResourceFormat::Bgra8888),
            "rgba4444" => Ok(ResourceFormat::Rgba4444),
            "rgb565" => Ok(ResourceFormat::Rgb565),
            "luminance8" => Ok(ResourceFormat::Luminance8),
            other => Err(RasterPoolError::Config(format!(
                "unknown resource format '{other}'"
            ))),
        }
    }
}

/// Texture binding target the uploaded resources are created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTarget {
    #[default]
    #[serde(rename = "texture_2d")]
    Texture2D,
    TextureRectangle,
    TextureExternal,
}

impl ResourceTarget {
    /// GL enum value passed through to the resource provider.
    pub fn gl_enum(self) -> u32 {
        match self {
            ResourceTarget::Texture2D => 0x0DE1,
            ResourceTarget::TextureRectangle => 0x84F5,
            ResourceTarget::TextureExternal => 0x8D65,
        }
    }
}

impl std::fmt::Display for ResourceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceTarget::Texture2D => write!(f, "texture_2d"),
            ResourceTarget::TextureRectangle => write!(f, "texture_rectangle"),
            ResourceTarget::TextureExternal => write!(f, "texture_external"),
        }
    }
}

impl FromStr for ResourceTarget {
    type Err = RasterPoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "texture_2d" => Ok(ResourceTarget::Texture2D),
            "texture_rectangle" => Ok(ResourceTarget::TextureRectangle),
            "texture_external" => Ok(ResourceTarget::TextureExternal),
            other => Err(RasterPoolError::Config(format!(
                "unknown resource target '{other}'"
            ))),
        }
    }
}

/// Descriptor of the texture a raster task writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub width: u32,
    pub height: u32,
    pub format: ResourceFormat,
}

impl Resource {
    pub fn new(id: ResourceId, width: u32, height: u32, format: ResourceFormat) -> Self {
        Self {
            id,
            width,
            height,
            format,
        }
    }

    /// Size of the resource's pixel data, which is what an upload transfers.
    pub fn bytes(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.format.bytes_per_pixel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_bytes_follow_format() {
        let rgba = Resource::new(1, 256, 256, ResourceFormat::Rgba8888);
        assert_eq!(rgba.bytes(), 256 * 256 * 4);

        let lum = Resource::new(2, 256, 256, ResourceFormat::Luminance8);
        assert_eq!(lum.bytes(), 256 * 256);

        let empty = Resource::new(3, 0, 512, ResourceFormat::Rgb565);
        assert_eq!(empty.bytes(), 0);
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("RGBA4444".parse::<ResourceFormat>().unwrap(), ResourceFormat::Rgba4444);
        assert!("yuv420".parse::<ResourceFormat>().is_err());
    }

    #[test]
    fn target_round_trips_through_display() {
        for target in [
            ResourceTarget::Texture2D,
            ResourceTarget::TextureRectangle,
            ResourceTarget::TextureExternal,
        ] {
            assert_eq!(target.to_string().parse::<ResourceTarget>().unwrap(), target);
        }
        assert_eq!(ResourceTarget::Texture2D.gl_enum(), 0x0DE1);
    }
}
