use serde::Deserialize;
use std::convert::TryFrom;
use thiserror::Error;

pub const POSITION_COMPONENTS: usize = 2;
pub const TRIANGLE_VERTICES: usize = 3;
pub const TRIANGLE_FLOATS: usize = POSITION_COMPONENTS * TRIANGLE_VERTICES;

#[derive(Debug, Error, PartialEq)]
pub enum SceneError {
    #[error("color channel {channel} is {value}, expected a value in [0, 1]")]
    ColorOutOfRange { channel: usize, value: f32 },
    #[error("position component {index} is not finite: {value}")]
    NonFinitePosition { index: usize, value: f32 },
}

/// RGBA color with every channel in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "[f32; 4]")]
pub struct Color([f32; 4]);

impl Color {
    pub fn new(rgba: [f32; 4]) -> Result<Self, SceneError> {
        for (channel, &value) in rgba.iter().enumerate() {
            if !(0.0..=1.0).contains(&value) {
                return Err(SceneError::ColorOutOfRange { channel, value });
            }
        }
        Ok(Color(rgba))
    }

    const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color([r, g, b, a])
    }

    pub fn channels(&self) -> &[f32; 4] {
        &self.0
    }

    pub fn to_rgba8(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        for (dst, &src) in out.iter_mut().zip(self.0.iter()) {
            *dst = (src * 255.0).round() as u8;
        }
        out
    }

    /// Raw bit patterns, as pushed to the fragment stage.
    pub fn to_words(&self) -> [u32; 4] {
        let mut out = [0u32; 4];
        for (dst, &src) in out.iter_mut().zip(self.0.iter()) {
            *dst = src.to_bits();
        }
        out
    }
}

impl TryFrom<[f32; 4]> for Color {
    type Error = SceneError;

    fn try_from(rgba: [f32; 4]) -> Result<Self, Self::Error> {
        Color::new(rgba)
    }
}

pub const BACKGROUND: Color = Color::rgba(0.9, 0.9, 0.9, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawTriangle")]
pub struct Triangle {
    positions: [f32; TRIANGLE_FLOATS],
    color: Color,
}

#[derive(Deserialize)]
struct RawTriangle {
    positions: [f32; TRIANGLE_FLOATS],
    color: Color,
}

impl TryFrom<RawTriangle> for Triangle {
    type Error = SceneError;

    fn try_from(raw: RawTriangle) -> Result<Self, Self::Error> {
        Triangle::new(raw.positions, raw.color)
    }
}

impl Triangle {
    pub fn new(positions: [f32; TRIANGLE_FLOATS], color: Color) -> Result<Self, SceneError> {
        if let Some((index, &value)) = positions.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(SceneError::NonFinitePosition { index, value });
        }
        Ok(Triangle { positions, color })
    }

    pub fn positions(&self) -> &[f32; TRIANGLE_FLOATS] {
        &self.positions
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// Clip-space centroid.
    pub fn centroid(&self) -> [f32; 2] {
        let p = &self.positions;
        [(p[0] + p[2] + p[4]) / 3.0, (p[1] + p[3] + p[5]) / 3.0]
    }
}

/// How vertex floats are laid out in the bound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLayout {
    pub components: u32,
    /// Bytes between consecutive vertices, 0 meaning tightly packed.
    pub stride: u32,
}

impl VertexLayout {
    pub fn stride_bytes(&self) -> u32 {
        if self.stride == 0 {
            self.components * std::mem::size_of::<f32>() as u32
        } else {
            self.stride
        }
    }

    pub fn stride_floats(&self) -> usize {
        self.stride_bytes() as usize / std::mem::size_of::<f32>()
    }

    /// Number of whole vertices readable from `floats` buffered values.
    pub fn vertex_count(&self, floats: usize) -> usize {
        let components = self.components as usize;
        let stride = self.stride_floats();
        if floats < components || stride == 0 {
            0
        } else {
            (floats - components) / stride + 1
        }
    }
}

pub const POSITION_LAYOUT: VertexLayout = VertexLayout {
    components: POSITION_COMPONENTS as u32,
    stride: 0,
};

const fn triangle(positions: [f32; TRIANGLE_FLOATS], color: Color) -> Triangle {
    Triangle { positions, color }
}

pub const SCENE: [Triangle; 4] = [
    // purple
    triangle(
        [-0.5, -0.5, 0.5, -0.5, 0.0, 0.5],
        Color::rgba(1.0, 0.0, 0.5, 1.0),
    ),
    // light blue
    triangle(
        [-0.25, 0.1, 0.25, 0.1, 0.0, 0.6],
        Color::rgba(0.0, 0.5, 1.0, 1.0),
    ),
    // light green
    triangle(
        [-0.4, -0.2, 0.0, -0.2, -0.2, 0.3],
        Color::rgba(0.0, 1.0, 0.5, 1.0),
    ),
    // yellow
    triangle(
        [0.2, -0.4, 0.6, -0.4, 0.4, 0.0],
        Color::rgba(1.0, 0.8, 0.0, 1.0),
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_literals_are_valid_draw_requests() {
        assert_eq!(SCENE.len(), 4);
        for tri in SCENE.iter() {
            assert_eq!(tri.positions().len(), 6);
            assert_eq!(tri.color().channels().len(), 4);
            assert!(Color::new(*tri.color().channels()).is_ok());
            assert!(Triangle::new(*tri.positions(), tri.color()).is_ok());
        }
    }

    #[test]
    fn color_rejects_out_of_range_channels() {
        assert_eq!(
            Color::new([1.0, 1.2, 0.0, 1.0]),
            Err(SceneError::ColorOutOfRange {
                channel: 1,
                value: 1.2
            })
        );
        assert!(Color::new([0.0, 0.0, 0.0, -0.01]).is_err());
        assert!(Color::new([f32::NAN, 0.0, 0.0, 1.0]).is_err());
        assert!(Color::new([0.0, 1.0, 0.0, 1.0]).is_ok());
    }

    #[test]
    fn triangle_rejects_non_finite_positions() {
        let color = Color::new([1.0, 1.0, 1.0, 1.0]).unwrap();
        let err = Triangle::new([0.0, 0.0, f32::INFINITY, 0.0, 0.0, 1.0], color).unwrap_err();
        assert_eq!(
            err,
            SceneError::NonFinitePosition {
                index: 2,
                value: f32::INFINITY
            }
        );
    }

    #[test]
    fn rgba8_conversion_rounds() {
        assert_eq!(SCENE[0].color().to_rgba8(), [255, 0, 128, 255]);
        assert_eq!(SCENE[3].color().to_rgba8(), [255, 204, 0, 255]);
    }

    #[test]
    fn packed_position_layout() {
        assert_eq!(POSITION_LAYOUT.stride_bytes(), 8);
        assert_eq!(POSITION_LAYOUT.vertex_count(TRIANGLE_FLOATS), 3);
        assert_eq!(POSITION_LAYOUT.vertex_count(5), 2);
        assert_eq!(POSITION_LAYOUT.vertex_count(1), 0);

        let strided = VertexLayout {
            components: 2,
            stride: 16,
        };
        assert_eq!(strided.vertex_count(10), 3);
    }
}
