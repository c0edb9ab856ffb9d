//! Triangle drawing against any host that exposes the four calls below.

use log::debug;

use super::vertex::{Color, Triangle, VertexLayout, POSITION_LAYOUT, TRIANGLE_VERTICES};
use super::RenderError;

/// The subset of a graphics host needed to draw with the triangle program.
///
/// The vertex buffer, the color and the attribute layout are shared state:
/// every call replaces what the previous one left behind.
pub trait DrawContext {
    type Error;

    /// Overwrites the whole vertex buffer.
    fn upload_positions(&mut self, positions: &[f32]) -> Result<(), Self::Error>;

    fn set_color(&mut self, color: Color) -> Result<(), Self::Error>;

    /// Points the position attribute at the vertex buffer.
    fn bind_attribute(&mut self, layout: VertexLayout) -> Result<(), Self::Error>;

    /// Draws `count` vertices starting at `first` as a triangle list.
    fn draw_arrays(&mut self, first: u32, count: u32) -> Result<(), Self::Error>;
}

/// Host-independent bookkeeping of what has been set since a frame began.
///
/// Every `DrawContext` runs its calls through this first, so all hosts reject
/// the same misuse with the same error.
#[derive(Debug, Default)]
pub struct DrawState {
    capacity: Option<usize>,
    buffered: usize,
    color: Option<Color>,
    layout: Option<VertexLayout>,
}

impl DrawState {
    /// State for a vertex buffer holding at most `capacity` floats.
    pub fn with_capacity(capacity: usize) -> Self {
        DrawState {
            capacity: Some(capacity),
            ..DrawState::default()
        }
    }

    pub fn upload(&mut self, len: usize) -> Result<(), RenderError> {
        if let Some(capacity) = self.capacity {
            if len > capacity {
                return Err(RenderError::BufferOverflow { len, capacity });
            }
        }
        self.buffered = len;
        Ok(())
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = Some(color);
    }

    pub fn bind(&mut self, layout: VertexLayout) -> Result<(), RenderError> {
        if layout.components < 2 || layout.stride_floats() < layout.components as usize {
            return Err(RenderError::UnsupportedLayout(layout));
        }
        self.layout = Some(layout);
        Ok(())
    }

    /// Returns the color and layout a draw of `first..first + count` uses.
    pub fn check_draw(&self, first: u32, count: u32) -> Result<(Color, VertexLayout), RenderError> {
        let color = self.color.ok_or(RenderError::MissingState("color"))?;
        let layout = self.layout.ok_or(RenderError::MissingState("vertex layout"))?;

        let available = layout.vertex_count(self.buffered);
        if first as usize + count as usize > available {
            return Err(RenderError::VertexRange {
                first,
                count,
                available,
            });
        }
        Ok((color, layout))
    }
}

/// Uploads the triangle, sets its color and draws its three vertices.
pub fn draw_triangle<C: DrawContext>(ctx: &mut C, triangle: &Triangle) -> Result<(), C::Error> {
    ctx.upload_positions(triangle.positions())?;
    ctx.set_color(triangle.color())?;
    ctx.bind_attribute(POSITION_LAYOUT)?;
    ctx.draw_arrays(0, TRIANGLE_VERTICES as u32)
}

pub fn draw_scene<C: DrawContext>(ctx: &mut C, scene: &[Triangle]) -> Result<(), C::Error> {
    for (i, triangle) in scene.iter().enumerate() {
        debug!("drawing triangle {} at {:?}", i, triangle.centroid());
        draw_triangle(ctx, triangle)?;
    }
    Ok(())
}
