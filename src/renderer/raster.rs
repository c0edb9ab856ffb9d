//! CPU rasterizer with GL clip-space conventions.

use image::{Rgba, RgbaImage};
use log::debug;

use super::draw::{DrawContext, DrawState};
use super::vertex::{Color, VertexLayout};
use super::RenderError;

pub struct Rasterizer {
    target: RgbaImage,
    vertex_buffer: Vec<f32>,
    state: DrawState,
}

impl Rasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        Rasterizer {
            target: RgbaImage::new(width, height),
            vertex_buffer: Vec::new(),
            state: DrawState::default(),
        }
    }

    pub fn clear(&mut self, color: Color) {
        let pixel = Rgba(color.to_rgba8());
        for p in self.target.pixels_mut() {
            *p = pixel;
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.target
    }

    /// Maps a clip-space point to continuous window coordinates (origin top left).
    pub fn clip_to_window(&self, x: f32, y: f32) -> [f32; 2] {
        let (w, h) = self.target.dimensions();
        [(x + 1.0) * 0.5 * w as f32, (1.0 - y) * 0.5 * h as f32]
    }

    fn vertex(&self, layout: VertexLayout, index: usize) -> [f32; 2] {
        let base = index * layout.stride_floats();
        let x = self.vertex_buffer[base];
        let y = self.vertex_buffer[base + 1];
        self.clip_to_window(x, y)
    }

    fn fill_triangle(&mut self, v: [[f32; 2]; 3], pixel: Rgba<u8>) {
        let area = edge(v[0], v[1], v[2]);
        if area == 0.0 {
            return;
        }

        let (w, h) = self.target.dimensions();
        let min_x = v.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
        let min_y = v.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
        let max_x = (v.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
            .min(w as i64);
        let max_y = (v.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
            .min(h as i64);

        for py in min_y as i64..max_y {
            for px in min_x as i64..max_x {
                let p = [px as f32 + 0.5, py as f32 + 0.5];
                let w0 = edge(v[1], v[2], p);
                let w1 = edge(v[2], v[0], p);
                let w2 = edge(v[0], v[1], p);
                let inside = if area > 0.0 {
                    w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0
                } else {
                    w0 <= 0.0 && w1 <= 0.0 && w2 <= 0.0
                };
                if inside {
                    self.target.put_pixel(px as u32, py as u32, pixel);
                }
            }
        }
    }
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

impl DrawContext for Rasterizer {
    type Error = RenderError;

    fn upload_positions(&mut self, positions: &[f32]) -> Result<(), RenderError> {
        self.state.upload(positions.len())?;
        self.vertex_buffer.clear();
        self.vertex_buffer.extend_from_slice(positions);
        Ok(())
    }

    fn set_color(&mut self, color: Color) -> Result<(), RenderError> {
        self.state.set_color(color);
        Ok(())
    }

    fn bind_attribute(&mut self, layout: VertexLayout) -> Result<(), RenderError> {
        self.state.bind(layout)
    }

    fn draw_arrays(&mut self, first: u32, count: u32) -> Result<(), RenderError> {
        let (color, layout) = self.state.check_draw(first, count)?;
        let end = first as usize + count as usize;

        let pixel = Rgba(color.to_rgba8());
        // Trailing vertices that don't form a whole triangle are ignored.
        for start in (first as usize..end).step_by(3).take_while(|s| s + 3 <= end) {
            let v = [
                self.vertex(layout, start),
                self.vertex(layout, start + 1),
                self.vertex(layout, start + 2),
            ];
            self.fill_triangle(v, pixel);
        }
        debug!("rasterized {} vertices", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::draw::{draw_scene, draw_triangle};
    use crate::renderer::vertex::{Triangle, BACKGROUND, POSITION_LAYOUT, SCENE};

    fn pixel_at(raster: &Rasterizer, x: f32, y: f32) -> [u8; 4] {
        let [wx, wy] = raster.clip_to_window(x, y);
        raster.target.get_pixel(wx as u32, wy as u32).0
    }

    fn render_scene(width: u32, height: u32) -> Rasterizer {
        let mut raster = Rasterizer::new(width, height);
        raster.clear(BACKGROUND);
        draw_scene(&mut raster, &SCENE).unwrap();
        raster
    }

    #[test]
    fn scene_covers_each_triangle_centroid() {
        let raster = render_scene(400, 400);
        for tri in SCENE.iter() {
            let [cx, cy] = tri.centroid();
            assert_eq!(pixel_at(&raster, cx, cy), tri.color().to_rgba8(), "{:?}", tri);
        }
    }

    #[test]
    fn first_triangle_is_around_the_center() {
        let raster = render_scene(300, 300);
        let purple = SCENE[0].color().to_rgba8();
        assert_eq!(pixel_at(&raster, 0.0, -0.05), purple);
        assert_eq!(pixel_at(&raster, 0.0, -0.45), purple);
    }

    #[test]
    fn background_remains_outside_triangles() {
        let raster = render_scene(200, 100);
        let bg = BACKGROUND.to_rgba8();
        assert_eq!(raster.target.get_pixel(0, 0).0, bg);
        assert_eq!(raster.target.get_pixel(199, 99).0, bg);
        assert_eq!(pixel_at(&raster, -0.9, 0.9), bg);
        assert_eq!(pixel_at(&raster, 0.8, -0.8), bg);
    }

    #[test]
    fn later_draws_cover_earlier_ones() {
        let raster = render_scene(400, 400);
        // inside both the first and second triangle
        assert_eq!(pixel_at(&raster, 0.0, 0.3), SCENE[1].color().to_rgba8());
    }

    #[test]
    fn upload_replaces_buffer_and_is_idempotent() {
        let mut raster = Rasterizer::new(16, 16);
        raster.upload_positions(&[0.0; 12]).unwrap();
        draw_triangle(&mut raster, &SCENE[2]).unwrap();
        let once = raster.vertex_buffer.clone();
        draw_triangle(&mut raster, &SCENE[2]).unwrap();
        assert_eq!(raster.vertex_buffer, once);
        assert_eq!(once.len(), 6);
    }

    #[test]
    fn drawing_without_color_fails() {
        let mut raster = Rasterizer::new(8, 8);
        raster.upload_positions(SCENE[0].positions()).unwrap();
        raster.bind_attribute(POSITION_LAYOUT).unwrap();
        match raster.draw_arrays(0, 3) {
            Err(RenderError::MissingState(what)) => assert_eq!(what, "color"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn drawing_past_buffer_fails() {
        let mut raster = Rasterizer::new(8, 8);
        raster.upload_positions(&[0.0, 0.0, 1.0, 0.0]).unwrap();
        raster.set_color(SCENE[0].color()).unwrap();
        raster.bind_attribute(POSITION_LAYOUT).unwrap();
        match raster.draw_arrays(0, 3) {
            Err(RenderError::VertexRange { available, .. }) => assert_eq!(available, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn clockwise_and_counter_clockwise_both_fill() {
        let color = SCENE[3].color();
        let ccw = Triangle::new([-1.0, -1.0, 1.0, -1.0, 0.0, 1.0], color).unwrap();
        let cw = Triangle::new([-1.0, -1.0, 0.0, 1.0, 1.0, -1.0], color).unwrap();
        for tri in [ccw, cw].iter() {
            let mut raster = Rasterizer::new(32, 32);
            raster.clear(BACKGROUND);
            draw_triangle(&mut raster, tri).unwrap();
            assert_eq!(pixel_at(&raster, 0.0, 0.0), color.to_rgba8());
        }
    }
}
