use gfx_hal::{adapter::Adapter, format as f, prelude::*, pso, window, Backend};
use log::info;

use super::RenderError;

pub struct Swapchain<'a, B: Backend> {
    device: &'a B::Device,
    adapter: &'a Adapter<B>,
    pub viewport: pso::Viewport,
    pub dims: window::Extent2D,
    pub surface: &'a mut B::Surface,
    pub format: f::Format,
}

impl<'a, B: Backend> Swapchain<'a, B> {
    pub fn new(
        device: &'a B::Device,
        surface: &'a mut B::Surface,
        adapter: &'a Adapter<B>,
        dims: window::Extent2D,
    ) -> Result<Self, RenderError> {
        let format = pick_format(surface.supported_formats(&adapter.physical_device))?;

        let mut swapchain = Swapchain {
            device,
            surface,
            adapter,
            viewport: pso::Viewport {
                rect: pso::Rect {
                    x: 0,
                    y: 0,
                    w: dims.width as _,
                    h: dims.height as _,
                },
                depth: 0.0..1.0,
            },
            format,
            dims,
        };

        swapchain.recreate()?;
        Ok(swapchain)
    }

    pub fn resize(&mut self, dims: window::Extent2D) -> Result<(), RenderError> {
        self.dims = dims;
        self.recreate()
    }

    pub fn recreate(&mut self) -> Result<(), RenderError> {
        let caps = self.surface.capabilities(&self.adapter.physical_device);

        let mut swap_config = window::SwapchainConfig::from_caps(&caps, self.format, self.dims);
        swap_config.present_mode = window::PresentMode::FIFO;
        let extent = swap_config.extent;
        unsafe {
            self.surface
                .configure_swapchain(&self.device, swap_config)
                .map_err(|e| RenderError::device("configure swapchain", e))?;
        }

        self.dims = extent;
        self.viewport.rect.w = extent.width as _;
        self.viewport.rect.h = extent.height as _;
        info!("swapchain configured at {}x{}", extent.width, extent.height);
        Ok(())
    }
}

/// Prefers a Unorm format so colors are written as given, without sRGB encoding.
///
/// `None` means the surface accepts any format.
fn pick_format(formats: Option<Vec<f::Format>>) -> Result<f::Format, RenderError> {
    match formats {
        None => Ok(f::Format::Rgba8Unorm),
        Some(formats) => formats
            .iter()
            .find(|format| format.base_format().1 == f::ChannelType::Unorm)
            .or_else(|| formats.first())
            .copied()
            .ok_or(RenderError::NoSurfaceFormat),
    }
}

impl<'a, B: Backend> Drop for Swapchain<'a, B> {
    fn drop(&mut self) {
        unsafe { self.surface.unconfigure_swapchain(&self.device) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_format_surface_gets_unorm() {
        assert_eq!(pick_format(None).unwrap(), f::Format::Rgba8Unorm);
    }

    #[test]
    fn unorm_is_preferred_over_srgb() {
        let formats = vec![f::Format::Bgra8Srgb, f::Format::Bgra8Unorm];
        assert_eq!(pick_format(Some(formats)).unwrap(), f::Format::Bgra8Unorm);
    }

    #[test]
    fn first_format_when_no_unorm() {
        let formats = vec![f::Format::Bgra8Srgb, f::Format::Rgba8Srgb];
        assert_eq!(pick_format(Some(formats)).unwrap(), f::Format::Bgra8Srgb);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        match pick_format(Some(vec![])) {
            Err(RenderError::NoSurfaceFormat) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
