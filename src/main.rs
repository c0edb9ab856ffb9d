#[cfg(feature = "metal")]
use gfx_backend_metal as back;

#[cfg(feature = "vulkan")]
use gfx_backend_vulkan as back;

mod config;
mod renderer;

use config::{Config, ConfigError};
use renderer::raster::Rasterizer;
use renderer::shader::{
    self, ShaderError, ShaderStage, FRAGMENT_SHADER_SOURCE, VERTEX_SHADER_SOURCE,
};
use renderer::{draw, RenderError, Renderer};

use gfx_hal::{adapter::Adapter, prelude::*, queue::family::QueueFamilyId, window, Backend, Features};
use log::{error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to create window: {0}")]
    Window(String),
    #[error("graphics backend: {0}")]
    Backend(String),
}

impl AppError {
    fn backend(err: impl fmt::Debug) -> Self {
        AppError::Backend(format!("{:?}", err))
    }
}

#[derive(Debug, PartialEq)]
enum RenderEvent {
    Resized(window::Extent2D),
    /// The window contents were lost and must be drawn again.
    Redraw,
    Close,
}

#[derive(Debug)]
enum UserEvent {
    RenderStopped,
}

fn main() {
    env_logger::init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let result = Config::load_or_default(config_path.as_deref())
        .map_err(AppError::from)
        .and_then(|config| match config.output.clone() {
            Some(path) => render_headless(&config, &path),
            None => run_windowed(config),
        });

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

fn render_headless(config: &Config, path: &Path) -> Result<(), AppError> {
    shader::compile_spirv(ShaderStage::Vertex, VERTEX_SHADER_SOURCE)?;
    shader::compile_spirv(ShaderStage::Fragment, FRAGMENT_SHADER_SOURCE)?;

    let mut raster = Rasterizer::new(config.window.width, config.window.height);
    raster.clear(config.clear_color);
    draw::draw_scene(&mut raster, &config.triangles)?;
    raster.into_image().save(path)?;

    info!(
        "wrote {} triangles at {}x{} to {}",
        config.triangles.len(),
        config.window.width,
        config.window.height,
        path.display()
    );
    Ok(())
}

fn run_windowed(config: Config) -> Result<(), AppError> {
    let event_loop = winit::event_loop::EventLoop::<UserEvent>::with_user_event();
    let dims = window::Extent2D {
        width: config.window.width,
        height: config.window.height,
    };
    let wb = winit::window::WindowBuilder::new()
        .with_title(&config.window.title)
        .with_inner_size(winit::dpi::Size::Physical(winit::dpi::PhysicalSize::new(
            dims.width,
            dims.height,
        )))
        .with_min_inner_size(winit::dpi::Size::Logical(winit::dpi::LogicalSize::new(
            64.0, 64.0,
        )));
    let window = wb
        .build(&event_loop)
        .map_err(|e| AppError::Window(e.to_string()))?;

    let proxy = event_loop.create_proxy();
    let (events, event_rx) = mpsc::channel();
    let handler = thread::spawn(move || {
        let result = render_thread(window, dims, &config, event_rx);
        if let Err(e) = &result {
            error!("{}", e);
        }
        if proxy.send_event(UserEvent::RenderStopped).is_err() {
            warn!("event loop closed before the render thread stopped");
        }
        result
    });

    let mut handler = Some(handler);

    event_loop.run(move |event, _, control_flow| match event {
        winit::event::Event::WindowEvent {
            event: winit::event::WindowEvent::CloseRequested,
            ..
        }
        | winit::event::Event::WindowEvent {
            event:
                winit::event::WindowEvent::KeyboardInput {
                    input:
                        winit::event::KeyboardInput {
                            virtual_keycode: Some(winit::event::VirtualKeyCode::Escape),
                            ..
                        },
                    ..
                },
            ..
        } => {
            info!("closed");
            // the render thread may already be gone
            let _ = events.send(RenderEvent::Close);
            join_render_thread(&mut handler);
            *control_flow = winit::event_loop::ControlFlow::Exit;
        }
        winit::event::Event::UserEvent(UserEvent::RenderStopped) => {
            join_render_thread(&mut handler);
            *control_flow = winit::event_loop::ControlFlow::Exit;
        }
        other => {
            if let Some(forwarded) = render_event(&other) {
                let _ = events.send(forwarded);
            }
        }
    })
}

/// Window events that require the scene to be drawn again.
fn render_event(event: &winit::event::Event<'_, UserEvent>) -> Option<RenderEvent> {
    match event {
        winit::event::Event::WindowEvent {
            event: winit::event::WindowEvent::Resized(size),
            ..
        } => Some(RenderEvent::Resized(window::Extent2D {
            width: size.width,
            height: size.height,
        })),
        winit::event::Event::RedrawRequested(_) => Some(RenderEvent::Redraw),
        _ => None,
    }
}

fn join_render_thread(handler: &mut Option<JoinHandle<Result<(), AppError>>>) {
    if let Some(handler) = handler.take() {
        match handler.join() {
            Ok(Ok(())) => {}
            // already logged by the render thread
            Ok(Err(_)) => process::exit(1),
            Err(_) => {
                error!("render thread panicked");
                process::exit(1);
            }
        }
    }
}

fn render_thread(
    window: winit::window::Window,
    dims: window::Extent2D,
    config: &Config,
    events: mpsc::Receiver<RenderEvent>,
) -> Result<(), AppError> {
    let instance =
        back::Instance::create("gfx-rs triangles", 1).map_err(AppError::backend)?;
    let mut surface = unsafe { instance.create_surface(&window) }.map_err(AppError::backend)?;

    let adapter = instance
        .enumerate_adapters()
        .into_iter()
        .find(|adapter| {
            adapter.queue_families.iter().any(|family| {
                surface.supports_queue_family(family) && family.queue_type().supports_graphics()
            })
        })
        .ok_or_else(|| AppError::Backend("no adapter can draw to the window".to_string()))?;
    info!("using adapter {}", adapter.info.name);

    let result = open_and_draw(&mut surface, &adapter, dims, config, &events);

    unsafe {
        instance.destroy_surface(surface);
    }
    result
}

fn open_and_draw<B: Backend>(
    surface: &mut B::Surface,
    adapter: &Adapter<B>,
    dims: window::Extent2D,
    config: &Config,
    events: &mpsc::Receiver<RenderEvent>,
) -> Result<(), AppError> {
    let family = adapter
        .queue_families
        .iter()
        .find(|family| {
            surface.supports_queue_family(family) && family.queue_type().supports_graphics()
        })
        .ok_or_else(|| AppError::Backend("no graphics queue family".to_string()))?;
    let mut gpu = unsafe {
        adapter
            .physical_device
            .open(&[(family, &[1.0])], Features::empty())
    }
    .map_err(AppError::backend)?;

    let mut queue_group = gpu
        .queue_groups
        .pop()
        .ok_or_else(|| AppError::Backend("device opened without queues".to_string()))?;
    let family_id = queue_group.family;
    let queue = &mut queue_group.queues[0];
    let device = gpu.device;

    draw_until_closed(surface, adapter, &device, family_id, queue, dims, config, events)
}

/// Draws the scene once, then again only when the surface changes size or
/// the window asks for a redraw.
#[allow(clippy::too_many_arguments)]
fn draw_until_closed<B: Backend>(
    surface: &mut B::Surface,
    adapter: &Adapter<B>,
    device: &B::Device,
    family: QueueFamilyId,
    queue: &mut B::CommandQueue,
    dims: window::Extent2D,
    config: &Config,
    events: &mpsc::Receiver<RenderEvent>,
) -> Result<(), AppError> {
    let mut renderer = Renderer::new(surface, adapter, device, family, dims, config.clear_color)?;
    renderer.render(queue, &config.triangles)?;
    info!("drew {} triangles", config.triangles.len());

    for event in events.iter() {
        match event {
            RenderEvent::Resized(dims) if dims.width == 0 || dims.height == 0 => {}
            RenderEvent::Resized(dims) => {
                renderer.resize(dims)?;
                renderer.render(queue, &config.triangles)?;
            }
            RenderEvent::Redraw => renderer.render(queue, &config.triangles)?,
            RenderEvent::Close => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::vertex::SCENE;

    fn headless_config(path: &Path, width: u32, height: u32) -> Config {
        let mut config = Config::default();
        config.window.width = width;
        config.window.height = height;
        config.output = Some(path.to_path_buf());
        config
    }

    #[test]
    fn redraw_and_resize_trigger_a_render() {
        let window_id = unsafe { winit::window::WindowId::dummy() };
        let redraw: winit::event::Event<'_, UserEvent> =
            winit::event::Event::RedrawRequested(window_id);
        assert_eq!(render_event(&redraw), Some(RenderEvent::Redraw));

        let resized: winit::event::Event<'_, UserEvent> = winit::event::Event::WindowEvent {
            window_id,
            event: winit::event::WindowEvent::Resized(winit::dpi::PhysicalSize::new(640, 480)),
        };
        assert_eq!(
            render_event(&resized),
            Some(RenderEvent::Resized(window::Extent2D {
                width: 640,
                height: 480
            }))
        );

        let idle: winit::event::Event<'_, UserEvent> = winit::event::Event::MainEventsCleared;
        assert_eq!(render_event(&idle), None);
    }

    #[test]
    fn headless_render_writes_the_scene_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triangles.png");
        let config = headless_config(&path, 400, 300);

        render_headless(&config, &path).unwrap();

        let image = image::open(&path).unwrap().to_rgba();
        assert_eq!(image.dimensions(), (400, 300));

        let [cx, cy] = SCENE[3].centroid();
        let px = ((cx + 1.0) * 0.5 * 400.0) as u32;
        let py = ((1.0 - cy) * 0.5 * 300.0) as u32;
        assert_eq!(image.get_pixel(px, py).0, SCENE[3].color().to_rgba8());
        assert_eq!(image.get_pixel(0, 0).0, config.clear_color.to_rgba8());
    }

    #[test]
    fn headless_render_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("triangles.png");
        let config = headless_config(&path, 16, 16);

        match render_headless(&config, &path) {
            Err(AppError::Image(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(!path.exists());
    }
}
