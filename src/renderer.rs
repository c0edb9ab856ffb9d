use gfx_hal::{
    adapter, buffer as b, command, format as f, image as i, pass, pool,
    prelude::*,
    queue::family::QueueFamilyId,
    window, Backend,
};
use log::{debug, info, warn};
use std::borrow::Borrow;
use std::fmt;
use std::iter;
use std::mem::ManuallyDrop;
use std::ptr;
use thiserror::Error;

mod buffer;
pub mod draw;
mod memory;
mod pipeline;
pub mod raster;
pub mod shader;
mod swapchain;
pub mod vertex;

use buffer::Buffer;
use draw::{DrawContext, DrawState};
use memory::Memory;
use pipeline::Program;
use shader::{Shader, ShaderError, ShaderStage, FRAGMENT_SHADER_SOURCE, VERTEX_SHADER_SOURCE};
use swapchain::Swapchain;
use vertex::{Color, Triangle, VertexLayout, TRIANGLE_FLOATS};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("{context}: {message}")]
    Device {
        context: &'static str,
        message: String,
    },
    #[error("no CPU visible memory type for the vertex buffer")]
    NoUploadMemory,
    #[error("{len} values exceed the vertex buffer capacity of {capacity}")]
    BufferOverflow { len: usize, capacity: usize },
    #[error("unsupported vertex layout {0:?}")]
    UnsupportedLayout(VertexLayout),
    #[error("draw issued before the {0} was set")]
    MissingState(&'static str),
    #[error("drawing {count} vertices from {first} but only {available} are buffered")]
    VertexRange {
        first: u32,
        count: u32,
        available: usize,
    },
    #[error("surface reported no supported formats")]
    NoSurfaceFormat,
    #[error("vertex buffer capacity must be non-zero")]
    EmptyBuffer,
    #[error("no surface image could be presented after {0} attempts")]
    SwapchainUnavailable(usize),
}

/// How many times a frame is retried after the swapchain had to be recreated.
pub const RENDER_ATTEMPTS: usize = 3;

/// Result of one attempt at drawing and presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The swapchain was out of date and has been recreated; nothing was shown.
    SwapchainRecreated,
}

/// Calls `attempt` until a frame is presented, at most `attempts` times.
pub fn render_with_retries<F>(attempts: usize, mut attempt: F) -> Result<(), RenderError>
where
    F: FnMut() -> Result<FrameOutcome, RenderError>,
{
    for n in 1..=attempts {
        match attempt()? {
            FrameOutcome::Presented => return Ok(()),
            FrameOutcome::SwapchainRecreated => debug!("frame attempt {} hit a stale swapchain", n),
        }
    }
    Err(RenderError::SwapchainUnavailable(attempts))
}

impl RenderError {
    pub fn device(context: &'static str, err: impl fmt::Debug) -> Self {
        RenderError::Device {
            context,
            message: format!("{:?}", err),
        }
    }
}

pub struct Renderer<'a, B: Backend> {
    device: &'a B::Device,
    clear_color: Color,
    command_buffer: B::CommandBuffer,
    submission_complete_fence: ManuallyDrop<B::Fence>,
    command_pool: ManuallyDrop<B::CommandPool>,
    memory: ManuallyDrop<Memory<'a, B, f32>>,
    swapchain: ManuallyDrop<Swapchain<'a, B>>,
    clear_pass: ManuallyDrop<B::RenderPass>,
    load_pass: ManuallyDrop<B::RenderPass>,
    program: ManuallyDrop<Program<'a, B>>,
}

impl<'a, B> Renderer<'a, B>
where
    B: Backend,
{
    pub fn new(
        surface: &'a mut B::Surface,
        adapter: &'a adapter::Adapter<B>,
        device: &'a B::Device,
        family: QueueFamilyId,
        init_dims: window::Extent2D,
        clear_color: Color,
    ) -> Result<Self, RenderError> {
        let memory_types = adapter.physical_device.memory_properties().memory_types;
        let limits = adapter.physical_device.limits();

        let swapchain = Swapchain::new(device, surface, adapter, init_dims)?;
        let clear_pass = Self::create_render_pass(
            device,
            swapchain.format,
            pass::AttachmentLoadOp::Clear,
            i::Layout::Undefined,
        )?;
        let load_pass = Self::create_render_pass(
            device,
            swapchain.format,
            pass::AttachmentLoadOp::Load,
            i::Layout::Present,
        )?;

        let vertex_shader = Shader::new(device, ShaderStage::Vertex, VERTEX_SHADER_SOURCE)?;
        let fragment_shader = Shader::new(device, ShaderStage::Fragment, FRAGMENT_SHADER_SOURCE)?;
        let program = Program::link(device, vertex_shader, fragment_shader, &*clear_pass)?;

        let vertex_buffer = Buffer::new(device, TRIANGLE_FLOATS, &limits)?;
        let memory = Memory::new(vertex_buffer, &memory_types)?;

        let mut command_pool = unsafe {
            device.create_command_pool(family, pool::CommandPoolCreateFlags::empty())
        }
        .map_err(|e| RenderError::device("create command pool", e))?;
        let command_buffer = unsafe { command_pool.allocate_one(command::Level::Primary) };
        let submission_complete_fence = device
            .create_fence(true)
            .map_err(|e| RenderError::device("create fence", e))?;

        info!("renderer ready");
        Ok(Renderer {
            device,
            clear_color,
            command_buffer,
            submission_complete_fence: ManuallyDrop::new(submission_complete_fence),
            command_pool: ManuallyDrop::new(command_pool),
            memory: ManuallyDrop::new(memory),
            swapchain: ManuallyDrop::new(swapchain),
            clear_pass,
            load_pass,
            program: ManuallyDrop::new(program),
        })
    }

    pub fn resize(&mut self, dims: window::Extent2D) -> Result<(), RenderError> {
        self.wait_for_submission()?;
        self.swapchain.resize(dims)
    }

    /// Clears the next surface image, draws `scene` into it and presents it.
    ///
    /// A stale swapchain is recreated and the frame drawn again.
    pub fn render(&mut self, queue: &mut B::CommandQueue, scene: &[Triangle]) -> Result<(), RenderError> {
        render_with_retries(RENDER_ATTEMPTS, || self.try_render(queue, scene))
    }

    fn try_render(
        &mut self,
        queue: &mut B::CommandQueue,
        scene: &[Triangle],
    ) -> Result<FrameOutcome, RenderError> {
        let surface_image = unsafe {
            match self.swapchain.surface.acquire_image(!0) {
                Ok((image, _)) => image,
                Err(e) => {
                    warn!("failed to acquire a surface image ({:?}), recreating swapchain", e);
                    self.swapchain.recreate()?;
                    return Ok(FrameOutcome::SwapchainRecreated);
                }
            }
        };

        let framebuffer = unsafe {
            self.device.create_framebuffer(
                &self.clear_pass,
                iter::once(surface_image.borrow()),
                i::Extent {
                    width: self.swapchain.dims.width,
                    height: self.swapchain.dims.height,
                    depth: 1,
                },
            )
        }
        .map_err(|e| RenderError::device("create framebuffer", e))?;

        let drawn = {
            let state = DrawState::with_capacity(self.memory.buffer.capacity);
            let mut frame = Frame {
                renderer: &mut *self,
                queue: &mut *queue,
                framebuffer: &framebuffer,
                state,
                passes: 0,
            };
            draw::draw_scene(&mut frame, scene).and_then(|()| frame.finish())
        };

        let finished = self.wait_for_submission();
        unsafe { self.device.destroy_framebuffer(framebuffer) };
        drawn?;
        finished?;

        let result = unsafe { queue.present_surface(&mut self.swapchain.surface, surface_image, None) };
        if let Err(e) = result {
            warn!("failed to present ({:?}), recreating swapchain", e);
            self.swapchain.recreate()?;
            return Ok(FrameOutcome::SwapchainRecreated);
        }
        Ok(FrameOutcome::Presented)
    }

    fn wait_for_submission(&self) -> Result<(), RenderError> {
        unsafe {
            self.device
                .wait_for_fence(&self.submission_complete_fence, !0)
                .map_err(|e| RenderError::device("wait for fence", e))?;
        }
        Ok(())
    }

    /// Records one render pass, drawing `vertices` if given, and submits it.
    fn submit_pass(
        &mut self,
        queue: &mut B::CommandQueue,
        framebuffer: &B::Framebuffer,
        first_pass: bool,
        draw: Option<(Color, std::ops::Range<u32>)>,
    ) -> Result<(), RenderError> {
        self.wait_for_submission()?;
        unsafe {
            self.device
                .reset_fence(&self.submission_complete_fence)
                .map_err(|e| RenderError::device("reset fence", e))?;
            self.command_pool.reset(false);
        }

        let render_pass = if first_pass {
            &self.clear_pass
        } else {
            &self.load_pass
        };
        let viewport = self.swapchain.viewport.clone();
        let cmd_buffer = &mut self.command_buffer;
        unsafe {
            cmd_buffer.begin_primary(command::CommandBufferFlags::ONE_TIME_SUBMIT);
            cmd_buffer.set_viewports(0, &[viewport.clone()]);
            cmd_buffer.set_scissors(0, &[viewport.rect]);
            cmd_buffer.bind_graphics_pipeline(&self.program.pipeline);
            cmd_buffer.bind_vertex_buffers(
                0,
                iter::once((&*self.memory.buffer.buf, b::SubRange::WHOLE)),
            );
            cmd_buffer.begin_render_pass(
                render_pass,
                framebuffer,
                viewport.rect,
                &[command::ClearValue {
                    color: command::ClearColor {
                        float32: *self.clear_color.channels(),
                    },
                }],
                command::SubpassContents::Inline,
            );
            if let Some((color, vertices)) = draw {
                cmd_buffer.push_graphics_constants(
                    &self.program.pipeline_layout,
                    gfx_hal::pso::ShaderStageFlags::FRAGMENT,
                    0,
                    &color.to_words(),
                );
                cmd_buffer.draw(vertices, 0..1);
            }
            cmd_buffer.end_render_pass();
            cmd_buffer.finish();

            queue.submit_without_semaphores(
                iter::once(&*cmd_buffer),
                Some(&*self.submission_complete_fence),
            );
        }
        Ok(())
    }

    fn create_render_pass(
        device: &B::Device,
        format: f::Format,
        load: pass::AttachmentLoadOp,
        initial_layout: i::Layout,
    ) -> Result<ManuallyDrop<B::RenderPass>, RenderError> {
        let attachment = pass::Attachment {
            format: Some(format),
            samples: 1,
            ops: pass::AttachmentOps::new(load, pass::AttachmentStoreOp::Store),
            stencil_ops: pass::AttachmentOps::DONT_CARE,
            layouts: initial_layout..i::Layout::Present,
        };

        let subpass = pass::SubpassDesc {
            colors: &[(0, i::Layout::ColorAttachmentOptimal)],
            depth_stencil: None,
            inputs: &[],
            resolves: &[],
            preserves: &[],
        };

        let render_pass = unsafe {
            device.create_render_pass(
                iter::once(attachment),
                iter::once(subpass),
                iter::empty::<pass::SubpassDependency>(),
            )
        }
        .map_err(|e| RenderError::device("create render pass", e))?;
        Ok(ManuallyDrop::new(render_pass))
    }
}

impl<'a, B: Backend> Drop for Renderer<'a, B> {
    fn drop(&mut self) {
        let device = &self.device;
        if let Err(e) = device.wait_idle() {
            warn!("device did not go idle before teardown: {:?}", e);
        }
        unsafe {
            ManuallyDrop::drop(&mut self.memory);
            device.destroy_command_pool(ManuallyDrop::into_inner(ptr::read(&self.command_pool)));
            device.destroy_fence(ManuallyDrop::into_inner(ptr::read(
                &self.submission_complete_fence,
            )));
            ManuallyDrop::drop(&mut self.program);
            device.destroy_render_pass(ManuallyDrop::into_inner(ptr::read(&self.clear_pass)));
            device.destroy_render_pass(ManuallyDrop::into_inner(ptr::read(&self.load_pass)));
            ManuallyDrop::drop(&mut self.swapchain);
        }
    }
}

/// GPU draw state for one surface image.
///
/// Every draw waits for the previous submission before the shared vertex
/// buffer is overwritten.
struct Frame<'f, 'a, B: Backend> {
    renderer: &'f mut Renderer<'a, B>,
    queue: &'f mut B::CommandQueue,
    framebuffer: &'f B::Framebuffer,
    state: DrawState,
    passes: usize,
}

impl<'f, 'a, B: Backend> Frame<'f, 'a, B> {
    /// Makes sure the image was cleared even when nothing was drawn.
    fn finish(&mut self) -> Result<(), RenderError> {
        if self.passes == 0 {
            self.renderer
                .submit_pass(self.queue, self.framebuffer, true, None)?;
            self.passes += 1;
        }
        Ok(())
    }
}

impl<'f, 'a, B: Backend> DrawContext for Frame<'f, 'a, B> {
    type Error = RenderError;

    fn upload_positions(&mut self, positions: &[f32]) -> Result<(), RenderError> {
        self.state.upload(positions.len())?;
        self.renderer.wait_for_submission()?;
        self.renderer.memory.write(positions)
    }

    fn set_color(&mut self, color: Color) -> Result<(), RenderError> {
        self.state.set_color(color);
        Ok(())
    }

    fn bind_attribute(&mut self, layout: VertexLayout) -> Result<(), RenderError> {
        // the pipeline's vertex input is fixed at link time
        if layout != self.renderer.program.layout {
            return Err(RenderError::UnsupportedLayout(layout));
        }
        self.state.bind(layout)
    }

    fn draw_arrays(&mut self, first: u32, count: u32) -> Result<(), RenderError> {
        let (color, _) = self.state.check_draw(first, count)?;

        let first_pass = self.passes == 0;
        self.renderer.submit_pass(
            self.queue,
            self.framebuffer,
            first_pass,
            Some((color, first..first + count)),
        )?;
        self.passes += 1;
        debug!("submitted draw of {} vertices", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_swapchain_is_retried_until_presented() {
        let mut outcomes = vec![
            FrameOutcome::Presented,
            FrameOutcome::SwapchainRecreated,
            FrameOutcome::SwapchainRecreated,
        ];
        let mut calls = 0;
        render_with_retries(RENDER_ATTEMPTS, || {
            calls += 1;
            Ok(outcomes.pop().unwrap())
        })
        .unwrap();
        assert_eq!(calls, 3);
    }

    #[test]
    fn first_presented_frame_stops_retrying() {
        let mut calls = 0;
        render_with_retries(RENDER_ATTEMPTS, || {
            calls += 1;
            Ok(FrameOutcome::Presented)
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn persistently_stale_swapchain_is_an_error() {
        let mut calls = 0;
        let result = render_with_retries(2, || {
            calls += 1;
            Ok(FrameOutcome::SwapchainRecreated)
        });
        match result {
            Err(RenderError::SwapchainUnavailable(attempts)) => assert_eq!(attempts, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls, 2);
    }

    #[test]
    fn draw_errors_are_not_retried() {
        let mut calls = 0;
        let result = render_with_retries(RENDER_ATTEMPTS, || {
            calls += 1;
            Err(RenderError::MissingState("color"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
