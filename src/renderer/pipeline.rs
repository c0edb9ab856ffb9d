use gfx_hal::{format as f, pass::Subpass, prelude::*, pso, Backend};
use log::{error, info};
use std::iter;
use std::mem::{self, ManuallyDrop};
use std::ptr;

use super::shader::{Shader, ShaderError, ShaderStage, ENTRY_NAME};
use super::vertex::{VertexLayout, POSITION_LAYOUT};

/// Size of the color push constant block.
pub const COLOR_CONSTANT_BYTES: u32 = 4 * mem::size_of::<f32>() as u32;

/// A linked vertex + fragment pair, ready to draw with.
pub struct Program<'a, B: Backend> {
    device: &'a B::Device,
    pub layout: VertexLayout,
    pub pipeline: ManuallyDrop<B::GraphicsPipeline>,
    pub pipeline_layout: ManuallyDrop<B::PipelineLayout>,
    vertex: ManuallyDrop<Shader<'a, B>>,
    fragment: ManuallyDrop<Shader<'a, B>>,
}

impl<'a, B: Backend> Program<'a, B> {
    pub fn link(
        device: &'a B::Device,
        vertex: Shader<'a, B>,
        fragment: Shader<'a, B>,
        render_pass: &B::RenderPass,
    ) -> Result<Self, ShaderError> {
        debug_assert_eq!(vertex.stage, ShaderStage::Vertex);
        debug_assert_eq!(fragment.stage, ShaderStage::Fragment);

        let pipeline_layout = unsafe {
            device.create_pipeline_layout(
                iter::empty::<B::DescriptorSetLayout>(),
                iter::once((pso::ShaderStageFlags::FRAGMENT, 0..COLOR_CONSTANT_BYTES)),
            )
        }
        .map_err(|e| link_error(format!("pipeline layout: {:?}", e)))?;

        let pipeline = {
            let shader_entries = pso::GraphicsShaderSet {
                vertex: pso::EntryPoint {
                    entry: ENTRY_NAME,
                    module: &*vertex.module,
                    specialization: pso::Specialization::default(),
                },
                hull: None,
                domain: None,
                geometry: None,
                fragment: Some(pso::EntryPoint {
                    entry: ENTRY_NAME,
                    module: &*fragment.module,
                    specialization: pso::Specialization::default(),
                }),
            };

            let subpass = Subpass {
                index: 0,
                main_pass: render_pass,
            };

            let mut pipeline_desc = pso::GraphicsPipelineDesc::new(
                shader_entries,
                pso::Primitive::TriangleList,
                pso::Rasterizer::FILL,
                &pipeline_layout,
                subpass,
            );
            pipeline_desc.blender.targets.push(pso::ColorBlendDesc {
                mask: pso::ColorMask::ALL,
                blend: None,
            });

            pipeline_desc.vertex_buffers.push(pso::VertexBufferDesc {
                binding: 0,
                stride: POSITION_LAYOUT.stride_bytes(),
                rate: pso::VertexInputRate::Vertex,
            });

            pipeline_desc.attributes.push(pso::AttributeDesc {
                location: 0,
                binding: 0,
                element: pso::Element {
                    format: f::Format::Rg32Sfloat,
                    offset: 0,
                },
            });

            unsafe { device.create_graphics_pipeline(&pipeline_desc, None) }
        };

        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout) };
                return Err(link_error(format!("{:?}", e)));
            }
        };

        info!("linked triangle program");
        Ok(Program {
            device,
            layout: POSITION_LAYOUT,
            pipeline: ManuallyDrop::new(pipeline),
            pipeline_layout: ManuallyDrop::new(pipeline_layout),
            vertex: ManuallyDrop::new(vertex),
            fragment: ManuallyDrop::new(fragment),
        })
    }
}

fn link_error(message: String) -> ShaderError {
    error!("failed to link program: {}", message);
    ShaderError::Link(message)
}

impl<'a, B: Backend> Drop for Program<'a, B> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_graphics_pipeline(ManuallyDrop::into_inner(ptr::read(&self.pipeline)));
            self.device
                .destroy_pipeline_layout(ManuallyDrop::into_inner(ptr::read(
                    &self.pipeline_layout,
                )));
            ManuallyDrop::drop(&mut self.vertex);
            ManuallyDrop::drop(&mut self.fragment);
        }
    }
}
