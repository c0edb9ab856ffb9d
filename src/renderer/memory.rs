use gfx_hal::{adapter::MemoryType, memory as m, prelude::*, Backend, MemoryTypeId};
use log::debug;
use std::iter;
use std::mem::{self, ManuallyDrop};
use std::ptr;

use super::buffer::Buffer;
use super::RenderError;

/// CPU-visible memory bound to a single buffer whose contents are
/// overwritten wholesale on every `write`.
pub struct Memory<'a, B: Backend, T: Copy> {
    pub buffer: ManuallyDrop<Buffer<'a, B, T>>,
    memory: ManuallyDrop<B::Memory>,
}

impl<'a, B: Backend, T: Copy> Memory<'a, B, T> {
    pub fn new(mut buffer: Buffer<'a, B, T>, memory_types: &[MemoryType]) -> Result<Self, RenderError> {
        let device = buffer.device;
        let memory = unsafe {
            let buffer_req = device.get_buffer_requirements(&buffer.buf);
            let upload_type =
                Self::upload_type(memory_types, &buffer_req).ok_or(RenderError::NoUploadMemory)?;
            let memory = device
                .allocate_memory(upload_type, buffer_req.size)
                .map_err(|e| RenderError::device("allocate vertex memory", e))?;
            if let Err(e) = device.bind_buffer_memory(&memory, 0, &mut buffer.buf) {
                device.free_memory(memory);
                return Err(RenderError::device("bind vertex memory", e));
            }
            memory
        };

        Ok(Memory {
            buffer: ManuallyDrop::new(buffer),
            memory: ManuallyDrop::new(memory),
        })
    }

    /// Replaces the buffer contents with `content`.
    ///
    /// The caller must make sure no submitted work still reads the buffer.
    pub fn write(&mut self, content: &[T]) -> Result<(), RenderError> {
        if content.len() > self.buffer.capacity {
            return Err(RenderError::BufferOverflow {
                len: content.len(),
                capacity: self.buffer.capacity,
            });
        }

        let device = self.buffer.device;
        unsafe {
            let mapping = device
                .map_memory(&self.memory, m::Segment::ALL)
                .map_err(|e| RenderError::device("map vertex memory", e))?;
            ptr::copy_nonoverlapping(
                content.as_ptr() as *const u8,
                mapping,
                content.len() * mem::size_of::<T>(),
            );
            let flushed =
                device.flush_mapped_memory_ranges(iter::once((&*self.memory, m::Segment::ALL)));
            device.unmap_memory(&self.memory);
            flushed.map_err(|e| RenderError::device("flush vertex memory", e))?;
        }

        debug!("uploaded {} elements to the vertex buffer", content.len());
        Ok(())
    }

    fn upload_type(properties: &[MemoryType], buffer_req: &m::Requirements) -> Option<MemoryTypeId> {
        properties
            .iter()
            .enumerate()
            .position(|(id, mem_type)| {
                buffer_req.type_mask & (1 << id) != 0
                    && mem_type.properties.contains(m::Properties::CPU_VISIBLE)
            })
            .map(MemoryTypeId::from)
    }
}

impl<'a, B: Backend, T: Copy> Drop for Memory<'a, B, T> {
    fn drop(&mut self) {
        let device = self.buffer.device;
        unsafe {
            ManuallyDrop::drop(&mut self.buffer);
            device.free_memory(ManuallyDrop::into_inner(ptr::read(&self.memory)))
        }
    }
}
