use gfx_hal::{buffer, prelude::*, Backend, Limits};
use std::mem::{self, ManuallyDrop};
use std::ptr;

use super::RenderError;

/// A vertex buffer sized for `capacity` elements of `T`.
pub struct Buffer<'a, B: Backend, T> {
    pub device: &'a B::Device,
    pub buf: ManuallyDrop<B::Buffer>,
    pub capacity: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<'a, B: Backend, T> Buffer<'a, B, T> {
    pub fn new(device: &'a B::Device, capacity: usize, limits: &Limits) -> Result<Self, RenderError> {
        let size = aligned_size::<T>(capacity, limits.non_coherent_atom_size as u64)?;

        let buf = unsafe { device.create_buffer(size, buffer::Usage::VERTEX) }
            .map_err(|e| RenderError::device("create vertex buffer", e))?;

        Ok(Buffer {
            device,
            buf: ManuallyDrop::new(buf),
            capacity,
            _marker: std::marker::PhantomData,
        })
    }
}

/// Byte size of `capacity` elements rounded up to the non-coherent atom size.
fn aligned_size<T>(capacity: usize, non_coherent_atom_size: u64) -> Result<u64, RenderError> {
    let alignment = non_coherent_atom_size.max(1);
    let buffer_len = capacity as u64 * mem::size_of::<T>() as u64;
    if buffer_len == 0 {
        return Err(RenderError::EmptyBuffer);
    }
    Ok(((buffer_len + alignment - 1) / alignment) * alignment)
}

impl<'a, B: Backend, T> Drop for Buffer<'a, B, T> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_buffer(ManuallyDrop::into_inner(ptr::read(&self.buf)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_rounded_to_the_atom() {
        assert_eq!(aligned_size::<f32>(6, 64).unwrap(), 64);
        assert_eq!(aligned_size::<f32>(16, 64).unwrap(), 64);
        assert_eq!(aligned_size::<f32>(17, 64).unwrap(), 128);
    }

    #[test]
    fn zero_atom_size_means_unaligned() {
        assert_eq!(aligned_size::<f32>(6, 0).unwrap(), 24);
    }

    #[test]
    fn zero_capacity_is_an_error() {
        match aligned_size::<f32>(0, 64) {
            Err(RenderError::EmptyBuffer) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
