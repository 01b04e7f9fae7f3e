//! GPU buffers with checked partial updates.
//!
//! Misaligned or out-of-range writes are programmer errors: they are rejected
//! with a [`BufferError`] before reaching the queue, never clamped.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("offset {offset} is not a multiple of {alignment}")]
    MisalignedOffset { offset: u64, alignment: u64 },
    #[error("write size {size} is not a multiple of {alignment}")]
    MisalignedSize { size: u64, alignment: u64 },
    #[error("write of {size} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    OutOfRange { offset: u64, size: u64, capacity: u64 },
}

/// Validate a write of `size` bytes at `offset` into a buffer of `capacity` bytes.
pub fn validate_write(offset: u64, size: u64, capacity: u64) -> Result<(), BufferError> {
    let alignment = wgpu::COPY_BUFFER_ALIGNMENT;
    if offset % alignment != 0 {
        return Err(BufferError::MisalignedOffset { offset, alignment });
    }
    if size % alignment != 0 {
        return Err(BufferError::MisalignedSize { size, alignment });
    }
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(BufferError::OutOfRange {
            offset,
            size,
            capacity,
        }),
    }
}

/// A fixed-capacity buffer that only accepts validated writes.
#[derive(Debug)]
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
}

impl GpuBuffer {
    pub fn new(device: &wgpu::Device, label: &str, capacity: u64, usage: wgpu::BufferUsages) -> Self {
        let capacity = capacity.max(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer, capacity }
    }

    pub fn write(&self, queue: &wgpu::Queue, offset: u64, data: &[u8]) -> Result<(), BufferError> {
        validate_write(offset, data.len() as u64, self.capacity)?;
        queue.write_buffer(&self.buffer, offset, data);
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}
