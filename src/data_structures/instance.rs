//! Per-draw transform data as it lands in the instance vertex buffer.

use cgmath::{Matrix, Matrix3, Matrix4, SquareMatrix};

/**
 * The raw instance is the actual data stored on the GPU: the world matrix, the
 * normal matrix (inverse transpose of its upper 3x3) and the handedness sign.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
    pub handedness: f32,
}

impl InstanceRaw {
    pub fn from_matrix(world: &Matrix4<f32>) -> Self {
        let upper = Matrix3::from_cols(world.x.truncate(), world.y.truncate(), world.z.truncate());
        let det = upper.determinant();
        let normal = upper.invert().map(|inv| inv.transpose()).unwrap_or(upper);
        InstanceRaw {
            model: (*world).into(),
            normal: normal.into(),
            handedness: if det < 0.0 { -1.0 } else { 1.0 },
        }
    }

    /**
     * As we store vertex data directly in the GPU memory we need to tell what the bytes refer to.
     *
     * A mat4 takes up 4 vertex slots as it is technically 4 vec4s, the normal
     * matrix three vec3 slots. Locations start at `first_location` so the layout
     * can follow any mesh vertex layout.
     */
    pub fn attributes(first_location: u32) -> [wgpu::VertexAttribute; 8] {
        use std::mem::size_of;
        let formats = [
            (0, wgpu::VertexFormat::Float32x4),
            (size_of::<[f32; 4]>(), wgpu::VertexFormat::Float32x4),
            (size_of::<[f32; 8]>(), wgpu::VertexFormat::Float32x4),
            (size_of::<[f32; 12]>(), wgpu::VertexFormat::Float32x4),
            (size_of::<[f32; 16]>(), wgpu::VertexFormat::Float32x3),
            (size_of::<[f32; 19]>(), wgpu::VertexFormat::Float32x3),
            (size_of::<[f32; 22]>(), wgpu::VertexFormat::Float32x3),
            (size_of::<[f32; 25]>(), wgpu::VertexFormat::Float32),
        ];
        let mut attributes = [wgpu::VertexAttribute {
            offset: 0,
            shader_location: first_location,
            format: wgpu::VertexFormat::Float32x4,
        }; 8];
        for (i, (offset, format)) in formats.into_iter().enumerate() {
            attributes[i] = wgpu::VertexAttribute {
                offset: offset as wgpu::BufferAddress,
                shader_location: first_location + i as u32,
                format,
            };
        }
        attributes
    }

    pub fn stride() -> wgpu::BufferAddress {
        std::mem::size_of::<InstanceRaw>() as wgpu::BufferAddress
    }
}
