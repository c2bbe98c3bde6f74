//! Indexed meshes uploaded to device-local memory

use bytemuck::Pod;
use render_core::foundation::math::Transform;
use render_core::render::backends::{BufferUsage, IndexType, MemoryPropertyFlags, PipelineLayoutHandle, WHOLE_SIZE};
use render_core::render::{Buffer, Device, Drawable, FrameContext, PushConstantData, RenderResult, Vertex};

/// Mesh with its own vertex and index buffers
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    /// Placement in the world
    pub transform: Transform,
}

impl Mesh {
    /// Upload `vertices` and `indices` through staging buffers
    pub fn new(device: &Device, vertices: &[Vertex], indices: &[u32]) -> RenderResult<Self> {
        let vertex_buffer = upload(device, vertices, BufferUsage::VERTEX_BUFFER)?;
        let index_buffer = upload(device, indices, BufferUsage::INDEX_BUFFER)?;
        log::debug!("Uploaded mesh: {} vertices, {} indices", vertices.len(), indices.len());

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: u32::try_from(indices.len()).unwrap_or(u32::MAX),
            transform: Transform::default(),
        })
    }

    /// Unit cube centered on the origin, one color per face
    pub fn cube(device: &Device) -> RenderResult<Self> {
        let (vertices, indices) = cube_geometry();
        Self::new(device, &vertices, &indices)
    }
}

impl Drawable for Mesh {
    fn render(&self, frame: &FrameContext<'_>, pipeline_layout: PipelineLayoutHandle) -> RenderResult<()> {
        let push = PushConstantData::from_transform(&self.transform);
        frame
            .recorder
            .push_constants(pipeline_layout, PushConstantData::STAGES, 0, &push);
        frame.recorder.bind_vertex_buffers(0, &[self.vertex_buffer.handle()]);
        frame
            .recorder
            .bind_index_buffer(self.index_buffer.handle(), IndexType::U32);
        frame.recorder.draw_indexed(self.index_count);
        Ok(())
    }
}

/// Copy `data` into a new device-local buffer via a host-visible staging buffer
fn upload<T: Pod>(device: &Device, data: &[T], usage: BufferUsage) -> RenderResult<Buffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let size = bytes.len() as u64;

    let mut staging = Buffer::new(
        device,
        size,
        1,
        BufferUsage::TRANSFER_SRC,
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        0,
    )?;
    staging.map_all()?;
    staging.write_to_buffer(bytes, WHOLE_SIZE, 0)?;

    let buffer = Buffer::new(
        device,
        size,
        1,
        usage | BufferUsage::TRANSFER_DST,
        MemoryPropertyFlags::DEVICE_LOCAL,
        0,
    )?;
    device.copy_buffer(staging.handle(), buffer.handle(), size)?;
    Ok(buffer)
}

fn cube_geometry() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent u, tangent v, color) per face
    let faces: [([f32; 3], [f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.9, 0.9, 0.9]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [0.8, 0.8, 0.1]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.9, 0.6, 0.1]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.8, 0.1, 0.1]),
        ([0.0, 0.0, 1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.1, 0.1, 0.8]),
        ([0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.1, 0.8, 0.1]),
    ];
    let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v, color) in faces {
        let base = vertices.len() as u32;
        for (s, t) in corners {
            let position = [
                normal[0] * 0.5 + u[0] * s + v[0] * t,
                normal[1] * 0.5 + u[1] * s + v[1] * t,
                normal[2] * 0.5 + u[2] * s + v[2] * t,
            ];
            vertices.push(Vertex {
                position,
                color,
                normal,
                uv: [s + 0.5, t + 0.5],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_geometry() {
        let (vertices, indices) = cube_geometry();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&index| (index as usize) < vertices.len()));
        for vertex in &vertices {
            assert!(vertex.position.iter().all(|c| c.abs() <= 0.5 + f32::EPSILON));
        }
    }
}
