//! Vertex format shared by the default pipeline and the demo meshes

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};

use super::backends::{Format, VertexAttribute, VertexBinding, VertexInputRate};

/// Interleaved vertex: position, color, normal, texture coordinates
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Linear RGB color
    pub color: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinates
    pub uv: [f32; 2],
}

impl Vertex {
    /// Vertex with a position and color, zero normal and uv
    pub fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self {
            position,
            color,
            ..Self::default()
        }
    }

    /// Single per-vertex binding at slot 0
    pub fn binding_descriptions() -> Vec<VertexBinding> {
        vec![VertexBinding {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: VertexInputRate::Vertex,
        }]
    }

    /// Locations 0..4 in field order
    pub fn attribute_descriptions() -> Vec<VertexAttribute> {
        let attribute = |location, format, offset: usize| VertexAttribute {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        vec![
            attribute(0, Format::R32G32B32Sfloat, offset_of!(Self, position)),
            attribute(1, Format::R32G32B32Sfloat, offset_of!(Self, color)),
            attribute(2, Format::R32G32B32Sfloat, offset_of!(Self, normal)),
            attribute(3, Format::R32G32Sfloat, offset_of!(Self, uv)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 44);
        let bindings = Vertex::binding_descriptions();
        assert_eq!(bindings[0].stride, 44);

        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|attribute| attribute.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24, 36]);
    }
}
