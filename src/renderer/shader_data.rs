use std::mem::{offset_of, size_of};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Data unique to each vertex passed as elements into a vertex buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PerVertexData {
    pub position: Vec2,
    pub color: Vec3,
}

impl PerVertexData {
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    /// Matches the `in` locations of `shaders/triangle.vert`
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Self, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Self, color) as u32),
        ]
    }
}

pub const TRIANGLE_VERTICES: [PerVertexData; 3] = [
    PerVertexData::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    PerVertexData::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
    PerVertexData::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<PerVertexData>(), 20);
        let [position, color] = PerVertexData::attribute_descriptions();
        assert_eq!(position.offset, 0);
        assert_eq!(color.offset, 8);
        assert_eq!(PerVertexData::binding_description().stride, 20);
    }

    #[test]
    fn triangle_casts_to_bytes() {
        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE_VERTICES);
        assert_eq!(bytes.len(), 60);
    }
}
