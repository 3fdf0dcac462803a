// Meshes and drawable models
//
// Vertex layout: position (vec3) + color (vec3) + texture coordinate (vec2),
// one interleaved binding. Mesh data is immutable once uploaded.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};
use std::sync::Arc;

use crate::backend::{Buffer, DescriptorSet, GraphicsContext, Texture, NUM_UNIFORMS};
use crate::renderer::{DrawContext, Drawable};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, tex_coord) as u32,
            },
        ]
    }
}

/// Uniform block at set 0, binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUniform {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for GlobalUniform {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

impl GlobalUniform {
    /// Cube rotating about Y (and slower about X), seen from above a corner.
    pub fn spinning(angle: f32, aspect: f32) -> Self {
        let model = Mat4::from_rotation_y(angle) * Mat4::from_rotation_x(angle * 0.5);
        let view = Mat4::look_at_rh(Vec3::new(2.0, 2.0, 2.0), Vec3::ZERO, Vec3::Y);

        // glam targets a 0..1 depth range already; Vulkan's Y axis points down
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

/// Device-local vertex buffer plus an optional index buffer.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    /// An empty `indices` draws the vertices in order.
    pub fn new(context: Arc<GraphicsContext>, vertices: &[Vertex], indices: &[u32]) -> Result<Self> {
        let vertex_buffer = Buffer::device_local_with_data(
            context.clone(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertices,
        )?;
        let index_buffer = if indices.is_empty() {
            None
        } else {
            Some(Buffer::device_local_with_data(
                context,
                vk::BufferUsageFlags::INDEX_BUFFER,
                indices,
            )?)
        };

        log::debug!("Uploaded mesh: {} vertices, {} indices", vertices.len(), indices.len());

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    pub fn bind(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.vertex_buffer.raw()], &[0]);
            if let Some(index_buffer) = &self.index_buffer {
                device.cmd_bind_index_buffer(command_buffer, index_buffer.raw(), 0, vk::IndexType::UINT32);
            }
        }
    }

    pub fn draw(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            if self.index_buffer.is_some() {
                device.cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
            } else {
                device.cmd_draw(command_buffer, self.vertex_count, 1, 0, 0);
            }
        }
    }
}

/// A textured mesh with its own descriptor sets.
pub struct Model {
    descriptors: DescriptorSet,
    mesh: Mesh,
    texture: Arc<Texture>,
    uniform: GlobalUniform,
}

impl Model {
    /// Claims one slot of the context's descriptor budget.
    pub fn new(context: Arc<GraphicsContext>, mesh: Mesh, texture: Arc<Texture>) -> Result<Self> {
        Ok(Self {
            descriptors: DescriptorSet::new(context)?,
            mesh,
            texture,
            uniform: GlobalUniform::default(),
        })
    }

    /// Takes effect at the next frame's descriptor update.
    pub fn set_uniform(&mut self, uniform: GlobalUniform) {
        self.uniform = uniform;
    }
}

impl Drawable for Model {
    fn update_descriptors(&mut self, ctx: &DrawContext<'_>) -> Result<()> {
        self.descriptors.update_uniform(ctx.frame, 0, &self.uniform)?;
        self.descriptors.set_texture(ctx.frame, NUM_UNIFORMS, &self.texture)
    }

    fn bind(&self, ctx: &DrawContext<'_>) -> Result<()> {
        self.descriptors
            .bind(ctx.command_buffer, ctx.pipeline_layout, ctx.frame)?;
        self.mesh.bind(ctx.device, ctx.command_buffer);
        Ok(())
    }

    fn draw(&self, ctx: &DrawContext<'_>) {
        self.mesh.draw(ctx.device, ctx.command_buffer);
    }
}

// =============================================================================
// DEMO CONTENT
// =============================================================================

/// Unit cube centered at the origin: 4 vertices per face so every face gets
/// its own color and full texture, wound counter-clockwise from outside.
pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (outward normal, u, v, color) with u x v == normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y, [1.0, 0.3, 0.3]),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y, [0.3, 1.0, 0.3]),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z, [0.3, 0.3, 1.0]),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z, [1.0, 1.0, 0.3]),
        (Vec3::Z, Vec3::X, Vec3::Y, [1.0, 0.3, 1.0]),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y, [0.3, 1.0, 1.0]),
    ];
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v, color) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in corners {
            let pos = (normal + u * su + v * sv) * 0.5;
            vertices.push(Vertex {
                pos: pos.to_array(),
                color,
                tex_coord: [(su + 1.0) * 0.5, (1.0 - sv) * 0.5],
            });
        }
        indices.extend([base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    (vertices, indices)
}

/// RGBA8 checkerboard of `size` x `size` pixels with `cells` squares per side.
pub fn checkerboard(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);

    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let shade = if light { 235 } else { 60 };
            pixels.extend([shade, shade, shade, 255]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);

        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(locations, vec![0, 1, 2]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn uniform_is_three_packed_matrices() {
        assert_eq!(size_of::<GlobalUniform>(), 3 * 64);
        assert_eq!(bytemuck::bytes_of(&GlobalUniform::default()).len(), 192);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let uniform = GlobalUniform::spinning(0.0, 16.0 / 9.0);
        assert!(uniform.proj.y_axis.y < 0.0);
        assert_eq!(uniform.model, Mat4::IDENTITY);
    }

    #[test]
    fn cube_has_24_vertices_and_36_indices() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
        assert!(vertices
            .iter()
            .all(|v| v.pos.iter().all(|c| c.abs() == 0.5)));
    }

    #[test]
    fn cube_triangles_face_outward() {
        let (vertices, indices) = cube();
        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(vertices[triangle[i] as usize].pos));
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "inward triangle {:?}", triangle);
        }
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let pixels = checkerboard(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);

        let pixel = |x: usize, y: usize| &pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(pixel(0, 0), &[235, 235, 235, 255]);
        assert_eq!(pixel(2, 0), &[60, 60, 60, 255]);
        assert_eq!(pixel(2, 2), &[235, 235, 235, 255]);
    }
}
