//! Video frame value type and full-screen quad geometry.

use bytemuck::{Pod, Zeroable};

/// A decoded video frame holding tightly packed RGBA8 pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Raw RGBA pixel data, `width * height * 4` bytes, top row first
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a black, fully transparent frame of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let size = (width as usize) * (height as usize) * 4;
        Self {
            width,
            height,
            data: vec![0; size],
        }
    }

    /// Creates a frame from existing RGBA data.
    pub fn from_data(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Creates a frame filled with a single RGBA color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Returns the size of one row in bytes.
    pub fn bytes_per_row(&self) -> u32 {
        self.width * 4
    }
}

/// Vertex for rendering a full-screen quad.
///
/// Only clip-space positions are stored; the vertex stage derives the
/// texture coordinate as `position * 0.5 + 0.5`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

impl QuadVertex {
    /// Corners of a full-screen quad in clip space.
    pub const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0] },
        QuadVertex { position: [1.0, -1.0] },
        QuadVertex { position: [1.0, 1.0] },
        QuadVertex { position: [-1.0, 1.0] },
    ];

    /// Indices for the quad (two triangles).
    pub const INDICES: &'static [u16] = &[0, 1, 2, 2, 3, 0];

    /// Returns the vertex buffer layout.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_frame_layout() {
        let frame = VideoFrame::filled(2, 3, [255, 0, 0, 255]);
        assert_eq!(frame.data.len(), 2 * 3 * 4);
        assert_eq!(frame.bytes_per_row(), 8);
        assert_eq!(&frame.data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&frame.data[20..24], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_quad_covers_all_corners() {
        // Both triangles together must reference every corner exactly once
        // as a unique vertex.
        let mut seen = [false; 4];
        for &i in QuadVertex::INDICES {
            seen[i as usize] = true;
        }
        assert_eq!(seen, [true; 4]);
        assert_eq!(QuadVertex::INDICES.len(), 6);
    }
}
