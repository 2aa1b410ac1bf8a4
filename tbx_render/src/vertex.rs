//! Vertex layout fixups applied when loading a mesh.
//!
//! Translated shaders read attributes as `in_attr{location}`,
//! so locations follow the canonical attribute order rather than the order in the mesh buffers.
use log::warn;
use smol_str::SmolStr;

/// Attribute names in the order used for shader locations.
pub const ATTRIBUTE_ORDER: [&str; 10] = [
    "position",
    "normal",
    "tangent",
    "color",
    "uv0",
    "uv1",
    "uv2",
    "uv3",
    "weights",
    "indices",
];

/// A vertex attribute as stored in the mesh's vertex buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MeshAttribute {
    pub name: SmolStr,
    pub format: wgpu::VertexFormat,
    /// The byte offset in the vertex or `None` to pack after the previous attribute.
    pub offset: Option<u64>,
}

/// An interleaved layout with shader locations assigned.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct VertexLayout {
    pub names: Vec<SmolStr>,
    pub attributes: Vec<wgpu::VertexAttribute>,
    pub array_stride: u64,
}

impl VertexLayout {
    /// Sort attributes, assign locations, and calculate offsets and the stride.
    pub fn new(attributes: &[MeshAttribute]) -> Self {
        let mut sorted: Vec<&MeshAttribute> = Vec::new();
        for attribute in attributes {
            if sorted.iter().any(|a| a.name == attribute.name) {
                warn!("Ignoring duplicate vertex attribute {:?}", attribute.name);
            } else {
                sorted.push(attribute);
            }
        }
        // Unknown attributes go last in name order.
        sorted.sort_by(|a, b| {
            (attribute_rank(&a.name), &a.name).cmp(&(attribute_rank(&b.name), &b.name))
        });

        let mut layout = Self::default();
        let mut next_offset = 0;
        for (location, attribute) in sorted.into_iter().enumerate() {
            let offset = attribute.offset.unwrap_or(next_offset);
            let end = offset + attribute.format.size();
            next_offset = align4(end);
            layout.array_stride = layout.array_stride.max(align4(end));

            layout.names.push(attribute.name.clone());
            layout.attributes.push(wgpu::VertexAttribute {
                format: attribute.format,
                offset,
                shader_location: location as u32,
            });
        }
        layout
    }

    pub fn location(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.attributes[i].shader_location)
    }

    pub fn buffer_layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

fn attribute_rank(name: &str) -> usize {
    ATTRIBUTE_ORDER
        .iter()
        .position(|n| *n == name)
        .unwrap_or(ATTRIBUTE_ORDER.len())
}

fn align4(value: u64) -> u64 {
    value.next_multiple_of(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn attribute(name: &str, format: wgpu::VertexFormat, offset: Option<u64>) -> MeshAttribute {
        MeshAttribute {
            name: name.into(),
            format,
            offset,
        }
    }

    #[test]
    fn layout_sorted_packed() {
        let layout = VertexLayout::new(&[
            attribute("uv0", wgpu::VertexFormat::Float32x2, None),
            attribute("extra", wgpu::VertexFormat::Unorm8x4, None),
            attribute("position", wgpu::VertexFormat::Float32x3, None),
            attribute("color", wgpu::VertexFormat::Unorm8x4, None),
        ]);
        assert_eq!(
            vec![
                SmolStr::from("position"),
                SmolStr::from("color"),
                SmolStr::from("uv0"),
                SmolStr::from("extra")
            ],
            layout.names
        );
        assert_eq!(
            vec![
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 0,
                    shader_location: 0
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Unorm8x4,
                    offset: 12,
                    shader_location: 1
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 16,
                    shader_location: 2
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Unorm8x4,
                    offset: 24,
                    shader_location: 3
                },
            ],
            layout.attributes
        );
        assert_eq!(28, layout.array_stride);
        assert_eq!(Some(2), layout.location("uv0"));
        assert_eq!(None, layout.location("normal"));
    }

    #[test]
    fn layout_explicit_offsets() {
        let layout = VertexLayout::new(&[
            attribute("normal", wgpu::VertexFormat::Snorm8x4, Some(16)),
            attribute("position", wgpu::VertexFormat::Float32x3, Some(0)),
            attribute("weights", wgpu::VertexFormat::Unorm8x2, Some(20)),
        ]);
        assert_eq!(
            vec![0, 16, 20],
            layout.attributes.iter().map(|a| a.offset).collect::<Vec<_>>()
        );
        assert_eq!(24, layout.array_stride);
        assert_eq!(24, layout.buffer_layout().array_stride);
    }

    #[test]
    fn layout_duplicate_attribute() {
        let layout = VertexLayout::new(&[
            attribute("position", wgpu::VertexFormat::Float32x3, None),
            attribute("position", wgpu::VertexFormat::Float32x4, None),
        ]);
        assert_eq!(1, layout.attributes.len());
        assert_eq!(wgpu::VertexFormat::Float32x3, layout.attributes[0].format);
        assert_eq!(12, layout.array_stride);
    }

    #[test]
    fn layout_empty() {
        assert_eq!(VertexLayout::default(), VertexLayout::new(&[]));
    }
}
