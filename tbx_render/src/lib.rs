//! Load shader programs for meshes using tbx_shader.
//!
//! The application owns a single [ResourceSet](resources::ResourceSet)
//! and a [RenderMesh](mesh::RenderMesh) for each mesh in the scene.
//! Calling [update](mesh::RenderMesh::update) after loading or editing a material
//! creates the programs and bindings needed to draw the mesh.
//! Title specific behavior is provided by a [TitleStrategy](strategy::TitleStrategy).
pub mod error;
pub mod material;
pub mod mesh;
pub mod pipeline;
pub mod resources;
pub mod strategy;
pub mod vertex;
