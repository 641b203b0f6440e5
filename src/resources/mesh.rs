use crate::data_structures::scene_graph::{MaterialId, Primitive};

/**
 * Reads every primitive of a glTF mesh into CPU-side vertex data.
 *
 * `materials` maps glTF material indices to the materials already created in the scene.
 * Primitives without positions are skipped.
 */
pub fn read_primitives(
    mesh: &gltf::Mesh,
    buffers: &[Vec<u8>],
    materials: &[MaterialId],
) -> Vec<Primitive> {
    mesh.primitives()
        .filter_map(|primitive| {
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let Some(positions) = reader.read_positions() else {
                log::warn!(
                    "Primitive {} of mesh {} has no positions and was skipped.",
                    primitive.index(),
                    mesh.name().unwrap_or("unknown_mesh")
                );
                return None;
            };
            let positions: Vec<[f32; 3]> = positions.collect();
            let normals = reader.read_normals().map(|normals| normals.collect());
            let tex_coords = reader
                .read_tex_coords(0)
                .map(|tex_coords| tex_coords.into_f32().collect());
            let joints = reader.read_joints(0).map(|joints| joints.into_u16().collect());
            let weights = reader
                .read_weights(0)
                .map(|weights| weights.into_f32().collect());
            let indices = reader
                .read_indices()
                .map(|indices| indices.into_u32().collect());
            let material = primitive
                .material()
                .index()
                .and_then(|idx| materials.get(idx).copied());

            Some(Primitive {
                positions,
                normals,
                tex_coords,
                joints,
                weights,
                indices,
                material,
            })
        })
        .collect()
}
