//! Object transformation data.
//!
//! Objects in a [`Scene`](crate::data_structures::scene_graph::Scene) keep their
//! local transform as a matrix basis. `Instance` is the decomposed
//! position/rotation/scale view used when transforms are read from files or
//! then turned into the basis matrix.

use cgmath::{Matrix4, One, SquareMatrix, Vector3};

/// Decomposed transformation: position, rotation (as quaternion), and scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Instance {
    /// Create a new instance with identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Build from the `(translation, rotation xyzw, scale)` triple glTF hands out.
    pub fn from_decomposed(
        (translation, rotation, scale): ([f32; 3], [f32; 4], [f32; 3]),
    ) -> Self {
        Self {
            position: translation.into(),
            // glTF stores xyzw, cgmath wants w first
            rotation: cgmath::Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]),
            scale: scale.into(),
        }
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/// Translation part of an affine matrix.
pub fn translation_of(matrix: &Matrix4<f32>) -> Vector3<f32> {
    matrix.w.truncate()
}

/// Inverse of an affine matrix, falling back to identity for degenerate
/// (zero-scale) matrices.
pub fn invert_or_identity(matrix: &Matrix4<f32>) -> Matrix4<f32> {
    matrix.invert().unwrap_or_else(|| {
        log::warn!("Degenerate transform could not be inverted, using identity instead.");
        Matrix4::identity()
    })
}

/// Component-wise comparison with a tolerance, used to check that world
/// transforms survive re-parenting.
pub fn approx_eq(a: &Matrix4<f32>, b: &Matrix4<f32>, epsilon: f32) -> bool {
    let a: &[[f32; 4]; 4] = a.as_ref();
    let b: &[[f32; 4]; 4] = b.as_ref();
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .all(|(x, y)| (x - y).abs() <= epsilon)
}
