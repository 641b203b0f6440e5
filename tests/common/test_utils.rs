use std::path::PathBuf;

use cgmath::{Matrix4, SquareMatrix, Vector3};
use character_assembler::{
    AssemblerConfig, Context,
    data_structures::{
        material::{EMISSIVE_LABEL, Material, NodeGraph, NodeKind, SocketRef, socket},
        scene_graph::{Bone, MeshData, ObjectKind, ParentKind, Primitive, Scene, SceneObject},
        texture::Image,
    },
    resources::export_glb,
};
use tempfile::TempDir;

pub const CATALOG: &str = r#"{
    "assets": {
        "head": {
            "h1": { "name": "Round Head", "category": "head" },
            "678d5c8760": { "name": "Glow Head", "category": "head" }
        },
        "torso": { "t1": { "name": "Hoodie", "category": "torso" } },
        "arms": { "a1": { "name": "Long Arms", "category": "arms" } },
        "legs": { "l1": { "name": "Short Legs", "category": "legs" } },
        "face": { "f1": { "name": "Smile", "category": "face" } }
    }
}"#;

pub const ASSIGNMENTS: &str = r#"{
    "5": { "head": "h1", "torso": "t1", "face": "f1" },
    "7": { "head": "678d5c8760", "torso": "t1", "face": "f1" },
    "9": {},
    "11": { "torso": "zz9", "hat": "" },
    "12": { "torso": "t1", "arms": "a1", "legs": "l1" }
}"#;

/// How a fixture part asset is authored.
pub(crate) struct PartSpec {
    pub mesh: &'static str,
    pub skeleton: bool,
    pub offset: [f32; 3],
    pub base_color: Option<[u8; 4]>,
    pub emissive: Option<[u8; 4]>,
}

impl PartSpec {
    pub fn rigged(mesh: &'static str) -> Self {
        Self {
            mesh,
            skeleton: true,
            offset: [0.0; 3],
            base_color: Some([200, 160, 120, 255]),
            emissive: None,
        }
    }

    pub fn at(mut self, offset: [f32; 3]) -> Self {
        self.offset = offset;
        self
    }

    pub fn emissive(mut self, colour: [u8; 4]) -> Self {
        self.emissive = Some(colour);
        self
    }

    pub fn unrigged(mut self) -> Self {
        self.skeleton = false;
        self
    }
}

/// A resources directory with the catalog, the assignments and the part assets.
pub(crate) struct Fixture {
    pub dir: TempDir,
    pub config: AssemblerConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AssemblerConfig::with_resources(dir.path());
        config.batch.settle_ms = 0;
        std::fs::create_dir_all(config.asset_root()).unwrap();
        std::fs::write(config.catalog_path(), CATALOG).unwrap();
        std::fs::write(config.assignment_path(), ASSIGNMENTS).unwrap();
        Self { dir, config }
    }

    /// The stock part set used by most tests.
    pub async fn with_parts() -> Self {
        let fixture = Self::new();
        fixture.part("h1", PartSpec::rigged("HeadMesh")).await;
        fixture
            .part("678d5c8760", PartSpec::rigged("GlowHeadMesh").emissive([0, 0, 255, 255]))
            .await;
        fixture.part("t1", PartSpec::rigged("Body").at([0.0, 1.0, 0.0])).await;
        fixture.part("a1", PartSpec::rigged("Arms").at([2.0, 0.0, 0.0])).await;
        fixture.part("l1", PartSpec::rigged("Legs").at([0.0, 0.0, -3.0])).await;
        fixture.part("zz9", PartSpec::rigged("Mystery").unrigged()).await;
        fixture.face("f1");
        fixture
    }

    pub async fn context(&self) -> Context {
        Context::new(self.config.clone()).await.unwrap()
    }

    pub fn face(&self, option_id: &str) {
        let face = image::RgbaImage::from_fn(4, 4, |x, _| {
            if x < 2 {
                image::Rgba([255, 255, 255, 0])
            } else {
                image::Rgba([10, 10, 10, 255])
            }
        });
        face.save(self.config.texture_path(option_id)).unwrap();
    }

    /// Authors a part asset as `{asset_root}/{option_id}.glb`.
    pub async fn part(&self, option_id: &str, spec: PartSpec) -> PathBuf {
        let mut scene = Scene::new();
        let (mut graph, bsdf) = NodeGraph::principled();
        if let Some(colour) = spec.base_color {
            let image = scene.images.insert(Image::solid(&format!("{option_id}_base"), 4, 4, colour));
            let node = graph.add_node(NodeKind::ImageTexture { image: Some(image) }, "", [-400.0, 0.0]);
            graph.wire(SocketRef::new(node, socket::COLOR), SocketRef::new(bsdf, socket::BASE_COLOR));
        }
        if let Some(colour) = spec.emissive {
            let image = scene.images.insert(Image::solid(&format!("{option_id}_glow"), 4, 4, colour));
            let node = graph.add_node(
                NodeKind::ImageTexture { image: Some(image) },
                EMISSIVE_LABEL,
                [-400.0, -300.0],
            );
            graph.wire(SocketRef::new(node, socket::COLOR), SocketRef::new(bsdf, socket::EMISSION));
        }
        let material = scene.materials.insert(Material {
            name: format!("{option_id}_mat"),
            graph,
        });

        let mut primitive = Primitive::from_positions(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            Some(material),
        );
        primitive.normals = Some(vec![[0.0, 0.0, 1.0]; 3]);
        primitive.tex_coords = Some(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        primitive.indices = Some(vec![0, 1, 2]);
        let joint_names = if spec.skeleton {
            primitive.joints = Some(vec![[0, 1, 0, 0]; 3]);
            primitive.weights = Some(vec![[0.5, 0.5, 0.0, 0.0]; 3]);
            vec!["root".to_string(), "spine".to_string()]
        } else {
            Vec::new()
        };
        let mesh = scene.meshes.insert(MeshData {
            name: spec.mesh.to_string(),
            primitives: vec![primitive],
            joint_names,
        });

        let offset = Matrix4::from_translation(Vector3::from(spec.offset));
        let mut objects = Vec::new();
        if spec.skeleton {
            let bones = vec![
                Bone {
                    name: "root".into(),
                    parent: None,
                    local: Matrix4::identity(),
                },
                Bone {
                    name: "spine".into(),
                    parent: Some(0),
                    local: Matrix4::from_translation(Vector3::new(0.0, 0.5, 0.0)),
                },
            ];
            let armature = scene.add_object(SceneObject::new("Armature", ObjectKind::Armature(bones)).with_basis(offset));
            let body = scene.add_object(SceneObject::new(spec.mesh, ObjectKind::Mesh(mesh)).with_basis(offset));
            scene.set_parent_keep_transform(body, armature, ParentKind::Deform);
            objects.extend([armature, body]);
        } else {
            objects.push(scene.add_object(SceneObject::new(spec.mesh, ObjectKind::Mesh(mesh)).with_basis(offset)));
        }

        let path = self.config.model_path(option_id);
        export_glb(&scene, &objects, &path).await.unwrap();
        path
    }
}
