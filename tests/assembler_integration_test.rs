use std::sync::atomic::AtomicBool;

use character_assembler::{
    TokenId,
    data_structures::{
        instance::translation_of,
        material::{BlendMode, NodeKind, socket},
        scene_graph::{ParentKind, Scene},
    },
    error::{CompositeFailure, ExportError, PartFailure, RigFailure, TokenError},
    flow::{TokenOutcome, parse_batch, run_batch},
    pipelines::{assemble::assemble, rig::rig},
    resources::import_glb,
};
use cgmath::{InnerSpace, Point3, Transform};

use crate::common::test_utils::Fixture;

mod common;

/// Kind of the node feeding `input` of the head's principled node.
fn head_input(scene: &Scene, input: &str) -> Option<NodeKind> {
    let head = scene.find_by_name("head")?;
    let material = scene.materials.get(scene.active_material(head)?)?;
    let bsdf = material.graph.principled_node()?;
    material.graph.upstream(bsdf.id, input).map(|n| n.kind.clone())
}

/// World position of the first vertex of the mesh object called `name`.
fn first_vertex(scene: &Scene, name: &str) -> Point3<f32> {
    let id = scene.find_by_name(name).unwrap();
    let mesh = scene.object(id).unwrap().mesh().unwrap();
    let position = scene.meshes.get(mesh).unwrap().primitives[0].positions[0];
    scene.world_matrix(id).transform_point(Point3::from(position))
}

#[tokio::test]
async fn empty_assignment_builds_nothing() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    for token in [TokenId(9), TokenId(404)] {
        let report = ctx.build_character(token).await;
        assert!(report.assembly.parts.is_empty());
        assert!(report.assembly.failures.is_empty());
        assert!(report.composite.is_none());
        assert_eq!(report.rig, Err(RigFailure::NoArmatureFound { token }));
        assert_eq!(ctx.scene.object_count(), 0);
    }
}

#[tokio::test]
async fn unknown_option_is_still_assembled() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    let token = TokenId(11);
    assert_eq!(
        ctx.resolve_attributes(token).display_list(),
        vec!["torso: Unknown (zz9)", "hat: Unknown ()"]
    );

    let report = ctx.build_character(token).await;
    assert_eq!(report.assembly.parts.len(), 1);
    assert_eq!(report.assembly.parts[0].option_id, "zz9");
    assert!(ctx.scene.find_by_name("torso").is_some());
    // the part has no skeleton of its own
    assert!(!report.is_rigged());
}

#[tokio::test]
async fn missing_part_is_recorded_and_skipped() {
    let fixture = Fixture::new();
    fixture.part("t1", common::test_utils::PartSpec::rigged("Body")).await;
    fixture.face("f1");
    let mut ctx = fixture.context().await;

    let report = ctx.build_character(TokenId(5)).await;
    // the face is a texture, not a part
    assert_eq!(report.assembly.parts.len(), 1);
    let [PartFailure::AssetNotFound { token, category, path }] = report.assembly.failures.as_slice() else {
        panic!("unexpected failures {:?}", report.assembly.failures);
    };
    assert_eq!(*token, TokenId(5));
    assert_eq!(category, "head");
    assert!(path.ends_with("All_Assets_FWY/h1.glb"));
    assert!(report.is_rigged());
    assert!(!report.is_complete());
    assert!(matches!(
        report.composite,
        Some(Err(CompositeFailure::HeadObjectNotFound { .. }))
    ));
    assert_eq!(report.failures().len(), 2);
    assert!(report.failures().iter().all(|f| f.contains("token 5")));
}

#[tokio::test]
async fn missing_face_texture_is_reported() {
    let fixture = Fixture::with_parts().await;
    std::fs::remove_file(fixture.config.texture_path("f1")).unwrap();
    let mut ctx = fixture.context().await;

    let report = ctx.build_character(TokenId(5)).await;
    let [PartFailure::AssetNotFound { category, .. }] = report.assembly.failures.as_slice() else {
        panic!("unexpected failures {:?}", report.assembly.failures);
    };
    assert_eq!(category, "face");
    assert!(matches!(
        report.composite,
        Some(Err(CompositeFailure::TextureNotFound { .. }))
    ));
    assert!(report.failures().iter().any(|f| f.contains("token 5") && f.contains("f1.png")));
    assert!(report.is_rigged());
}

#[tokio::test]
async fn face_blends_into_base_color_for_regular_heads() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    let report = ctx.build_character(TokenId(5)).await;
    assert!(report.is_complete(), "{:?}", report.failures());
    assert_eq!(
        head_input(&ctx.scene, socket::BASE_COLOR),
        Some(NodeKind::MixRgb { blend: BlendMode::Mix })
    );
    assert_eq!(head_input(&ctx.scene, socket::EMISSION), None);
}

#[tokio::test]
async fn face_blends_into_emission_for_the_sentinel_head() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    let report = ctx.build_character(TokenId(7)).await;
    assert!(report.is_complete(), "{:?}", report.failures());
    assert_eq!(
        head_input(&ctx.scene, socket::EMISSION),
        Some(NodeKind::MixRgb { blend: BlendMode::LinearLight })
    );
    assert!(matches!(
        head_input(&ctx.scene, socket::BASE_COLOR),
        Some(NodeKind::ImageTexture { .. })
    ));
}

#[tokio::test]
async fn three_skeletons_collapse_into_one() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    let token = TokenId(12);
    let assignment = ctx.assignments.get(token);
    let assembly = assemble(&mut ctx.scene, token, &assignment, &ctx.config).await;
    assert_eq!(assembly.parts.len(), 3);
    assert_eq!(ctx.scene.armatures().len(), 3);

    let meshes: Vec<_> = ctx
        .scene
        .objects()
        .filter(|(_, o)| o.kind.is_mesh())
        .map(|(id, _)| (id, ctx.scene.world_location(id)))
        .collect();
    assert_eq!(meshes.len(), 3);

    let rigged = rig(&mut ctx.scene, token, &ctx.config).unwrap();
    assert_eq!(rigged.discarded, 2);
    assert_eq!(ctx.scene.armatures(), vec![rigged.armature]);
    let armature = ctx.scene.object(rigged.armature).unwrap();
    assert_eq!(armature.name, "fRiENDSiES 12");
    assert_eq!(armature.parent, None);
    for (id, before) in meshes {
        let object = ctx.scene.object(id).unwrap();
        assert_eq!(object.parent, Some((rigged.armature, ParentKind::Deform)));
        assert!((ctx.scene.world_location(id) - before).magnitude() < 1e-5);
    }
}

#[tokio::test]
async fn reset_reclaims_the_previous_character() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    ctx.build_character(TokenId(5)).await;
    let report = ctx.build_character(TokenId(12)).await;
    assert!(report.purged.total() > 0);
    assert!(ctx.scene.find_by_name("fRiENDSiES 5").is_none());
    assert_eq!(ctx.scene.materials.len(), 3);
    assert_eq!(ctx.scene.images.len(), 3);
}

#[tokio::test]
async fn export_is_idempotent() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    let err = ctx.export_character(TokenId(5)).await.unwrap_err();
    assert!(matches!(err, ExportError::CharacterNotFound { .. }));
    assert!(!ctx.config.export_path(TokenId(5)).exists());

    ctx.build_character(TokenId(5)).await;
    let path = ctx.export_character(TokenId(5)).await.unwrap();
    assert!(path.ends_with("exports/Character_5.glb"));
    let first = std::fs::read(&path).unwrap();
    let again = ctx.export_character(TokenId(5)).await.unwrap();
    assert_eq!(again, path);
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

#[tokio::test]
async fn exported_skins_keep_every_part_in_place() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    let token = TokenId(12);
    let report = ctx.build_character(token).await;
    assert!(report.is_complete(), "{:?}", report.failures());
    let parts = ["torso", "arms", "legs"];
    let before: Vec<_> = parts.iter().map(|name| first_vertex(&ctx.scene, name)).collect();
    let path = ctx.export_character(token).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let gltf = gltf::Gltf::from_slice(&bytes).unwrap();
    let blob = gltf.blob.clone().unwrap();
    let skins: Vec<_> = gltf.skins().collect();
    assert_eq!(skins.len(), 1);
    let inverse_binds: Vec<_> = skins[0]
        .reader(|_| Some(blob.as_slice()))
        .read_inverse_bind_matrices()
        .expect("skin written without inverseBindMatrices")
        .collect();
    assert_eq!(inverse_binds.len(), skins[0].joints().count());
    for node in gltf.nodes().filter(|n| n.skin().is_some()) {
        // glTF ignores a skinned node's own transform
        assert_eq!(node.transform().decomposed().0, [0.0; 3], "{:?}", node.name());
    }

    let mut scene = Scene::new();
    import_glb(&mut scene, &path).await.unwrap();
    for (name, expected) in parts.iter().zip(before) {
        let after = first_vertex(&scene, name);
        assert!((after - expected).magnitude() < 1e-5, "{name}: {after:?} != {expected:?}");
    }
}

#[tokio::test]
async fn exported_character_reimports_rigged_with_baked_face() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    ctx.build_character(TokenId(5)).await;
    let path = ctx.export_character(TokenId(5)).await.unwrap();

    let mut scene = Scene::new();
    import_glb(&mut scene, &path).await.unwrap();
    let armatures = scene.armatures();
    assert_eq!(armatures.len(), 1);
    assert_eq!(scene.object(armatures[0]).unwrap().name, "fRiENDSiES 5");
    let meshes: Vec<_> = scene.objects().filter(|(_, o)| o.kind.is_mesh()).collect();
    assert_eq!(meshes.len(), 2);
    for (_, mesh) in meshes {
        assert_eq!(mesh.parent, Some((armatures[0], ParentKind::Deform)));
    }

    let Some(NodeKind::ImageTexture { image: Some(image) }) = head_input(&scene, socket::BASE_COLOR) else {
        panic!("head base color is not a texture");
    };
    let pixels = &scene.images.get(image).unwrap().pixels;
    // transparent half of the face keeps the skin, the opaque half replaces it
    assert_eq!(pixels.get_pixel(0, 0).0, [200, 160, 120, 255]);
    assert_eq!(pixels.get_pixel(3, 0).0, [10, 10, 10, 255]);
}

#[tokio::test]
async fn batch_isolates_bad_tokens() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    ctx.config.batch.export = true;
    let tokens = parse_batch(r#"[5, "bad", 7]"#, &fixture.dir.path().join("b.json"), 10000).unwrap();

    let log = run_batch(&mut ctx, &tokens, &AtomicBool::new(false)).await;
    assert_eq!(log.len(), 3);
    assert!(!log.cancelled);
    assert!(log.entries[0].outcome.is_success(), "{:?}", log.entries[0]);
    assert_eq!(
        log.entries[1].outcome,
        TokenOutcome::Invalid(TokenError::NotANumber("bad".into()))
    );
    assert!(log.entries[2].outcome.is_success(), "{:?}", log.entries[2]);
    assert_eq!(log.succeeded(), 2);

    for token in [TokenId(5), TokenId(7)] {
        assert!(ctx.config.export_path(token).exists());
    }
    // only the last character is left, shifted by its batch position
    assert!(ctx.scene.find_by_name("fRiENDSiES 5").is_none());
    let last = ctx.scene.find_by_name("fRiENDSiES 7").unwrap();
    assert!((translation_of(&ctx.scene.world_matrix(last)).x - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn cancelled_batch_returns_partial_log() {
    let fixture = Fixture::with_parts().await;
    let mut ctx = fixture.context().await;
    let tokens = parse_batch("[5, 7]", &fixture.dir.path().join("b.json"), 10000).unwrap();
    let log = run_batch(&mut ctx, &tokens, &AtomicBool::new(true)).await;
    assert!(log.cancelled);
    assert!(log.is_empty());
}
