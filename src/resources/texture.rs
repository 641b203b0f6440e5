use std::path::Path;

use anyhow::Context;

use crate::data_structures::texture::Image;

pub async fn load_string(path: &Path) -> std::io::Result<String> {
    tokio::fs::read_to_string(path).await
}

pub async fn load_binary(path: &Path) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

/// Reads and decodes an image file. The file stem becomes the image name.
pub async fn load_image(path: &Path) -> anyhow::Result<Image> {
    let data = load_binary(path)
        .await
        .with_context(|| format!("Could not read image {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let mut image = Image::from_bytes(&data, &name, None)?;
    image.source = Some(path.to_path_buf());
    Ok(image)
}

/// Decodes an image referenced by a glTF document, either embedded in a
/// buffer view or stored next to the model file.
pub async fn load_gltf_image(
    image: gltf::Image<'_>,
    buffers: &[Vec<u8>],
    base_dir: &Path,
    fallback_name: &str,
) -> anyhow::Result<Image> {
    let name = image
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{fallback_name}.image.{}", image.index()));
    match image.source() {
        gltf::image::Source::View { view, mime_type } => {
            let buffer = buffers
                .get(view.buffer().index())
                .with_context(|| format!("Image {name} points at a missing buffer"))?;
            let bytes = buffer
                .get(view.offset()..view.offset() + view.length())
                .with_context(|| format!("Image {name} points outside its buffer"))?;
            Image::from_bytes(bytes, &name, Some(mime_type))
        }
        gltf::image::Source::Uri { uri, mime_type: _ } => {
            let path = base_dir.join(uri);
            let mut image = load_image(&path).await?;
            image.name = name;
            Ok(image)
        }
    }
}
