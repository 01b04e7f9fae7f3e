use std::path::PathBuf;

use thiserror::Error;

use crate::{data_structures::texture::TextureData, resources::parsed::TextureSource};

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("could not read texture {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not decode texture {key}")]
    Decode {
        key: String,
        #[source]
        source: image::ImageError,
    },
}

/// Read (for file sources) and decode a texture into RGBA8.
pub fn decode(source: &TextureSource) -> Result<TextureData, TextureError> {
    match source {
        TextureSource::Path(path) => {
            let bytes = std::fs::read(path).map_err(|source| TextureError::Io {
                path: path.clone(),
                source,
            })?;
            decode_bytes(&bytes, None, &path.to_string_lossy())
        }
        TextureSource::Embedded { key, bytes, mime } => decode_bytes(bytes, mime.as_deref(), key),
    }
}

/// Decode encoded image bytes, using the MIME type as a format hint when it is known.
pub fn decode_bytes(bytes: &[u8], mime: Option<&str>, key: &str) -> Result<TextureData, TextureError> {
    let format = mime.and_then(image::ImageFormat::from_mime_type);
    let decoded = match format {
        Some(format) => image::load_from_memory_with_format(bytes, format),
        None => image::load_from_memory(bytes),
    };
    decoded
        .map(|img| TextureData::from_image(&img))
        .map_err(|source| TextureError::Decode {
            key: key.to_string(),
            source,
        })
}
