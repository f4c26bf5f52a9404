//! Hands existing bundles to clients: as a file download or a QR image.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ExtendedColorType, ImageEncoder, Luma};
use qrcode::{EcLevel, QrCode};
use tracing::{debug, warn};

use crate::clients::validate_name;
use crate::config::InstallLayout;
use crate::error::{Error, Result};

/// Pixel size of one QR module.
const MODULE_PX: u32 = 10;

/// A bundle ready to be sent as an attachment.
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

fn read_bundle(layout: &InstallLayout, name: &str) -> Result<Vec<u8>> {
    let not_found = || Error::not_found(format!("Configuration for {name} not found"));
    if validate_name(name).is_err() {
        return Err(not_found());
    }
    let path = layout.bundle_path(name);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
        Err(e) => Err(e.into()),
    }
}

/// Load the bundle for `name` as a `text/plain` attachment named `<name>.ovpn`.
pub fn download(layout: &InstallLayout, name: &str) -> Result<Download> {
    let bytes = read_bundle(layout, name)?;
    debug!(client = %name, size = bytes.len(), "serving bundle");
    Ok(Download {
        filename: format!("{name}.ovpn"),
        content_type: "text/plain",
        bytes,
    })
}

/// Encode the bundle for `name` as a QR code and return it as a
/// `data:image/png;base64,` URI.
///
/// Uses error-correction level L with the standard 4-module quiet zone.
/// Bundles too large for a single symbol fail with [`Error::QrEncode`].
pub fn render_scannable(layout: &InstallLayout, name: &str) -> Result<String> {
    let bytes = read_bundle(layout, name)?;
    let png = encode_png(&bytes).inspect_err(|e| {
        warn!(client = %name, error = %e, "QR rendering failed");
    })?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

fn encode_png(data: &[u8]) -> Result<Vec<u8>> {
    let code = QrCode::with_error_correction_level(data, EcLevel::L)
        .map_err(|e| Error::QrEncode(e.to_string()))?;
    let img = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(MODULE_PX, MODULE_PX)
        .build();

    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::L8,
        )
        .map_err(|e| Error::QrEncode(e.to_string()))?;
    Ok(buf)
}
