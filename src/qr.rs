//! Pairing QR rendering.
//!
//! The messaging client hands us the raw pairing payload; the dashboard wants
//! an `<img src>`-able string, so we render a PNG and wrap it in a data URL.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use qrcode::QrCode;

/// Render a QR payload into a `data:image/png;base64,...` URL.
pub fn to_data_url(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes()).context("QR payload rejected by encoder")?;
    let img = code
        .render::<image::Luma<u8>>()
        .min_dimensions(240, 240)
        .build();

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .context("Failed to encode QR code as PNG")?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

    #[test]
    fn renders_a_png_data_url() {
        let url = to_data_url("2@abcdefghij,klmnopqrst,uvwxyz012345").unwrap();
        let encoded = url
            .strip_prefix("data:image/png;base64,")
            .expect("data URL prefix");
        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(&bytes[..4], PNG_MAGIC);
    }

    #[test]
    fn oversized_payload_is_an_error() {
        // QR version 40 tops out a little under 3 KB of binary data.
        let payload = "x".repeat(8_000);
        assert!(to_data_url(&payload).is_err());
    }
}
