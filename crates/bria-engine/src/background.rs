use std::io::Cursor;

use bria_contracts::{BriaError, NormalizedResult, Result};
use image::{DynamicImage, ImageFormat};

use crate::bytes_to_data_uri;

pub fn remove_background(image_bytes: &[u8]) -> Result<NormalizedResult> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|err| BriaError::Image(format!("remove_background could not decode input: {err}")))?;
    let png = encode_png(&DynamicImage::ImageRgba8(decoded.to_rgba8()))?;
    Ok(NormalizedResult::single(bytes_to_data_uri(&png, "image/png")))
}

pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|err| BriaError::Image(format!("PNG encode failed: {err}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use bria_contracts::{BriaError, Locator};
    use image::{DynamicImage, Rgb, RgbImage};

    use super::{encode_png, remove_background};

    fn white_png() -> Vec<u8> {
        let mut image = RgbImage::new(8, 8);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([255, 255, 255]);
        }
        encode_png(&DynamicImage::ImageRgb8(image)).unwrap_or_default()
    }

    #[test]
    fn returns_rgba_png_data_uri() -> anyhow::Result<()> {
        let result = remove_background(&white_png())?;
        assert_eq!(result.len(), 1);
        let locator = Locator::parse(&result.urls()[0]);
        assert_eq!(locator.kind(), "inline");
        let bytes = locator.decode().expect("inline payload");
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!(decoded.color(), image::ColorType::Rgba8);
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
        Ok(())
    }

    #[test]
    fn undecodable_input_is_an_image_error() {
        let err = remove_background(b"not an image").err();
        assert!(matches!(err, Some(BriaError::Image(_))));
    }
}
