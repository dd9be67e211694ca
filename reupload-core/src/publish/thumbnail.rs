use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::error::{PipelineError, PipelineResult};

pub const THUMBNAIL_WIDTH: u32 = 1280;
pub const THUMBNAIL_HEIGHT: u32 = 720;

/// Center-crops `source` to 16:9 and scales it to 1280x720 JPEG at `output`.
pub async fn prepare_thumbnail(source: &Path, output: &Path) -> PipelineResult<PathBuf> {
    let source = source.to_path_buf();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || render(&source, &output))
        .await
        .map_err(|err| PipelineError::Publish(format!("thumbnail task failed: {err}")))?
}

fn render(source: &Path, output: &Path) -> PipelineResult<PathBuf> {
    let image = image::open(source).map_err(|err| {
        PipelineError::validation("thumbnail", format!("{}: {err}", source.display()))
    })?;
    let framed = crop_to_frame(image)
        .resize_exact(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT, FilterType::Lanczos3);
    DynamicImage::ImageRgb8(framed.to_rgb8())
        .save_with_format(output, ImageFormat::Jpeg)
        .map_err(|err| PipelineError::Publish(format!("cannot write thumbnail {}: {err}", output.display())))?;
    Ok(output.to_path_buf())
}

fn crop_to_frame(image: DynamicImage) -> DynamicImage {
    let (width, height) = (image.width() as u64, image.height() as u64);
    if width == 0 || height == 0 {
        return image;
    }
    let (target_w, target_h) = (THUMBNAIL_WIDTH as u64, THUMBNAIL_HEIGHT as u64);
    if width * target_h > height * target_w {
        let new_width = height * target_w / target_h;
        let left = (width - new_width) / 2;
        image.crop_imm(left as u32, 0, new_width as u32, height as u32)
    } else {
        let new_height = width * target_h / target_w;
        let top = (height - new_height) / 2;
        image.crop_imm(0, top as u32, width as u32, new_height as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    #[tokio::test]
    async fn square_image_becomes_widescreen_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("square.png");
        RgbImage::from_pixel(400, 400, Rgb([200, 10, 10]))
            .save(&source)
            .unwrap();
        let output = dir.path().join("thumb.jpg");
        prepare_thumbnail(&source, &output).await.unwrap();
        let written = image::open(&output).unwrap();
        assert_eq!(written.dimensions(), (THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT));
    }

    #[test]
    fn wide_image_is_cropped_horizontally() {
        let wide = DynamicImage::ImageRgb8(RgbImage::new(3200, 900));
        let cropped = crop_to_frame(wide);
        assert_eq!(cropped.dimensions(), (1600, 900));
    }

    #[tokio::test]
    async fn unreadable_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("not-an-image.jpg");
        std::fs::write(&source, b"plain text").unwrap();
        let result = prepare_thumbnail(&source, &dir.path().join("out.jpg")).await;
        assert!(result.is_err());
    }
}
