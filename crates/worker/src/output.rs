//! Post-processing of sandbox output before ranking and upload.

use std::path::Path;

use aibrush_core::job::Job;
use aibrush_core::model::ModelKind;
use image::imageops::FilterType;
use image::ImageFormat;

use crate::error::WorkerError;

/// Bring the output at `path` in line with what the job asked for.
///
/// The upscaler works at a fixed ×4 scale, so its output is resized back
/// to the job's dimensions. Other models already render at the requested
/// size and are left untouched.
pub async fn finalize(job: &Job, path: &Path) -> Result<(), WorkerError> {
    if job.model != ModelKind::SwinIr {
        return Ok(());
    }
    let path = path.to_path_buf();
    let (width, height) = (job.width, job.height);
    tokio::task::spawn_blocking(move || resize_in_place(&path, width, height)).await?
}

fn resize_in_place(path: &Path, width: u32, height: u32) -> Result<(), WorkerError> {
    let img = image::open(path)?;
    if img.width() == width && img.height() == height {
        return Ok(());
    }

    tracing::debug!(
        path = %path.display(),
        from_width = img.width(),
        from_height = img.height(),
        width,
        height,
        "Resizing output",
    );
    img.resize_exact(width, height, FilterType::Lanczos3)
        .to_rgb8()
        .save_with_format(path, ImageFormat::Jpeg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aibrush-output-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        ImageBuffer::from_pixel(width, height, Rgb([200u8, 40, 90]))
            .save_with_format(path, ImageFormat::Jpeg)
            .unwrap();
    }

    fn job(model: ModelKind, width: u32, height: u32) -> Job {
        let mut job = Job::warmup(model);
        job.warmup = false;
        job.width = width;
        job.height = height;
        job
    }

    #[tokio::test]
    async fn upscaled_output_is_resized_to_job_dimensions() {
        let path = scratch("up.jpg");
        write_jpeg(&path, 256, 192);

        finalize(&job(ModelKind::SwinIr, 64, 48), &path).await.unwrap();

        assert_eq!(image::image_dimensions(&path).unwrap(), (64, 48));
    }

    #[tokio::test]
    async fn other_models_are_left_alone() {
        let path = scratch("sd.jpg");
        write_jpeg(&path, 128, 128);
        let before = std::fs::read(&path).unwrap();

        finalize(&job(ModelKind::StableDiffusionText2Im, 64, 64), &path).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn undecodable_output_is_an_error() {
        let path = scratch("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();

        let result = finalize(&job(ModelKind::SwinIr, 64, 64), &path).await;
        assert_matches!(result, Err(WorkerError::Image(_)));
    }
}
