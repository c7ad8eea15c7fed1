//! Model-specific generation arguments.
//!
//! Sandbox children run with the work directory as their cwd, so paths
//! inside the arguments are relative to it. Payloads fetched from the
//! coordinator are written into `images/` before the request is sent.

use std::path::{Path, PathBuf};

use aibrush_core::job::Job;
use aibrush_core::model::ModelKind;
use serde_json::{json, Value};

use crate::error::WorkerError;

/// Directory (under the work dir) holding inputs and outputs.
pub const IMAGES_DIR: &str = "images";

/// Weights file loaded by the super-resolution child.
pub const SWINIR_WEIGHTS: &str = "003_realSR_BSRGAN_DFO_s64w8_SwinIR-M_x4_GAN.pth";

/// Arguments ready to send, plus where the child will write its output.
#[derive(Debug)]
pub struct PreparedArgs {
    pub args: Value,
    pub output: PathBuf,
}

fn output_name(job: &Job) -> String {
    format!("{}.jpg", job.id)
}

fn init_name(job: &Job) -> String {
    format!("{}-init.jpg", job.id)
}

fn mask_name(job: &Job) -> String {
    format!("{}-mask.jpg", job.id)
}

/// Path of an input or output file relative to the child's cwd.
fn relative(name: &str) -> String {
    format!("{IMAGES_DIR}/{name}")
}

async fn write_payload(images: &Path, name: &str, data: &[u8]) -> Result<(), WorkerError> {
    tokio::fs::write(images.join(name), data).await?;
    Ok(())
}

fn require<'a>(job: &Job, data: &'a Option<Vec<u8>>, payload: &'static str) -> Result<&'a [u8], WorkerError> {
    data.as_deref().ok_or_else(|| WorkerError::MissingPayload {
        job_id: job.id.clone(),
        payload,
    })
}

/// Write `job`'s payloads under `work_dir` and build its arguments.
pub async fn prepare(job: &Job, work_dir: &Path) -> Result<PreparedArgs, WorkerError> {
    let images = work_dir.join(IMAGES_DIR);
    tokio::fs::create_dir_all(&images).await?;

    let output = images.join(output_name(job));
    let args = match job.model {
        ModelKind::StableDiffusionText2Im => {
            let init_img = match job.image_data.as_deref() {
                Some(data) => {
                    write_payload(&images, &init_name(job), data).await?;
                    Value::String(relative(&init_name(job)))
                }
                None => Value::Null,
            };
            json!({
                "prompt": job.phrases.join(","),
                "H": job.height,
                "W": job.width,
                "seed": rand::random::<u32>(),
                "filename": output_name(job),
                "ddim_steps": job.iterations,
                "strength": job.stable_diffusion_strength,
                "init_img": init_img,
            })
        }
        ModelKind::StableDiffusionInpainting => {
            let image = require(job, &job.image_data, "image")?;
            let mask = require(job, &job.mask_data, "mask")?;
            write_payload(&images, &init_name(job), image).await?;
            write_payload(&images, &mask_name(job), mask).await?;
            json!({
                "prompt": job.phrases.join(","),
                "H": job.height,
                "W": job.width,
                "seed": rand::random::<u32>(),
                "filename": output_name(job),
                "ddim_steps": job.iterations,
                "image": relative(&init_name(job)),
                "mask": relative(&mask_name(job)),
            })
        }
        ModelKind::SwinIr => {
            let image = require(job, &job.image_data, "image")?;
            write_payload(&images, &init_name(job), image).await?;
            json!({
                "model_path": SWINIR_WEIGHTS,
                "init_image": relative(&init_name(job)),
                "output_image": relative(&output_name(job)),
            })
        }
    };

    Ok(PreparedArgs { args, output })
}
