//! Model variants a job can select.
//!
//! The coordinator tags every job with the model that must produce it.
//! Each variant maps onto a child-process script hosted by the compute
//! sandbox, and carries the small amount of per-model knowledge the
//! worker needs (which payloads to fetch, whether a synthetic warmup
//! job makes sense).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "stable_diffusion_text2im")]
    StableDiffusionText2Im,
    #[serde(rename = "stable_diffusion_inpainting")]
    StableDiffusionInpainting,
    #[serde(rename = "swinir")]
    SwinIr,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        Self::StableDiffusionText2Im,
        Self::StableDiffusionInpainting,
        Self::SwinIr,
    ];

    /// Wire name used by the coordinator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StableDiffusionText2Im => "stable_diffusion_text2im",
            Self::StableDiffusionInpainting => "stable_diffusion_inpainting",
            Self::SwinIr => "swinir",
        }
    }

    /// File name of the child-process script hosting this model.
    pub fn script(&self) -> &'static str {
        match self {
            Self::StableDiffusionText2Im => "sd_text2im_model.py",
            Self::StableDiffusionInpainting => "sd_inpaint_model.py",
            Self::SwinIr => "swinir_model.py",
        }
    }

    /// Whether jobs for this model carry a mask payload.
    pub fn requires_mask(&self) -> bool {
        matches!(self, Self::StableDiffusionInpainting)
    }

    /// Whether jobs for this model cannot run without an init image.
    pub fn requires_init_image(&self) -> bool {
        matches!(self, Self::SwinIr | Self::StableDiffusionInpainting)
    }

    /// Text-only models can be warmed up with a synthetic prompt.
    pub fn supports_synthetic_warmup(&self) -> bool {
        !self.requires_init_image()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownModel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for model in ModelKind::ALL {
            assert_eq!(model.as_str().parse::<ModelKind>().unwrap(), model);
        }
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&ModelKind::SwinIr).unwrap();
        assert_eq!(json, "\"swinir\"");
        let parsed: ModelKind = serde_json::from_str("\"stable_diffusion_inpainting\"").unwrap();
        assert_eq!(parsed, ModelKind::StableDiffusionInpainting);
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert_matches!("dalle_mega".parse::<ModelKind>(), Err(CoreError::UnknownModel(_)));
    }

    #[test]
    fn only_text_models_warm_up_synthetically() {
        assert!(ModelKind::StableDiffusionText2Im.supports_synthetic_warmup());
        assert!(!ModelKind::SwinIr.supports_synthetic_warmup());
        assert!(!ModelKind::StableDiffusionInpainting.supports_synthetic_warmup());
    }
}
