pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::Result;

use crate::config::ModelSettings;
use crate::detect::backend::DetectorBackend;

/// Load the backend named by the model settings.
///
/// `stub://` paths select the scripted backend (no detections); anything else
/// is treated as an ONNX file and requires the `backend-tract` feature.
pub fn load_backend(settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    if settings.path.starts_with("stub://") {
        log::warn!(
            "model {} is a stub: no detections will be produced",
            settings.path
        );
        return Ok(Box::new(StubBackend::new().with_task(settings.task)));
    }

    #[cfg(feature = "backend-tract")]
    {
        let backend = TractBackend::new(
            &settings.path,
            settings.task,
            settings.input_size,
            settings.device,
        )?
        .with_confidence_floor(settings.confidence);
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        anyhow::bail!(
            "loading {} requires the backend-tract feature",
            settings.path
        )
    }
}
