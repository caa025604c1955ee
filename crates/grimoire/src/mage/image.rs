use super::engine::MageProfile;
use super::portal::PortalSettings;
use crate::errors::MageResult;
use crate::kit::Kit;
use crate::toolkits::image::image_kit;

/// Describes images found inside the project bounds
pub struct ImageProfile;

impl MageProfile for ImageProfile {
    fn name(&self) -> &'static str {
        "image"
    }

    fn preamble(&self, settings: &PortalSettings) -> MageResult<Vec<String>> {
        Ok(settings
            .bounds_advisory(" for image files", "image files")?
            .into_iter()
            .collect())
    }

    fn build_kit(&self, settings: &PortalSettings) -> MageResult<Kit> {
        image_kit(
            settings.image_provider.clone(),
            &settings.image_model,
            &settings.project_bounds,
        )
    }
}
