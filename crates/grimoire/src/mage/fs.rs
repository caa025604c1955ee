use super::engine::MageProfile;
use super::portal::PortalSettings;
use crate::errors::MageResult;
use crate::kit::Kit;
use crate::toolkits::fs::fs_kit;

/// Reads, writes and inspects files inside the project bounds
pub struct FilesystemProfile;

impl MageProfile for FilesystemProfile {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn preamble(&self, settings: &PortalSettings) -> MageResult<Vec<String>> {
        Ok(settings.bounds_advisory("", "files")?.into_iter().collect())
    }

    fn build_kit(&self, settings: &PortalSettings) -> MageResult<Kit> {
        fs_kit(&settings.project_bounds)
    }
}
