//! Pipeline configuration loaded from a RON file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jobs_engine::PipelineConfig;

/// Reads and validates the config at `path`. `None` means defaults were used.
///
/// Runs before the logger exists, so nothing is logged here. A missing file
/// falls back to defaults only when the caller did not name it explicitly; an
/// unreadable or invalid file is always an error.
pub fn load_config(path: &Path, explicit: bool) -> Result<Option<PipelineConfig>> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !explicit => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("reading config {}", path.display()));
        }
    };
    parse_config(&content)
        .map(Some)
        .with_context(|| format!("in config {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = ron::from_str(content).context("parsing RON")?;
    config.validate().context("validating")?;
    Ok(config)
}

/// Command-line values win over the file.
pub fn apply_overrides(config: &mut PipelineConfig, data_dir: Option<PathBuf>) {
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses_and_validates() {
        let config = parse_config(include_str!("../../../config/pipeline.ron")).unwrap();
        assert!(config.enabled_sites().count() >= 1);
        assert!(config.sites.values().all(|site| site.selectors.is_some()));
    }

    #[test]
    fn empty_document_gives_defaults() {
        let config = parse_config("()").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = parse_config("(max_workers: 0)").unwrap_err();
        assert!(format!("{err:#}").contains("max_workers"));
    }

    #[test]
    fn missing_default_file_falls_back_but_explicit_one_fails() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("absent.ron");
        assert!(load_config(&path, false).unwrap().is_none());
        assert!(load_config(&path, true).is_err());
    }

    #[test]
    fn data_dir_override_replaces_configured_dir() {
        let mut config = PipelineConfig::default();
        apply_overrides(&mut config, Some(PathBuf::from("/tmp/jobs")));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/jobs"));
    }
}
