// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Configuration loading.
//
// Layers, lowest first: built-in defaults, the configuration file (the
// `--config` path, or `docflow.{json,toml}` in the data directory), then
// `DOCFLOW__SECTION__KEY` environment variables.

use std::path::Path;

use config::{Config, Environment, File};
use docflow_core::ServiceConfig;
use docflow_core::error::{DocflowError, Result};
use tracing::debug;

use super::data_dir;

const ENV_PREFIX: &str = "DOCFLOW";

/// Load and validate the service configuration.
pub fn load(path: Option<&Path>) -> Result<ServiceConfig> {
    let dir = data_dir::data_dir();
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::from(dir.join("docflow")).required(false),
    };
    let archive = data_dir::default_archive_path(&dir);
    load_from(file, Some(&archive), Environment::with_prefix(ENV_PREFIX))
}

fn load_from(
    file: File<config::FileSourceFile, config::FileFormat>,
    default_archive: Option<&Path>,
    environment: Environment,
) -> Result<ServiceConfig> {
    let mut builder = Config::builder();
    if let Some(archive) = default_archive {
        builder = builder
            .set_default("archive_path", archive.to_string_lossy().to_string())
            .map_err(config_error)?;
    }
    let settings: ServiceConfig = builder
        .add_source(file)
        .add_source(
            environment
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ocr.default_languages")
                .with_list_parse_key("correction.languages")
                .with_list_parse_key("conversion.args"),
        )
        .build()
        .map_err(config_error)?
        .try_deserialize()
        .map_err(config_error)?;

    settings.validate()?;
    debug!(workers = settings.workers, ocr = settings.ocr.enabled, "configuration loaded");
    Ok(settings)
}

fn config_error(e: config::ConfigError) -> DocflowError {
    DocflowError::Config(e.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    fn missing_file() -> File<config::FileSourceFile, config::FileFormat> {
        File::from(Path::new("/nonexistent/docflow")).required(false)
    }

    #[test]
    fn defaults_without_sources() {
        let settings = load_from(missing_file(), None, env(&[])).unwrap();
        assert_eq!(settings.workers, 2);
        assert!(!settings.ocr.enabled);
        assert!(settings.archive_path.is_none());
    }

    #[test]
    fn file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "workers = 4\n[ocr]\nenabled = true\ntimeout_secs = 120\n[correction]\nlanguages = [\"ara\", \"fas\"]"
        )
        .unwrap();

        let settings = load_from(
            File::from(file.path()).required(true),
            None,
            env(&[
                ("DOCFLOW__OCR__TIMEOUT_SECS", "300"),
                ("DOCFLOW__OCR__DEFAULT_LANGUAGES", "deu,eng"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.workers, 4);
        assert!(settings.ocr.enabled);
        assert_eq!(settings.ocr.timeout_secs, 300);
        assert_eq!(settings.ocr.default_languages, vec!["deu", "eng"]);
        assert_eq!(settings.correction.languages, vec!["ara", "fas"]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = load_from(missing_file(), None, env(&[("DOCFLOW__WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, DocflowError::Config(_)));
    }

    #[test]
    fn default_archive_can_be_overridden() {
        let settings = load_from(
            missing_file(),
            Some(Path::new("/var/lib/docflow/jobs.db")),
            env(&[]),
        )
        .unwrap();
        assert_eq!(
            settings.archive_path.as_deref(),
            Some(Path::new("/var/lib/docflow/jobs.db"))
        );
    }
}
