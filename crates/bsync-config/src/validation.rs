use crate::diagnostics::{ConfigValidationError, ConfigWarning, ValidationDiagnostics};
use crate::{LoggingConfig, SyncConfig};

impl SyncConfig {
    /// Validate semantic invariants, reporting as many problems as possible in one pass.
    #[must_use]
    pub fn validate(&self) -> ValidationDiagnostics {
        let mut out = ValidationDiagnostics::default();

        validate_logging(self, &mut out);
        validate_storage(self, &mut out);
        validate_timeouts(self, &mut out);
        validate_server(self, &mut out);

        out
    }
}

fn validate_logging(config: &SyncConfig, out: &mut ValidationDiagnostics) {
    let normalized = LoggingConfig::normalize_level_directives(&config.logging.level);
    if !config.logging.level.trim().is_empty()
        && tracing_subscriber::EnvFilter::try_new(normalized.clone()).is_err()
    {
        out.warnings.push(ConfigWarning::LoggingLevelInvalid {
            value: config.logging.level.clone(),
            normalized,
        });
    }
}

fn validate_storage(config: &SyncConfig, out: &mut ValidationDiagnostics) {
    if config.storage.cache_capacity == 0 {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: "storage.cache_capacity".to_owned(),
            message: "must be >= 1".to_owned(),
        });
    }
}

fn validate_timeouts(config: &SyncConfig, out: &mut ValidationDiagnostics) {
    if config.timeouts.idle_ms == 0 {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: "timeouts.idle_ms".to_owned(),
            message: "must be >= 1".to_owned(),
        });
    }
}

fn validate_server(config: &SyncConfig, out: &mut ValidationDiagnostics) {
    if let Some(program) = &config.server.program {
        if program.trim().is_empty() {
            out.errors.push(ConfigValidationError::InvalidValue {
                toml_path: "server.program".to_owned(),
                message: "must not be empty".to_owned(),
            });
        }
    }

    let Some(aspect) = &config.server.aspect else {
        return;
    };
    if aspect.program.trim().is_empty() {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: "server.aspect.program".to_owned(),
            message: "must not be empty".to_owned(),
        });
    }
    if config.server.program.is_some() {
        out.warnings.push(ConfigWarning::ServerAspectOverridesBsp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AspectConfig;

    #[test]
    fn default_config_is_valid() {
        let validation = SyncConfig::default().validate();
        assert!(validation.errors.is_empty());
        assert!(validation.warnings.is_empty());
    }

    #[test]
    fn zero_limits_are_errors() {
        let mut config = SyncConfig::default();
        config.storage.cache_capacity = 0;
        config.timeouts.idle_ms = 0;
        let paths: Vec<_> = config
            .validate()
            .errors
            .into_iter()
            .map(|ConfigValidationError::InvalidValue { toml_path, .. }| toml_path)
            .collect();
        assert_eq!(paths, vec!["storage.cache_capacity", "timeouts.idle_ms"]);
    }

    #[test]
    fn bad_log_filter_is_a_warning() {
        let mut config = SyncConfig::default();
        config.logging.level = "bsync=verbose".to_owned();
        let validation = config.validate();
        assert!(validation.errors.is_empty());
        assert!(matches!(
            validation.warnings.as_slice(),
            [ConfigWarning::LoggingLevelInvalid { .. }]
        ));
    }

    #[test]
    fn aspect_and_bsp_together_warns() {
        let mut config = SyncConfig::default();
        config.server.program = Some("bazel-bsp".to_owned());
        config.server.aspect = Some(AspectConfig::default());
        assert_eq!(
            config.validate().warnings,
            vec![ConfigWarning::ServerAspectOverridesBsp]
        );
    }
}
