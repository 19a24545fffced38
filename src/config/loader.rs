//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{EstuaryConfig, PostgreSQLConfig, StoreBackend};
use super::secret::secret_string;
use crate::domain::errors::EstuaryError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`EstuaryConfig`]
/// 4. Applies environment variable overrides (`ESTUARY_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`EstuaryError::Configuration`] if the file is missing or
/// unreadable, a referenced variable is unset, parsing fails, or validation
/// fails.
///
/// # Examples
///
/// ```no_run
/// use estuary::config::loader::load_config;
///
/// let config = load_config("estuary.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<EstuaryConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(EstuaryError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        EstuaryError::Configuration(format!(
            "Failed to read configuration file {}: {e}",
            path.display()
        ))
    })?;

    parse_config(&contents)
}

/// Parses, overrides and validates configuration text
///
/// # Errors
///
/// Same as [`load_config`], minus the file handling.
pub fn parse_config(contents: &str) -> Result<EstuaryConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: EstuaryConfig = toml::from_str(&contents)
        .map_err(|e| EstuaryError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        EstuaryError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static env var pattern is valid")
    })
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = env_var_pattern();
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{var_name}}}"), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(EstuaryError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            EstuaryError::Configuration(format!("Environment variable {name} has invalid value '{raw}'"))
        }),
        Err(_) => Ok(None),
    }
}

/// Applies environment variable overrides using the `ESTUARY_*` prefix
///
/// Variables follow `ESTUARY_<SECTION>_<KEY>`, e.g.
/// `ESTUARY_ENGINE_STORE_BACKEND=postgresql`.
fn apply_env_overrides(config: &mut EstuaryConfig) -> Result<()> {
    // Application
    if let Ok(val) = std::env::var("ESTUARY_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = env_parse("ESTUARY_APPLICATION_DRY_RUN")? {
        config.application.dry_run = val;
    }

    // Engine
    if let Ok(val) = std::env::var("ESTUARY_ENGINE_STORE_BACKEND") {
        config.engine.store_backend = match val.trim().to_ascii_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "postgresql" | "postgres" => StoreBackend::PostgreSQL,
            other => {
                return Err(EstuaryError::Configuration(format!(
                    "ESTUARY_ENGINE_STORE_BACKEND must be 'memory' or 'postgresql', got '{other}'"
                )))
            }
        };
    }
    if let Some(val) = env_parse("ESTUARY_ENGINE_ITERATION_DELAY_MS")? {
        config.engine.iteration_delay_ms = val;
    }
    if let Some(val) = env_parse("ESTUARY_ENGINE_SHUTDOWN_TIMEOUT_SECS")? {
        config.engine.shutdown_timeout_secs = val;
    }

    // PostgreSQL: a connection string alone is enough to create the section
    if let Ok(val) = std::env::var("ESTUARY_POSTGRESQL_CONNECTION_STRING") {
        match config.postgresql.as_mut() {
            Some(pg) => pg.connection_string = secret_string(val),
            None => {
                let pg: PostgreSQLConfig = toml::from_str(&format!(
                    "connection_string = {}",
                    toml::Value::String(val)
                ))
                .map_err(|e| EstuaryError::Configuration(format!("Invalid postgresql override: {e}")))?;
                config.postgresql = Some(pg);
            }
        }
    }
    if let Some(pg) = config.postgresql.as_mut() {
        if let Some(val) = env_parse("ESTUARY_POSTGRESQL_MAX_CONNECTIONS")? {
            pg.max_connections = val;
        }
        if let Some(val) = env_parse("ESTUARY_POSTGRESQL_STATEMENT_TIMEOUT_SECONDS")? {
            pg.statement_timeout_seconds = val;
        }
    }

    // Mappings
    if let Ok(val) = std::env::var("ESTUARY_MAPPINGS_DIRECTORY") {
        config.mappings.directory = val;
    }

    // Concepts
    if let Ok(val) = std::env::var("ESTUARY_CONCEPTS_VOCABULARY_FILE") {
        config.concepts.vocabulary_file = Some(val);
    }
    if let Some(val) = env_parse("ESTUARY_CONCEPTS_AUTO_APPROVE_THRESHOLD")? {
        config.concepts.auto_approve_threshold = val;
    }
    if let Some(val) = env_parse("ESTUARY_CONCEPTS_REVIEW_THRESHOLD")? {
        config.concepts.review_threshold = val;
    }
    if let Ok(val) = std::env::var("ESTUARY_CONCEPTS_EMBEDDING_API_KEY") {
        config.concepts.embedding.api_key = Some(secret_string(val));
    }
    if let Ok(val) = std::env::var("ESTUARY_CONCEPTS_REASONING_ENDPOINT") {
        config.concepts.reasoning.endpoint = Some(val);
    }
    if let Ok(val) = std::env::var("ESTUARY_CONCEPTS_REASONING_API_KEY") {
        config.concepts.reasoning.api_key = Some(secret_string(val));
    }
    if let Some(val) = env_parse("ESTUARY_CONCEPTS_REASONING_ENABLED")? {
        config.concepts.reasoning.enabled = val;
    }

    // Logging
    if let Some(val) = env_parse("ESTUARY_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = val;
    }
    if let Ok(val) = std::env::var("ESTUARY_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::AutoSync;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("ESTUARY_TEST_SUBST_VAR", "test_value");
        let input = "password = \"${ESTUARY_TEST_SUBST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"\n");
        std::env::remove_var("ESTUARY_TEST_SUBST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        let input = "password = \"${ESTUARY_TEST_DEFINITELY_UNSET}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("ESTUARY_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_substitute_skips_comments() {
        let input = "# key = \"${ESTUARY_TEST_COMMENTED_OUT}\"\nname = \"x\"";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("${ESTUARY_TEST_COMMENTED_OUT}"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent-estuary.toml");
        assert!(matches!(result, Err(EstuaryError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
[application]
log_level = "debug"

[engine]
iteration_delay_ms = 5

[mappings]
directory = "./maps"

[concepts]
vocabulary_file = "vocab/CONCEPT.csv"

[concepts.reasoning]
enabled = true
endpoint = "http://localhost:8088/resolve"

[[jobs]]
name = "patients"
resource_type = "Patient"
mapping_ref = "patients_v1"

[jobs.source]
type = "tabular-file"
path = "data/patients.csv"
delimiter = ";"

[jobs.destination]
auto_sync = "analytic"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.engine.iteration_delay_ms, 5);
        assert_eq!(config.mappings.directory, "./maps");
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].source.get_str("delimiter"), Some(";"));
        assert_eq!(config.jobs[0].destination.auto_sync, AutoSync::Analytic);
        assert!(config.jobs[0].auto_start);
        assert!(config.concepts.reasoning.enabled);
    }

    #[test]
    fn test_parse_config_rejects_invalid() {
        let err = parse_config("[application]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(err.to_string().contains("validation failed"));
    }
}
