//! `${VAR}` references in configuration files
//!
//! Credentials rarely belong in a checked-in YAML file, so config values may
//! reference the environment instead: `${OSS_ACCESS_KEY_ID}`. A default can be
//! supplied with `${VAR:-fallback}`.

use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern")
});

/// Expand every `${VAR}` / `${VAR:-default}` reference in `input`.
///
/// All unresolved names are reported together in one `ValidationError`.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let expanded = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_untouched() {
        let input = "endpoint: https://oss-cn-hangzhou.aliyuncs.com";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_credentials_from_env() {
        env::set_var("OSSFS_TEST_KEY_ID", "LTAI-test");
        env::set_var("OSSFS_TEST_KEY_SECRET", "s3cr3t");
        let result =
            substitute_env_vars("key: ${OSSFS_TEST_KEY_ID}\nsecret: ${OSSFS_TEST_KEY_SECRET}")
                .unwrap();
        assert_eq!(result, "key: LTAI-test\nsecret: s3cr3t");
        env::remove_var("OSSFS_TEST_KEY_ID");
        env::remove_var("OSSFS_TEST_KEY_SECRET");
    }

    #[test]
    fn test_default_used_when_unset() {
        let result = substitute_env_vars("${OSSFS_TEST_UNSET_REGION:-oss-cn-beijing}").unwrap();
        assert_eq!(result, "oss-cn-beijing");
    }

    #[test]
    fn test_set_value_beats_default() {
        env::set_var("OSSFS_TEST_REGION", "oss-cn-shanghai");
        let result = substitute_env_vars("${OSSFS_TEST_REGION:-oss-cn-beijing}").unwrap();
        assert_eq!(result, "oss-cn-shanghai");
        env::remove_var("OSSFS_TEST_REGION");
    }

    #[test]
    fn test_missing_reported_once() {
        let err = substitute_env_vars("${OSSFS_MISSING_A} ${OSSFS_MISSING_B} ${OSSFS_MISSING_A}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("OSSFS_MISSING_A, OSSFS_MISSING_B"), "{}", err);
    }

    #[test]
    fn test_bare_dollar_not_expanded() {
        let input = "$VAR and {VAR}";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }
}
