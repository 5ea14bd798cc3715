use crate::settings::Settings;
use anyhow::{Result, bail};

/// Validate the configuration values
pub fn validate_config(settings: &Settings) -> Result<()> {
    // Validate log level
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        bail!(
            "Invalid log level '{}'. Valid options are: {:?}",
            settings.log_level,
            valid_log_levels
        );
    }

    // Validate API settings
    if settings.api.base_url.is_empty() {
        bail!("API base URL cannot be empty");
    }
    if !settings.api.base_url.starts_with("http://")
        && !settings.api.base_url.starts_with("https://")
    {
        bail!("API base URL must start with http:// or https://");
    }
    if settings.api.request_timeout_secs == 0 {
        bail!("API request timeout must be greater than 0");
    }
    if settings.api.parallel_downloads == 0 {
        bail!("API parallel downloads must be greater than 0");
    }

    // Validate classification settings
    if settings.classify.min_traceroutes == 0 {
        bail!("Minimum traceroute threshold must be greater than 0");
    }
    if settings.classify.bin_size_secs <= 0 {
        bail!(
            "Bin size must be positive, got {}",
            settings.classify.bin_size_secs
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_defaults() {
        let config = Settings::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Settings::default();
        config.log_level = "invalid".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = Settings::default();
        config.api.base_url = "".to_string();
        assert!(validate_config(&config).is_err());

        config.api.base_url = "not-a-url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_bin_size() {
        let mut config = Settings::default();
        config.classify.bin_size_secs = 0;
        assert!(validate_config(&config).is_err());

        config.classify.bin_size_secs = -300;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_min_traceroutes() {
        let mut config = Settings::default();
        config.classify.min_traceroutes = 0;
        assert!(validate_config(&config).is_err());
    }
}
