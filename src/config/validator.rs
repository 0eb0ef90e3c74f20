//! Section validators for [`crate::config::Config`].
//!
//! Each function checks one configuration section for values that would make
//! a run unsound. Validation failures are configuration errors and therefore
//! process-fatal.

use super::{ConcurrencyConfig, OutputConfig, TuningConfig, WatchdogConfig};
use crate::Result;
use crate::error::PixlyError;

/// Validate worker counts and the memory ceiling.
pub fn validate_concurrency(config: &ConcurrencyConfig) -> Result<()> {
    if config.memory_limit_mb == 0 {
        return Err(PixlyError::config("memory_limit_mb must be greater than 0"));
    }
    // conversion_workers == 0 means "use CPU count" and is always valid.
    if config.conversion_workers > 1024 {
        return Err(PixlyError::config(format!(
            "conversion_workers is unreasonably large: {}",
            config.conversion_workers
        )));
    }
    Ok(())
}

/// Validate the output template, when present.
pub fn validate_output(config: &OutputConfig) -> Result<()> {
    if let Some(template) = &config.directory_template {
        if template.as_os_str().is_empty() {
            return Err(PixlyError::config(
                "output.directory_template must not be an empty path; omit it for in-place mode",
            ));
        }
        if template.is_file() {
            return Err(PixlyError::config(format!(
                "output.directory_template points at a file: {}",
                template.display()
            )));
        }
    }
    Ok(())
}

/// Validate watchdog timings.
pub fn validate_watchdog(config: &WatchdogConfig) -> Result<()> {
    if config.stagnant_timeout_secs == 0 || config.per_file_timeout_secs == 0 {
        return Err(PixlyError::config(
            "watchdog timeouts must be greater than 0",
        ));
    }
    if config.large_file_stagnant_timeout_secs < config.stagnant_timeout_secs {
        return Err(PixlyError::config(
            "large-file stagnation timeout must not be shorter than the normal one",
        ));
    }
    Ok(())
}

/// Validate strategy thresholds and quality ladders.
pub fn validate_tuning(config: &TuningConfig) -> Result<()> {
    if config.suspicion_probe_threshold > 100 {
        return Err(PixlyError::config(
            "suspicion_probe_threshold must be within 0..=100",
        ));
    }
    let (lo, hi) = config.emoji_accept_band;
    if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
        return Err(PixlyError::config(
            "emoji_accept_band must be an ordered pair of ratios within [0, 1]",
        ));
    }
    if config.emoji_quality_ladder.is_empty() {
        return Err(PixlyError::config("emoji_quality_ladder must not be empty"));
    }
    for ladder in [
        &config.emoji_quality_ladder,
        &config.lossy_ladder_high,
        &config.lossy_ladder_default,
    ] {
        if ladder.iter().any(|q| *q == 0 || *q > 100) {
            return Err(PixlyError::config(
                "quality ladder entries must be within 1..=100",
            ));
        }
    }
    if !(0.0..1.0).contains(&config.min_saving_ratio) {
        return Err(PixlyError::config("min_saving_ratio must be within [0, 1)"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_zero_memory_limit_rejected() {
        let mut config = Config::default();
        config.concurrency.memory_limit_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_stagnation_timeouts_rejected() {
        let mut config = Config::default();
        config.watchdog.large_file_stagnant_timeout_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_quality_ladder_rejected() {
        let mut config = Config::default();
        config.tuning.emoji_quality_ladder = vec![60, 0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_emoji_band_rejected() {
        let mut config = Config::default();
        config.tuning.emoji_accept_band = (0.5, 0.1);
        assert!(config.validate().is_err());
    }
}
