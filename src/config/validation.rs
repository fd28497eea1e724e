//! Configuration validation
//!
//! Every rule pushes onto a shared error list so callers see all violations
//! at once instead of fixing them one per run.

use std::collections::HashSet;

use super::channel::{ChannelConfig, ChannelField};
use super::file::GovernorFile;
use super::params::MAX_CHANNEL_COUNT;

/// Why a governor configuration was refused
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file is not TOML, or a key has the wrong type
    #[error("cannot parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },

    /// Every rule violation of one load or update, one per line
    #[error("rejected configuration:\n{0}")]
    Validation(String),

    /// One field of a device or channel is out of range
    #[error("{field} = {value}: {reason}")]
    InvalidField {
        field: String,
        value: String,
        reason: String,
    },

    #[error("cannot read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Fold a list of violations into one `Validation` error
    pub fn summarize(errors: Vec<ConfigError>) -> ConfigError {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Check one channel configuration. `path` prefixes field names in errors.
pub fn validate_channel(config: &ChannelConfig, path: &str) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let field_path = |field: ChannelField| {
        if path.is_empty() {
            field.name().to_string()
        } else {
            format!("{}.{}", path, field.name())
        }
    };

    let mut all_finite = true;
    for field in ChannelField::ALL {
        let value = config.get(field);
        if !value.is_finite() {
            all_finite = false;
            errors.push(ConfigError::invalid(
                field_path(field),
                value,
                "must be a finite number",
            ));
        }
    }

    // Ordering is only meaningful once every threshold is a real number
    if all_finite && !config.thresholds.is_ordered() {
        let t = &config.thresholds;
        errors.push(ConfigError::invalid(
            field_path(ChannelField::TripHigh),
            format!(
                "{}/{}/{}/{}",
                t.trip_high, t.alarm_high, t.alarm_low, t.trip_low
            ),
            "thresholds must satisfy trip_low < alarm_low <= alarm_high < trip_high",
        ));
    }

    for field in [
        ChannelField::TripBlockingTime,
        ChannelField::AlarmBlockingTime,
        ChannelField::AlarmDecreaseTime,
        ChannelField::RampCheckTime,
    ] {
        let value = config.get(field);
        if value < 0.0 {
            errors.push(ConfigError::invalid(field_path(field), value, "must be >= 0"));
        }
    }

    if config.ramp_speed <= 0.0 {
        errors.push(ConfigError::invalid(
            field_path(ChannelField::RampSpeed),
            config.ramp_speed,
            "must be > 0",
        ));
    }

    if config.hv_max_point <= 0.0 {
        errors.push(ConfigError::invalid(
            field_path(ChannelField::HvMaxPoint),
            config.hv_max_point,
            "must be > 0",
        ));
    }

    for field in [ChannelField::HvTripGain, ChannelField::HvAlarmGain] {
        let value = config.get(field);
        if !(0.0..=100.0).contains(&value) {
            errors.push(ConfigError::invalid(
                field_path(field),
                value,
                "must be between 0 and 100 percent",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a parsed config file, including every channel it resolves to.
pub fn validate(file: &GovernorFile) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if file.governor.tick_period_ms == 0 {
        errors.push(ConfigError::invalid(
            "governor.tick_period_ms",
            0,
            "must be at least 1",
        ));
    }

    if file.governor.telemetry_stale_after_ms == 0 {
        errors.push(ConfigError::invalid(
            "governor.telemetry_stale_after_ms",
            0,
            "must be at least 1",
        ));
    }

    if file.devices.is_empty() {
        errors.push(ConfigError::invalid(
            "devices",
            "[]",
            "at least one device is required",
        ));
    }

    for (d, device) in file.devices.iter().enumerate() {
        let base = format!("devices[{}]", d);

        if device.channel_count == 0 || device.channel_count > MAX_CHANNEL_COUNT {
            errors.push(ConfigError::invalid(
                format!("{}.channel_count", base),
                device.channel_count,
                format!("must be between 1 and {}", MAX_CHANNEL_COUNT),
            ));
            // Index checks below would be noise against a bogus count
            continue;
        }

        if device.master_channel >= device.channel_count {
            errors.push(ConfigError::invalid(
                format!("{}.master_channel", base),
                device.master_channel,
                format!("must be < channel_count ({})", device.channel_count),
            ));
        }

        let mut seen = HashSet::new();
        for (c, entry) in device.channels.iter().enumerate() {
            let entry_path = format!("{}.channels[{}]", base, c);

            if entry.index >= device.channel_count {
                errors.push(ConfigError::invalid(
                    format!("{}.index", entry_path),
                    entry.index,
                    format!("must be < channel_count ({})", device.channel_count),
                ));
            } else if !seen.insert(entry.index) {
                errors.push(ConfigError::invalid(
                    format!("{}.index", entry_path),
                    entry.index,
                    "duplicate channel index",
                ));
            }

            if let Some(vacuum_index) = entry.vacuum_index {
                if vacuum_index >= device.channel_count {
                    errors.push(ConfigError::invalid(
                        format!("{}.vacuum_index", entry_path),
                        vacuum_index,
                        format!("must be < channel_count ({})", device.channel_count),
                    ));
                }
            }
        }

        for index in 0..device.channel_count {
            let config = device.resolve_channel(index);
            if let Err(mut channel_errors) =
                validate_channel(&config, &format!("{}.channel[{}]", base, index))
            {
                errors.append(&mut channel_errors);
            }
        }
    }

    if let Some(sim) = &file.simulation {
        if sim.slew_rate_v_per_s <= 0.0 || !sim.slew_rate_v_per_s.is_finite() {
            errors.push(ConfigError::invalid(
                "simulation.slew_rate_v_per_s",
                sim.slew_rate_v_per_s,
                "must be a finite number > 0",
            ));
        }
        if sim.poll_period_ms == 0 {
            errors.push(ConfigError::invalid(
                "simulation.poll_period_ms",
                0,
                "must be at least 1",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
