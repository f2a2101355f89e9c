//! Input checks and normalization for stored records and log lookups.

use chrono::NaiveDate;

use crate::error::{AppError, Result};
use crate::hardware::HardwareType;
use crate::instance::InstanceConfig;

/// Accepts ids of the form `<hardware type>_<n>` with `n >= 1`.
pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    let valid = instance_id
        .rsplit_once('_')
        .is_some_and(|(prefix, n)| {
            prefix.parse::<HardwareType>().is_ok()
                && !n.is_empty()
                && n.chars().all(|c| c.is_ascii_digit())
                && n.parse::<u64>().is_ok_and(|n| n > 0)
        });

    if !valid {
        return Err(AppError::validation(format!(
            "Invalid instance id: {}",
            instance_id
        )));
    }
    Ok(())
}

/// Trims a display name and rejects blank ones.
pub fn normalize_name(name: &str, label: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{} is required", label)));
    }
    Ok(trimmed.to_string())
}

/// Trims every command; the list must be non-empty and contain no blank entries.
pub fn normalize_commands(commands: &[String]) -> Result<Vec<String>> {
    if commands.is_empty() {
        return Err(AppError::validation("At least one command is required"));
    }

    commands
        .iter()
        .enumerate()
        .map(|(i, command)| {
            let trimmed = command.trim();
            if trimmed.is_empty() {
                Err(AppError::validation(format!("Command {} is blank", i + 1)))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

/// Checks numeric ranges and normalizes the port and command list.
pub fn normalize_instance_config(config: InstanceConfig) -> Result<InstanceConfig> {
    let port = config.port.trim();
    if port.is_empty() {
        return Err(AppError::validation("Port is required"));
    }
    if config.baud_rate == 0 {
        return Err(AppError::validation("Baud rate must be positive"));
    }
    if config.num_cycles == 0 {
        return Err(AppError::validation("Number of cycles must be positive"));
    }
    if !config.command_delay.is_finite() || config.command_delay < 0.0 {
        return Err(AppError::validation(
            "Command delay must be a non-negative number of seconds",
        ));
    }

    Ok(InstanceConfig {
        port: port.to_string(),
        commands: normalize_commands(&config.commands)?,
        ..config
    })
}

/// Log directories are named `YYYY-MM-DD`.
pub fn validate_log_date(date: &str) -> Result<()> {
    if date.len() != 10 || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(AppError::validation(format!("Invalid log date: {}", date)));
    }
    Ok(())
}
