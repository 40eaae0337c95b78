use super::{StoreError, StoreResult};

pub const MAX_COMMAND_NAME_LEN: usize = 50;
pub const MAX_RANK_NAME_LEN: usize = 50;
pub const MAX_IDENTITY_LEN: usize = 128;

/// Command names: ascii letters, digits, `_` and `-`.
pub fn validate_command_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidInput(
            "command name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_COMMAND_NAME_LEN {
        return Err(StoreError::InvalidInput(format!(
            "command name too long (max {MAX_COMMAND_NAME_LEN} characters)"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StoreError::InvalidInput(format!(
            "command name {name:?} contains invalid characters"
        )));
    }
    Ok(())
}

/// Rank names: lowercase ascii letters, digits and `_`.
pub fn validate_rank_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidInput(
            "rank name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_RANK_NAME_LEN {
        return Err(StoreError::InvalidInput(format!(
            "rank name too long (max {MAX_RANK_NAME_LEN} characters)"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(StoreError::InvalidInput(format!(
            "rank name {name:?} must use lowercase letters, digits or underscores"
        )));
    }
    Ok(())
}

/// Entries of a rank's command set: the wildcard or valid, lowercase command names.
///
/// Dispatched names are lowercased, so an uppercase entry could never match.
pub fn validate_rank_commands(commands: &[String]) -> StoreResult<()> {
    for cmd in commands {
        if cmd == super::WILDCARD {
            continue;
        }
        validate_command_name(cmd)?;
        if cmd.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(StoreError::InvalidInput(format!(
                "command name {cmd:?} in a rank must be lowercase"
            )));
        }
    }
    Ok(())
}

pub fn validate_identity(kind: &str, id: &str) -> StoreResult<()> {
    if id.trim().is_empty() {
        return Err(StoreError::InvalidInput(format!("{kind} id cannot be empty")));
    }
    if id.len() > MAX_IDENTITY_LEN {
        return Err(StoreError::InvalidInput(format!("{kind} id too long")));
    }
    Ok(())
}
