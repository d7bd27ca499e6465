//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest in-game name accepted for a binding.
const MAX_PLAYER_NAME: usize = 32;

/// Validates that a chat group id is a non-empty run of ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_group_id("123456") // Ok
/// validate_group_id("12a")    // Err - not numeric
/// ```
pub fn validate_group_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("group_id_format");
        err.message = Some("Group ID must contain only digits".into());
        return Err(err);
    }
    Ok(())
}

/// Validates an in-game player name: no whitespace, at most 32 characters.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let length = name.chars().count();
    if length == 0 || length > MAX_PLAYER_NAME {
        let mut err = ValidationError::new("player_name_length");
        err.message = Some(
            format!("Player name must be 1 to {MAX_PLAYER_NAME} characters (got {length})").into(),
        );
        return Err(err);
    }
    if name.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("player_name_format");
        err.message = Some("Player name must not contain whitespace".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_group_id() {
        assert!(validate_group_id("123456").is_ok());
        assert!(validate_group_id("").is_err());
        assert!(validate_group_id("12a").is_err());
        assert!(validate_group_id(" 12").is_err());
    }

    #[test]
    fn test_validate_player_name() {
        assert!(validate_player_name("Alice_01").is_ok());
        assert!(validate_player_name("小明").is_ok());
        assert!(validate_player_name("").is_err());
        assert!(validate_player_name("two words").is_err());
        assert!(validate_player_name(&"x".repeat(33)).is_err());
    }
}
