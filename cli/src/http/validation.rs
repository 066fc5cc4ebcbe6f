//! 基础请求验证逻辑

use super::models::HttpServerError;

pub const MAX_TASK_ID_LEN: usize = 255;

/// 验证task_id格式（字母数字、`-`、`_`、`.`、`:`）
pub fn validate_task_id(task_id: &str) -> Result<(), HttpServerError> {
    if task_id.is_empty() {
        return Err(HttpServerError::InvalidRequest(
            "Task ID cannot be empty".to_string(),
        ));
    }

    if task_id.len() > MAX_TASK_ID_LEN {
        return Err(HttpServerError::InvalidRequest(format!(
            "Task ID too long ({} chars, max {MAX_TASK_ID_LEN})",
            task_id.len()
        )));
    }

    if !task_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(HttpServerError::InvalidRequest(
            "Task ID can only contain alphanumeric, '-', '_', '.' and ':' characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_task_id_success() {
        assert!(validate_task_id("3f9c2a1e-8b7d-4c6a-9e5f-0a1b2c3d4e5f").is_ok());
        assert!(validate_task_id("celery:task_1.retry").is_ok());
    }

    #[test]
    fn test_validate_task_id_empty() {
        assert!(validate_task_id("").is_err());
    }

    #[test]
    fn test_validate_task_id_too_long() {
        assert!(validate_task_id(&"a".repeat(MAX_TASK_ID_LEN)).is_ok());
        assert!(validate_task_id(&"a".repeat(MAX_TASK_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_task_id_invalid_chars() {
        for bad in ["a/b", "../etc", "id with space", "tâche", "x*"] {
            assert!(validate_task_id(bad).is_err(), "{bad} should be rejected");
        }
    }
}
