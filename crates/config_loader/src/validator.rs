//! 配置校验模块
//!
//! 校验规则：
//! - default_timeout_ms > 0，且不超过一小时
//! - async_queue_capacity > 0，且不超过 1_048_576

use contracts::{ContractError, DispatchConfig, Validate};

const MAX_TIMEOUT_MS: u64 = 60 * 60 * 1000;
const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// 校验 DispatchConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &DispatchConfig) -> Result<(), ContractError> {
    validate_derived(config)?;
    validate_timeout(config)?;
    validate_queue_capacity(config)?;
    Ok(())
}

/// derive(Validate) 声明的规则
fn validate_derived(config: &DispatchConfig) -> Result<(), ContractError> {
    let Err(errors) = config.validate() else {
        return Ok(());
    };

    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    match fields.first() {
        Some((field, errs)) => {
            let message = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' check", e.code))
                })
                .collect::<Vec<_>>()
                .join(", ");
            Err(ContractError::config_validation(field.to_string(), message))
        }
        None => Err(ContractError::config_validation("config", errors.to_string())),
    }
}

/// 校验超时上限
fn validate_timeout(config: &DispatchConfig) -> Result<(), ContractError> {
    if config.default_timeout_ms > MAX_TIMEOUT_MS {
        return Err(ContractError::config_validation(
            "default_timeout_ms",
            format!(
                "default_timeout_ms must be <= {MAX_TIMEOUT_MS}, got {}",
                config.default_timeout_ms
            ),
        ));
    }
    Ok(())
}

/// 校验后台队列容量上限
fn validate_queue_capacity(config: &DispatchConfig) -> Result<(), ContractError> {
    if config.async_queue_capacity > MAX_QUEUE_CAPACITY {
        return Err(ContractError::config_validation(
            "async_queue_capacity",
            format!(
                "async_queue_capacity must be <= {MAX_QUEUE_CAPACITY}, got {}",
                config.async_queue_capacity
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(validate(&DispatchConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_timeout_names_field() {
        let config = DispatchConfig {
            default_timeout_ms: 0,
            ..Default::default()
        };
        let err = validate(&config).unwrap_err();
        match err {
            ContractError::ConfigValidation { field, .. } => {
                assert_eq!(field, "default_timeout_ms")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let config = DispatchConfig {
            async_queue_capacity: 0,
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_excessive_timeout_rejected() {
        let config = DispatchConfig {
            default_timeout_ms: MAX_TIMEOUT_MS + 1,
            ..Default::default()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("default_timeout_ms"));
    }

    #[test]
    fn test_excessive_queue_capacity_rejected() {
        let config = DispatchConfig {
            async_queue_capacity: MAX_QUEUE_CAPACITY + 1,
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }
}
