use crate::error::ConfigError;

/// Crate-wide mutex for tests that mutate process environment variables.
///
/// The process environment is global state shared across all threads.
/// Every `unsafe { set_var / remove_var }` call in tests MUST hold this lock.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Read an env var, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_option_env(key).map(|opt| opt.unwrap_or(default))
}

/// Parse a boolean from an env var with a default.
///
/// Accepts "true"/"1" as true, "false"/"0" as false.
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(s) => match s.to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("must be 'true' or 'false', got '{s}'"),
            }),
        },
        None => Ok(default),
    }
}

/// Parse an env var into `Option<T>`: `None` when unset, `Some(parsed)`
/// when set to a valid value.
pub(crate) fn parse_option_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
}

/// Parse a comma-separated list. Blank entries are skipped.
pub(crate) fn parse_list_env(key: &str) -> Result<Option<Vec<String>>, ConfigError> {
    Ok(optional_env(key)?.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_env_skips_blanks() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: guarded by ENV_MUTEX.
        unsafe { std::env::set_var("REQUEST_BOT_TEST_LIST", " -100, ,@feed ,") };
        let list = parse_list_env("REQUEST_BOT_TEST_LIST").unwrap();
        unsafe { std::env::remove_var("REQUEST_BOT_TEST_LIST") };

        assert_eq!(list, Some(vec!["-100".to_string(), "@feed".to_string()]));
    }

    #[test]
    fn test_invalid_number_names_the_key() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: guarded by ENV_MUTEX.
        unsafe { std::env::set_var("REQUEST_BOT_TEST_NUM", "soon") };
        let err = parse_optional_env::<u64>("REQUEST_BOT_TEST_NUM", 3).unwrap_err();
        unsafe { std::env::remove_var("REQUEST_BOT_TEST_NUM") };

        assert!(err.to_string().contains("REQUEST_BOT_TEST_NUM"));
    }

    #[test]
    fn test_empty_value_is_unset() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: guarded by ENV_MUTEX.
        unsafe { std::env::set_var("REQUEST_BOT_TEST_EMPTY", "  ") };
        let flag = parse_bool_env("REQUEST_BOT_TEST_EMPTY", true).unwrap();
        unsafe { std::env::remove_var("REQUEST_BOT_TEST_EMPTY") };

        assert!(flag);
    }
}
