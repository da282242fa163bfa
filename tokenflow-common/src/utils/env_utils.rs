use std::env;
use std::str::FromStr;

use crate::prelude::*;

pub struct EnvUtils;

impl EnvUtils {
    /// Prefix shared by every environment override the engine reads.
    pub const PREFIX: &'static str = "TOKENFLOW_";

    pub fn is_environment_variable(name: &str) -> bool {
        env::var_os(Self::key(name)).is_some()
    }

    /// Reads `TOKENFLOW_<name>` and parses it. Missing or unparsable values yield `None` so
    /// callers can fall back to their defaults.
    pub fn get_parsed<T: FromStr>(name: &str) -> Option<T> {
        let key = Self::key(name);
        match env::var(&key) {
            Ok(raw) => match raw.trim().parse::<T>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring unparsable value '{}' for {}", raw, key);
                    None
                }
            },
            Err(_) => None,
        }
    }

    fn key(name: &str) -> String {
        format!("{}{}", Self::PREFIX, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_rejects_overrides() {
        env::set_var("TOKENFLOW_ENV_UTILS_TEST_NUM", " 42 ");
        env::set_var("TOKENFLOW_ENV_UTILS_TEST_BAD", "forty-two");
        assert_eq!(EnvUtils::get_parsed::<u32>("ENV_UTILS_TEST_NUM"), Some(42));
        assert_eq!(EnvUtils::get_parsed::<u32>("ENV_UTILS_TEST_BAD"), None);
        assert_eq!(EnvUtils::get_parsed::<u32>("ENV_UTILS_TEST_MISSING"), None);
        assert!(EnvUtils::is_environment_variable("ENV_UTILS_TEST_NUM"));
    }
}
