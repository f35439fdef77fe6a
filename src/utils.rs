use std::env::var;

/// Read an environment variable, falling back when it is unset or empty
pub fn env_var_or_else(name: &'static str, fallback: impl FnOnce() -> String) -> String {
    match var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback(),
    }
}
