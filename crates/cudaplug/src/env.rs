use std::env;
use std::sync::OnceLock;

static CUDAPLUG_DEVICE_ID: OnceLock<Option<String>> = OnceLock::new();
static CUDAPLUG_OPERATION_BENCHMARK: OnceLock<Option<bool>> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

/// Raw `CUDAPLUG_DEVICE_ID`, read once per process.
pub(crate) fn device_id() -> Option<&'static str> {
    CUDAPLUG_DEVICE_ID
        .get_or_init(|| non_empty_var("CUDAPLUG_DEVICE_ID"))
        .as_deref()
}

pub(crate) fn operation_benchmark() -> Option<bool> {
    *CUDAPLUG_OPERATION_BENCHMARK
        .get_or_init(|| non_empty_var("CUDAPLUG_OPERATION_BENCHMARK").map(|v| parse_bool(&v)))
}
