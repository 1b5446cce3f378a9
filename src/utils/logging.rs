use serde::Serialize;

/// Renders `value` as pretty JSON and hands it to `log_action`, but only when
/// DEBUG is enabled; serialization is skipped otherwise.
pub(crate) fn with_pretty_json_debug<T, F>(value: &T, log_action: F)
where
    T: Serialize + ?Sized,
    F: FnOnce(&str),
{
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let pretty_json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|error| format!("<report serialization failed: {error}>"));
    log_action(pretty_json.as_str());
}
