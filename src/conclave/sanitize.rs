//! Redaction of credential-shaped substrings and home-directory paths from
//! outgoing error and log text.
//!
//! Every [`EngineError`](crate::conclave::error::EngineError) passes its
//! `Display` output through [`sanitize`] before it is attached to a trace
//! step or surfaced to a caller, so a backend error that happens to echo
//! back an API key never ends up in a log line or a dumped trace.

use std::sync::OnceLock;

fn credential_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r#"(?i)([A-Za-z_]*(?:key|token|secret|password|credential)[A-Za-z_]*)\s*=\s*[^\s&"',]+"#,
        )
        .expect("static regex")
    })
}

fn bearer_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r#"(?i)\bbearer\s+\S+"#).expect("static regex"))
}

fn unix_home_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r#"(/(?:home|Users)/)([^/\s]+)"#).expect("static regex"))
}

fn windows_home_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r#"([A-Za-z]:\\Users\\)([^\\\s]+)"#).expect("static regex"))
}

/// Redact credential-like `key=VAL` / `token=VAL` pairs, `bearer <token>`
/// headers, and home-directory user segments from `text`.
pub fn sanitize(text: &str) -> String {
    let text = credential_re().replace_all(text, "$1=***");
    let text = bearer_re().replace_all(&text, "bearer ***");
    let text = unix_home_re().replace_all(&text, "$1***");
    let text = windows_home_re().replace_all(&text, "$1***");
    text.into_owned()
}
