//! Error Classifier (§4.1): maps a raw source-adapter failure into a
//! structured [`ApiError`]. Pure and deterministic given its inputs and the
//! configuration-driven substring tables (invariant/law L3); never panics.

use recon_core::model::{ApiError, ErrorCategory};

/// Substring patterns consulted when no HTTP code is available (§4.1 step 2).
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// HTTP codes treated as non-retryable, non-reformulable failures.
    pub unfixable_http_codes: Vec<u16>,
    /// HTTP codes treated as validation errors eligible for reformulation.
    pub fixable_http_codes: Vec<u16>,
    /// Case-insensitive substrings that indicate a timeout.
    pub timeout_patterns: Vec<String>,
    /// Case-insensitive substrings that indicate a rate limit.
    pub rate_limit_patterns: Vec<String>,
    /// Case-insensitive substrings that indicate a network/DNS failure.
    pub network_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            unfixable_http_codes: vec![401, 403, 404, 429, 500, 502, 503, 504],
            fixable_http_codes: vec![400, 422],
            timeout_patterns: vec![
                "timed out".into(),
                "timeout".into(),
                "read timed out".into(),
            ],
            rate_limit_patterns: vec![
                "rate limit".into(),
                "429".into(),
                "quota".into(),
                "too many requests".into(),
                "throttl".into(),
            ],
            network_patterns: vec![
                "connection refused".into(),
                "dns".into(),
                "name resolution".into(),
                "could not connect".into(),
            ],
        }
    }
}

/// Classifies a raw failure into a structured [`ApiError`] (§4.1).
#[must_use]
pub fn classify(
    config: &ClassifierConfig,
    message: &str,
    http_code: Option<u16>,
    source_id: &str,
) -> ApiError {
    if let Some(code) = http_code {
        return classify_http(config, code, message, source_id);
    }
    classify_message(config, message, source_id)
}

fn classify_http(config: &ClassifierConfig, code: u16, message: &str, source_id: &str) -> ApiError {
    let (category, is_retryable, is_reformulable) = match code {
        401 | 403 => (ErrorCategory::Authentication, false, false),
        404 => (ErrorCategory::NotFound, false, false),
        429 => (ErrorCategory::RateLimit, true, false),
        400 | 422 => (ErrorCategory::Validation, false, true),
        500 | 502 | 503 | 504 => (ErrorCategory::ServerError, true, false),
        _ if config.fixable_http_codes.contains(&code) => (ErrorCategory::Validation, false, true),
        _ if config.unfixable_http_codes.contains(&code) => {
            (ErrorCategory::Unknown, false, false)
        }
        _ => (ErrorCategory::Unknown, false, false),
    };

    ApiError {
        http_code: Some(code),
        category,
        message: message.to_string(),
        is_retryable,
        is_reformulable,
        source_id: source_id.to_string(),
    }
}

fn classify_message(config: &ClassifierConfig, message: &str, source_id: &str) -> ApiError {
    let lower = message.to_lowercase();

    let (category, is_retryable, is_reformulable) = if matches_any(&lower, &config.timeout_patterns)
    {
        (ErrorCategory::Timeout, true, false)
    } else if matches_any(&lower, &config.rate_limit_patterns) {
        (ErrorCategory::RateLimit, true, false)
    } else if matches_any(&lower, &config.network_patterns) {
        (ErrorCategory::Network, true, false)
    } else {
        (ErrorCategory::Unknown, false, false)
    };

    ApiError {
        http_code: None,
        category,
        message: message.to_string(),
        is_retryable,
        is_reformulable,
        source_id: source_id.to_string(),
    }
}

fn matches_any(haystack: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| haystack.contains(pattern.as_str()))
}
