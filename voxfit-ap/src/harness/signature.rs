//! Device-format error signatures in service diagnostics

/// Substrings that mark a device sample-format failure.
///
/// `-9997` is the audio backend's numeric code for an invalid sample rate.
pub const FORMAT_ERROR_SIGNATURES: [&str; 2] = ["Invalid sample rate", "-9997"];

/// True when `line` contains any format-error signature (case-sensitive)
pub fn matches_format_error(line: &str) -> bool {
    FORMAT_ERROR_SIGNATURES.iter().any(|sig| line.contains(sig))
}

/// Lines worth surfacing as warnings: they mention both "error" and "sample"
pub fn is_sample_warning(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("error") && lower.contains("sample")
}
