/// Compares captured output with the expected output, if one was given
///
/// Both sides are trimmed of surrounding whitespace and then compared
/// exactly. Inner whitespace, line endings and number formatting must match.
pub fn evaluate(actual_output: &str, expected_output: Option<&str>) -> Option<bool> {
    expected_output.map(|expected| actual_output.trim() == expected.trim())
}
