/// Formats a duration for `<itunes:duration>`.
///
/// `H:MM:SS` when at least an hour long, `M:SS` otherwise.
///
/// # Examples
///
/// ```
/// use castfeed::util::format_duration;
///
/// assert_eq!(format_duration(0), "0:00");
/// assert_eq!(format_duration(125), "2:05");
/// assert_eq!(format_duration(3600), "1:00:00");
/// ```
pub fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Returns the first character that XML 1.0 does not allow in a document.
///
/// Escaping cannot fix these (`&#1;` is still illegal), so text containing
/// one cannot be rendered at all.
pub fn find_invalid_xml_char(s: &str) -> Option<char> {
    s.chars().find(|&c| !is_xml_char(c))
}

// Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\u{9}' | '\u{A}' | '\u{D}'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}
