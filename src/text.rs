//! Whitespace trimming and query-string encoding shared by parser and renderer.

/// How much whitespace to remove at one end of a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trim {
    /// Leave the text alone.
    Keep,
    /// Horizontal whitespace up to the nearest line break.
    Line,
    /// As `Line`, plus one adjacent line break.
    Newline,
    /// Every contiguous whitespace character, across lines.
    All,
}

impl Trim {
    /// Reads a marker that follows an opening `{%`; its last characters face
    /// the trimmed text.
    pub fn after_open(marker: &str, default: Trim) -> Trim {
        if marker.ends_with("---") {
            Trim::All
        } else if marker.ends_with("--") {
            Trim::Newline
        } else if marker.ends_with('-') {
            Trim::Line
        } else if marker.ends_with('+') {
            Trim::Keep
        } else {
            default
        }
    }

    /// Reads a marker that precedes a closing `%}`; its first characters face
    /// the trimmed text.
    pub fn before_close(marker: &str, default: Trim) -> Trim {
        if marker.starts_with("---") {
            Trim::All
        } else if marker.starts_with("--") {
            Trim::Newline
        } else if marker.starts_with('-') {
            Trim::Line
        } else if marker.starts_with('+') {
            Trim::Keep
        } else {
            default
        }
    }
}

fn is_horizontal(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0B' | '\x0C')
}

pub fn trim_start(text: &str, trim: Trim) -> &str {
    match trim {
        Trim::Keep => text,
        Trim::Line => text.trim_start_matches(is_horizontal),
        Trim::Newline => {
            let text = text.trim_start_matches(is_horizontal);
            ["\r\n", "\n\r", "\n", "\r"]
                .iter()
                .find_map(|nl| text.strip_prefix(nl))
                .unwrap_or(text)
        }
        Trim::All => text.trim_start(),
    }
}

pub fn trim_end(text: &str, trim: Trim) -> &str {
    match trim {
        Trim::Keep => text,
        Trim::Line => text.trim_end_matches(is_horizontal),
        Trim::Newline => {
            let text = text.trim_end_matches(is_horizontal);
            ["\r\n", "\n\r", "\n", "\r"]
                .iter()
                .find_map(|nl| text.strip_suffix(nl))
                .unwrap_or(text)
        }
        Trim::All => text.trim_end(),
    }
}

/// Encodes `text` as a query-language string expression: every line single
/// quoted with quotes doubled, lines joined through a newline byte literal.
pub fn quote(text: &str) -> String {
    text.split('\n')
        .map(|line| format!("'{}'", line.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(" || x'0a' || ")
}

/// Doubles `%` so literal text survives `printf` substitution.
pub fn escape_percent(text: &str) -> String {
    text.replace('%', "%%")
}
