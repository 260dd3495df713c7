//! Connection-string settings
//!
//! Subscribers describe a subscription with a `key=value; key=value` blob. A value
//! may be wrapped in braces to carry nested `;` or `=` characters, e.g.
//! `assemblyInfo={source=MySubscriber; version=1.0.0.0}`.

/// Parsed connection-string settings with case-insensitive keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    entries: Vec<(String, String)>,
}

impl Settings {
    /// Parse a settings blob. Segments without a key are ignored.
    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();

        for segment in split_top_level(text, ';') {
            let Some((key, value)) = split_key_value(segment) else {
                continue;
            };

            let key = key.trim();
            if key.is_empty() {
                continue;
            }

            let value = strip_braces(value.trim()).to_string();

            // Last assignment wins
            entries.retain(|(existing, _)| !existing.eq_ignore_ascii_case(key));
            entries.push((key.to_string(), value));
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(parse_boolean)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lenient boolean parsing used for subscriber settings
pub fn parse_boolean(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1" | "t" | "y"
    )
}

fn split_top_level(text: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            c if c == delimiter && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    parts.push(&text[start..]);
    parts
}

fn split_key_value(segment: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;

    for (i, c) in segment.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some((&segment[..i], &segment[i + 1..])),
            _ => {}
        }
    }

    None
}

fn strip_braces(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('{') && value.ends_with('}') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
