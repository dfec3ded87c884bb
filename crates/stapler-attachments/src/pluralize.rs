//! English pluralization for the `:attachment` placeholder

/// Singular to plural transform
pub trait Pluralizer: Send + Sync {
    fn plural(&self, word: &str) -> String;
}

const UNCOUNTABLE: &[&str] = &[
    "audio",
    "data",
    "deer",
    "equipment",
    "feedback",
    "fish",
    "information",
    "media",
    "metadata",
    "money",
    "news",
    "rice",
    "series",
    "sheep",
    "species",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("child", "children"),
    ("foot", "feet"),
    ("goose", "geese"),
    ("man", "men"),
    ("mouse", "mice"),
    ("ox", "oxen"),
    ("person", "people"),
    ("tooth", "teeth"),
    ("woman", "women"),
];

/// Words ending in `o` that take `es`
const O_ES: &[&str] = &["echo", "hero", "potato", "tomato", "veto"];

/// Rule-based English pluralizer.
///
/// Compound snake_case names pluralize their last word only, so
/// `profile_photo` becomes `profile_photos`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnglishPluralizer;

impl EnglishPluralizer {
    pub fn new() -> Self {
        Self
    }

    fn plural_word(word: &str) -> String {
        let lower = word.to_ascii_lowercase();

        if UNCOUNTABLE.contains(&lower.as_str()) {
            return word.to_string();
        }

        if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
            return match_capitalization(word, plural);
        }

        if O_ES.contains(&lower.as_str()) {
            return format!("{}es", word);
        }

        if let Some(stem) = lower.strip_suffix("sis") {
            return format!("{}ses", &word[..stem.len()]);
        }

        if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
            return format!("{}es", word);
        }

        if let Some(stem) = lower.strip_suffix('y') {
            if stem.chars().last().map_or(false, |c| !is_vowel(c)) {
                return format!("{}ies", &word[..stem.len()]);
            }
        }

        if let Some(stem) = lower.strip_suffix("fe") {
            if !stem.ends_with('f') && !stem.is_empty() {
                return format!("{}ves", &word[..stem.len()]);
            }
        }

        if lower.ends_with("lf") || lower.ends_with("rf") {
            return format!("{}ves", &word[..word.len() - 1]);
        }

        format!("{}s", word)
    }
}

impl Pluralizer for EnglishPluralizer {
    fn plural(&self, word: &str) -> String {
        if word.is_empty() {
            return String::new();
        }

        match word.rfind('_') {
            Some(pos) => format!("{}{}", &word[..=pos], Self::plural_word(&word[pos + 1..])),
            None => Self::plural_word(word),
        }
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

fn match_capitalization(original: &str, replacement: &str) -> String {
    if original.chars().next().map_or(false, char::is_uppercase) {
        let mut chars = replacement.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    } else {
        replacement.to_string()
    }
}
