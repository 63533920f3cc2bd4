//! English pluralization for set, navigation and join table names.

/// Irregular singular/plural pairs, matched case-insensitively.
const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
    ("ox", "oxen"),
];

/// Words with the same singular and plural form.
const UNCOUNTABLE: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "deer",
    "news",
    "data",
    "media",
    "metadata",
];

/// Pluralize a PascalCase or camelCase name.
///
/// Only the last word is inflected, so `OrderLine` becomes `OrderLines`
/// and `SalesPerson` becomes `SalesPeople`.
pub fn pluralize(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let split = last_word_start(name);
    let (head, word) = name.split_at(split);
    format!("{}{}", head, pluralize_word(word))
}

fn last_word_start(name: &str) -> usize {
    name.char_indices()
        .skip(1)
        .filter(|(_, c)| c.is_ascii_uppercase())
        .map(|(i, _)| i)
        .last()
        .unwrap_or(0)
}

fn pluralize_word(word: &str) -> String {
    let lower = word.to_ascii_lowercase();

    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return match_case(word, plural);
    }

    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) && !stem.is_empty() {
            return format!("{}ies", &word[..word.len() - 1]);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

fn match_case(original: &str, plural: &str) -> String {
    match original.chars().next() {
        Some(c) if c.is_ascii_uppercase() => {
            let mut out = plural[..1].to_ascii_uppercase();
            out.push_str(&plural[1..]);
            out
        }
        _ => plural.to_string(),
    }
}
