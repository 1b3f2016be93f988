//! English pluralization for the type-name / service-name convention.
//!
//! Only the last segment of a compound name is inflected, so `blog-post`
//! pairs with `blog-posts` and `user_profile` with `user_profiles`.

use std::collections::HashMap;

use syncwire_config::NamingConfig;

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
    ("ox", "oxen"),
    ("movie", "movies"),
    ("cookie", "cookies"),
];

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
    "police",
];

const O_ES: &[&str] = &["buffalo", "tomato", "hero", "potato", "echo", "veto"];

/// Pluralizer with a built-in irregular table, extensible from configuration.
#[derive(Debug, Clone)]
pub struct Inflector {
    plurals: HashMap<String, String>,
    singulars: HashMap<String, String>,
}

impl Default for Inflector {
    fn default() -> Self {
        let mut inflector = Self {
            plurals: HashMap::new(),
            singulars: HashMap::new(),
        };
        for (singular, plural) in IRREGULAR {
            inflector.add_irregular(singular, plural);
        }
        inflector
    }
}

impl Inflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default rules plus the configured irregular pairs.
    pub fn from_config(naming: &NamingConfig) -> Self {
        let mut inflector = Self::default();
        for (singular, plural) in &naming.irregular {
            inflector.add_irregular(singular, plural);
        }
        inflector
    }

    #[must_use]
    pub fn with_irregular(mut self, singular: &str, plural: &str) -> Self {
        self.add_irregular(singular, plural);
        self
    }

    fn add_irregular(&mut self, singular: &str, plural: &str) {
        self.plurals.insert(singular.to_lowercase(), plural.to_lowercase());
        self.singulars.insert(plural.to_lowercase(), singular.to_lowercase());
    }

    pub fn pluralize(&self, name: &str) -> String {
        let (prefix, word) = split_last_segment(name);
        format!("{prefix}{}", self.pluralize_word(word))
    }

    pub fn singularize(&self, name: &str) -> String {
        let (prefix, word) = split_last_segment(name);
        format!("{prefix}{}", self.singularize_word(word))
    }

    fn pluralize_word(&self, word: &str) -> String {
        let lower = word.to_lowercase();
        if word.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
            return word.to_string();
        }
        if let Some(plural) = self.plurals.get(&lower) {
            return plural.clone();
        }
        if self.singulars.contains_key(&lower) {
            return word.to_string();
        }

        if let Some(stem) = lower.strip_suffix("quiz") {
            return format!("{stem}quizzes");
        }
        for (suffix, replacement) in [("matrix", "matrices"), ("vertex", "vertices"), ("index", "indices")] {
            if let Some(stem) = lower.strip_suffix(suffix) {
                return format!("{stem}{replacement}");
            }
        }
        if ["x", "ch", "ss", "sh", "s", "z"].iter().any(|s| lower.ends_with(s)) {
            return format!("{word}es");
        }
        if let Some(stem) = lower.strip_suffix('y') {
            if ends_with_consonant(stem) || stem.ends_with("qu") {
                return format!("{stem}ies");
            }
        }
        if let Some(stem) = lower.strip_suffix("fe") {
            if !stem.ends_with('f') {
                return format!("{stem}ves");
            }
        }
        if let Some(stem) = lower.strip_suffix('f') {
            if stem.ends_with('l') || stem.ends_with('r') {
                return format!("{stem}ves");
            }
        }
        if O_ES.contains(&lower.as_str()) {
            return format!("{word}es");
        }
        format!("{word}s")
    }

    fn singularize_word(&self, word: &str) -> String {
        let lower = word.to_lowercase();
        if word.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
            return word.to_string();
        }
        if let Some(singular) = self.singulars.get(&lower) {
            return singular.clone();
        }
        if self.plurals.contains_key(&lower) {
            return word.to_string();
        }

        if let Some(stem) = lower.strip_suffix("quizzes") {
            return format!("{stem}quiz");
        }
        for (suffix, replacement) in [("matrices", "matrix"), ("vertices", "vertex"), ("indices", "index")] {
            if let Some(stem) = lower.strip_suffix(suffix) {
                return format!("{stem}{replacement}");
            }
        }
        if let Some(stem) = lower.strip_suffix("ies") {
            if !stem.is_empty() {
                return format!("{stem}y");
            }
        }
        if let Some(stem) = lower.strip_suffix("ves") {
            if stem.ends_with('l') || stem.ends_with('r') {
                return format!("{stem}f");
            }
            if stem.ends_with('i') {
                return format!("{stem}fe");
            }
        }
        for suffix in ["xes", "ches", "sses", "shes", "zzes", "tzes"] {
            if lower.ends_with(suffix) {
                return word[..word.len() - 2].to_string();
            }
        }
        if let Some(stem) = lower.strip_suffix("uses") {
            if ends_with_consonant(stem) {
                return format!("{stem}us");
            }
        }
        if let Some(stem) = lower.strip_suffix("oes") {
            if O_ES.contains(&format!("{stem}o").as_str()) {
                return format!("{stem}o");
            }
        }
        if lower.ends_with("ss") {
            return word.to_string();
        }
        match word.strip_suffix('s') {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => word.to_string(),
        }
    }
}

fn split_last_segment(name: &str) -> (&str, &str) {
    match name.rfind(['-', '_', '/']) {
        Some(at) => name.split_at(at + 1),
        None => ("", name),
    }
}

fn ends_with_consonant(stem: &str) -> bool {
    stem.chars()
        .last()
        .is_some_and(|c| c.is_ascii_alphabetic() && !"aeiou".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use test_case::test_case;

    #[test_case("post", "posts")]
    #[test_case("comment", "comments")]
    #[test_case("category", "categories")]
    #[test_case("day", "days")]
    #[test_case("box", "boxes")]
    #[test_case("church", "churches")]
    #[test_case("address", "addresses")]
    #[test_case("status", "statuses")]
    #[test_case("house", "houses")]
    #[test_case("quiz", "quizzes")]
    #[test_case("knife", "knives")]
    #[test_case("wolf", "wolves")]
    #[test_case("hero", "heroes")]
    #[test_case("photo", "photos")]
    #[test_case("person", "people")]
    #[test_case("child", "children")]
    #[test_case("movie", "movies")]
    #[test_case("index", "indices")]
    #[test_case("sheep", "sheep")]
    #[test_case("blog-post", "blog-posts")]
    #[test_case("user_profile", "user_profiles")]
    #[test_case("admin/person", "admin/people")]
    fn pluralizes_and_singularizes(singular: &str, plural: &str) {
        let inflector = Inflector::new();
        assert_eq!(inflector.pluralize(singular), plural);
        assert_eq!(inflector.singularize(plural), singular);
    }

    #[test]
    fn already_inflected_words_are_stable() {
        let inflector = Inflector::new();
        assert_eq!(inflector.pluralize("people"), "people");
        assert_eq!(inflector.singularize("person"), "person");
        assert_eq!(inflector.singularize("post"), "post");
        assert_eq!(inflector.singularize("boss"), "boss");
        assert_eq!(inflector.singularize(""), "");
    }

    #[test]
    fn irregulars_from_config() {
        let mut irregular = BTreeMap::new();
        irregular.insert("cactus".to_string(), "cacti".to_string());
        let inflector = Inflector::from_config(&NamingConfig { irregular });

        assert_eq!(inflector.pluralize("cactus"), "cacti");
        assert_eq!(inflector.singularize("cacti"), "cactus");
        assert_eq!(
            Inflector::new().with_irregular("datum", "data").singularize("data"),
            "datum"
        );
    }
}
