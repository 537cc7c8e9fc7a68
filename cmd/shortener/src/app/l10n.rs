//! Interface strings in the supported languages.

use std::fmt;
use std::str::FromStr;

use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    En,
    Ru,
    Fr,
}

impl Language {
    pub fn name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ru => "Русский",
            Language::Fr => "Français",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ru" => Ok(Language::Ru),
            "fr" => Ok(Language::Fr),
            other => Err(format!("unsupported language {:?} (expected en, ru or fr)", other)),
        }
    }
}

/// `(english, russian, french)`; an empty cell falls back to English.
const TABLE: &[(&str, &str, &str)] = &[
    ("Shorten!", "Sokraryt'", "Raccourcir !"),
    ("URL", "Ssylka", "URL"),
    ("URL shortener", "Sokrashshyatel' ssylok", "Raccourcisseur d'URL"),
    ("Sign in", "Voyti", "Se connecter"),
    ("Sign up", "Zaregistrirovat'sya", "S'inscrire"),
    ("Sign out", "Vyyti", "Se déconnecter"),
    ("Email", "Pochta", "E-mail"),
    ("Password", "Parol'", "Mot de passe"),
    ("Repeat Password", "Povtorite parol'", "Répétez le mot de passe"),
    ("First Name", "Imya", "Prénom"),
    ("Last Name", "Familiya", "Nom"),
    ("Error", "Oshibka", "Erreur"),
    ("Short link", "Korotkaya ssylka", "Lien court"),
];

/// Translation of `s`, or `s` itself when there is none.
pub fn ls(lang: Language, s: &str) -> &str {
    if lang == Language::En {
        return s;
    }
    let found = TABLE.iter().find(|(en, _, _)| *en == s).map(|(_, ru, fr)| match lang {
        Language::Ru => *ru,
        _ => *fr,
    });
    match found {
        Some(t) if !t.is_empty() => t,
        _ => {
            error!("not localized {:?}", s);
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_is_identity() {
        assert_eq!(ls(Language::En, "anything at all"), "anything at all");
    }

    #[test]
    fn translated_and_fallback() {
        assert_eq!(ls(Language::Ru, "URL shortener"), "Sokrashshyatel' ssylok");
        assert_eq!(ls(Language::Fr, "Sign in"), "Se connecter");
        assert_eq!(ls(Language::Fr, "no such string"), "no such string");
    }

    #[test]
    fn parses_codes() {
        assert_eq!("RU".parse::<Language>(), Ok(Language::Ru));
        assert_eq!("fr".parse::<Language>().unwrap().to_string(), "Français");
        assert!("de".parse::<Language>().is_err());
    }
}
