//! User-facing copy for locally generated messages
//!
//! Only the strings the engine itself injects live here (welcome, error
//! bubbles). Everything else the user sees comes from the server already
//! localized.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lang {
    It,
    En,
}

impl Lang {
    /// Resolve a BCP 47-ish tag ("it", "it-IT", "en-US") to a supported
    /// language, defaulting to English.
    pub fn from_tag(tag: &str) -> Lang {
        let tag = tag.trim().to_ascii_lowercase();
        if tag == "it" || tag.starts_with("it-") {
            Lang::It
        } else {
            Lang::En
        }
    }
}

pub fn welcome(lang: Lang) -> &'static str {
    match lang {
        Lang::It => "Ciao! Sono Yuume, l'assistente del negozio. Come posso aiutarti oggi?",
        Lang::En => "Hi! I'm Yuume, the shop assistant. How can I help you today?",
    }
}

pub fn welcome_named(lang: Lang, first_name: &str) -> String {
    match lang {
        Lang::It => format!(
            "Ciao {}! Sono Yuume, l'assistente del negozio. Come posso aiutarti oggi?",
            first_name
        ),
        Lang::En => format!(
            "Hi {}! I'm Yuume, the shop assistant. How can I help you today?",
            first_name
        ),
    }
}

pub fn generic_send_error(lang: Lang) -> &'static str {
    match lang {
        Lang::It => "Ops, qualcosa non ha funzionato. Riprova tra qualche istante.",
        Lang::En => "Oops, something went wrong. Please try again in a moment.",
    }
}

pub fn session_expired(lang: Lang) -> &'static str {
    match lang {
        Lang::It => {
            "La sessione era scaduta, quindi ho aperto una nuova conversazione. Se qualcosa non torna, ricarica la pagina."
        }
        Lang::En => {
            "Your session had expired, so I started a new conversation. If anything looks off, reload the page."
        }
    }
}

pub fn missing_configuration(lang: Lang) -> &'static str {
    match lang {
        Lang::It => "Non riesco a contattare il negozio in questo momento. Ricarica la pagina per riprovare.",
        Lang::En => "I can't reach the shop right now. Reload the page to try again.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_regional_tags() {
        assert_eq!(Lang::from_tag("it"), Lang::It);
        assert_eq!(Lang::from_tag("it-IT"), Lang::It);
        assert_eq!(Lang::from_tag("IT"), Lang::It);
        assert_eq!(Lang::from_tag("en"), Lang::En);
        assert_eq!(Lang::from_tag("en-GB"), Lang::En);
    }

    #[test]
    fn unknown_tags_fall_back_to_english() {
        assert_eq!(Lang::from_tag("de"), Lang::En);
        assert_eq!(Lang::from_tag(""), Lang::En);
        assert_eq!(Lang::from_tag("italiano"), Lang::En);
    }

    #[test]
    fn personalized_welcome_contains_the_name() {
        let text = welcome_named(Lang::It, "Anna");
        assert!(text.starts_with("Ciao Anna!"));
    }
}
