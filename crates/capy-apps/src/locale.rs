//! Locale matching for localized desktop-entry keys.
//!
//! Keys like `Name[zh_CN]` are matched against the process locale with the
//! freedesktop fallback chain: `lang_COUNTRY@MODIFIER`, `lang_COUNTRY`,
//! `lang@MODIFIER`, `lang`, then the unsuffixed key.

/// A locale broken into its desktop-entry-relevant parts.
/// The encoding part (`.UTF-8`) is never significant for key matching.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Locale {
    pub lang: String,
    pub country: Option<String>,
    pub modifier: Option<String>,
}

impl Locale {
    /// Parse a POSIX locale string, e.g. `zh_CN.UTF-8@mod` or `sr@latin`.
    pub fn parse(raw: &str) -> Self {
        let mut rest = raw;

        let modifier = match rest.split_once('@') {
            Some((head, m)) => {
                rest = head;
                Some(m.to_string()).filter(|m| !m.is_empty())
            }
            None => None,
        };

        // Encoding sits between country and modifier; drop it.
        let rest = rest.split_once('.').map(|(head, _)| head).unwrap_or(rest);

        let (lang, country) = match rest.split_once('_') {
            Some((l, c)) => (l.to_string(), Some(c.to_string()).filter(|c| !c.is_empty())),
            None => (rest.to_string(), None),
        };

        Locale {
            lang,
            country,
            modifier,
        }
    }

    /// Read the process locale from `LC_ALL`, `LC_MESSAGES` or `LANG`.
    pub fn from_env() -> Self {
        for var in ["LC_ALL", "LC_MESSAGES", "LANG"] {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() && value != "C" && value != "POSIX" {
                    return Self::parse(&value);
                }
            }
        }
        Locale::default()
    }

    /// Key suffixes to try, most specific first. The unsuffixed key is the
    /// caller's final fallback and is not included.
    pub fn candidates(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(4);
        if self.lang.is_empty() {
            return out;
        }

        if let (Some(country), Some(modifier)) = (&self.country, &self.modifier) {
            out.push(format!("{}_{}@{}", self.lang, country, modifier));
        }
        if let Some(country) = &self.country {
            out.push(format!("{}_{}", self.lang, country));
        }
        if let Some(modifier) = &self.modifier {
            out.push(format!("{}@{}", self.lang, modifier));
        }
        out.push(self.lang.clone());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_locale() {
        let locale = Locale::parse("zh_CN.UTF-8@stroke");
        assert_eq!(locale.lang, "zh");
        assert_eq!(locale.country.as_deref(), Some("CN"));
        assert_eq!(locale.modifier.as_deref(), Some("stroke"));
    }

    #[test]
    fn parses_lang_only() {
        let locale = Locale::parse("de");
        assert_eq!(locale.lang, "de");
        assert_eq!(locale.country, None);
        assert_eq!(locale.modifier, None);
    }

    #[test]
    fn candidate_order_is_most_specific_first() {
        let locale = Locale::parse("sr_RS@latin");
        assert_eq!(
            locale.candidates(),
            vec!["sr_RS@latin", "sr_RS", "sr@latin", "sr"]
        );
    }

    #[test]
    fn candidates_without_country_or_modifier() {
        assert_eq!(Locale::parse("fr").candidates(), vec!["fr"]);
        assert!(Locale::default().candidates().is_empty());
    }
}
