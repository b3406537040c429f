//! Extracting suggestions from model output

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// A track the model proposed, not yet resolved to a playable uri
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suggestion {
    pub name: String,
    pub artist: String,
}

#[derive(Deserialize)]
struct RawSuggestion {
    #[serde(alias = "name", alias = "title")]
    n: String,
    #[serde(default, alias = "artist", alias = "artists")]
    a: String,
}

const EXCERPT_LEN: usize = 200;

/// Parse the first well-formed JSON array of `{n, a}` (or `{name, artist}`)
/// objects in `text`, ignoring any surrounding prose.
pub fn parse_suggestions(text: &str) -> Result<Vec<Suggestion>> {
    for (start, _) in text.match_indices('[') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Vec<RawSuggestion>>();
        if let Some(Ok(raw)) = stream.next() {
            return Ok(raw
                .into_iter()
                .filter(|s| !s.n.trim().is_empty())
                .map(|s| Suggestion {
                    name: s.n.trim().to_string(),
                    artist: s.a.trim().to_string(),
                })
                .collect());
        }
    }

    let excerpt: String = text.chars().take(EXCERPT_LEN).collect();
    Err(EngineError::MalformedSuggestion(excerpt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_is_found_inside_prose() {
        let text = r#"Sure! Here you go:
[{"n":"Midnight City","a":"M83"},{"n":"Electric Feel","a":"MGMT"}]
Enjoy the mix."#;
        let suggestions = parse_suggestions(text).unwrap();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].name, "Midnight City");
        assert_eq!(suggestions[1].artist, "MGMT");
    }

    #[test]
    fn long_field_names_are_accepted() {
        let text = r#"[{"name":"Dreams","artist":"Fleetwood Mac"}]"#;
        assert_eq!(
            parse_suggestions(text).unwrap(),
            vec![Suggestion {
                name: "Dreams".into(),
                artist: "Fleetwood Mac".into()
            }]
        );
    }

    #[test]
    fn bracketed_prose_before_the_array_is_skipped() {
        let text = r#"[k3x9qa] picks: [{"n":"Take On Me","a":"a-ha"}]"#;
        assert_eq!(parse_suggestions(text).unwrap()[0].artist, "a-ha");
    }

    #[test]
    fn text_without_an_array_is_malformed() {
        let err = parse_suggestions("I cannot help with that.").unwrap_err();
        assert!(matches!(err, EngineError::MalformedSuggestion(_)));
    }

    #[test]
    fn truncated_array_is_malformed() {
        let err = parse_suggestions(r#"[{"n":"Dreams","a":"Fleetwood"#).unwrap_err();
        assert!(matches!(err, EngineError::MalformedSuggestion(_)));
    }
}
