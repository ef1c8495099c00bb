use crate::error::MirrorError;
use crate::types::Category;
use log::debug;
use std::collections::BTreeSet;
use url::Url;

/// What a requester asked for: `https://example.com img,css script`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub url: Url,
    pub categories: BTreeSet<Category>,
}

pub fn parse_message(text: &str) -> Result<ParsedRequest, MirrorError> {
    let mut words = text.split_whitespace();
    let raw_url = words
        .next()
        .ok_or_else(|| MirrorError::InvalidRequest("empty request, expected a URL".into()))?;

    if !raw_url.starts_with("http") {
        return Err(MirrorError::InvalidUrl(
            "the URL must start with 'http' or 'https'".into(),
        ));
    }
    let url = Url::parse(raw_url)?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(MirrorError::InvalidUrl(format!("{raw_url} is not an http(s) URL")));
    }

    let categories = parse_components(words)?;
    debug!("Parsed request for {} with {:?}", url, categories);
    Ok(ParsedRequest { url, categories })
}

/// Component words, separated by whitespace or commas. No words selects
/// everything.
pub fn parse_components<'a, I>(words: I) -> Result<BTreeSet<Category>, MirrorError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut categories = BTreeSet::new();
    for word in words
        .into_iter()
        .flat_map(|w| w.split(','))
        .map(str::trim)
        .filter(|w| !w.is_empty())
    {
        let category = parse_category(word).ok_or_else(|| {
            MirrorError::InvalidRequest(format!(
                "unknown component '{word}' (expected img, css, script, video, xml or html)"
            ))
        })?;
        categories.insert(category);
    }

    if categories.is_empty() {
        return Ok(Category::all());
    }
    Ok(categories)
}

pub fn parse_category(word: &str) -> Option<Category> {
    match word.to_ascii_lowercase().as_str() {
        "img" | "image" | "images" => Some(Category::Image),
        "css" | "link" | "links" => Some(Category::Link),
        "js" | "script" | "scripts" | "javascript" => Some(Category::Script),
        "video" | "videos" => Some(Category::Video),
        "xml" | "xmls" => Some(Category::Xml),
        "html" => Some(Category::Html),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(categories: &[Category]) -> BTreeSet<Category> {
        categories.iter().copied().collect()
    }

    #[test]
    fn url_alone_selects_everything() {
        let parsed = parse_message("https://www.example.com").unwrap();
        assert_eq!(parsed.url.as_str(), "https://www.example.com/");
        assert_eq!(parsed.categories, Category::all());
    }

    #[test]
    fn components_accept_commas_and_aliases() {
        let parsed = parse_message("https://www.google.com img,css script").unwrap();
        assert_eq!(
            parsed.categories,
            set(&[Category::Image, Category::Link, Category::Script])
        );

        let parsed = parse_message("http://x.test  JS , Videos,xml html").unwrap();
        assert_eq!(
            parsed.categories,
            set(&[Category::Script, Category::Video, Category::Xml, Category::Html])
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            parse_message("ftp://x.test/file"),
            Err(MirrorError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_message("www.example.com"),
            Err(MirrorError::InvalidUrl(_))
        ));
        assert!(matches!(parse_message("   "), Err(MirrorError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_unknown_components() {
        let err = parse_message("https://x.test img fonts").unwrap_err();
        assert!(err.to_string().contains("fonts"));
    }

    #[test]
    fn html_only_request_has_no_resource_categories() {
        let parsed = parse_message("https://x.test html").unwrap();
        assert!(parsed.categories.iter().all(|c| !c.is_resource()));
    }
}
