use crate::types::Category;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    static ref NON_ALPHANUMERIC: Regex =
        Regex::new(r"[^A-Za-z0-9]+").expect("BUG: hardcoded separator regex is invalid");
}

const SEPARATOR: char = '.';
const MAX_NAME_LEN: usize = 100;
const PLACEHOLDER: &str = "index";

/// Extensions a `link` target may keep. Anything else is assumed to be a
/// document and gets `.html` appended.
const LINK_EXTENSIONS: [&str; 10] = [
    "css", "png", "ico", "jpg", "jpeg", "mov", "ogg", "gif", "xml", "js",
];

/// Maps a resolved URL to a file-system-safe base name.
pub fn local_file_name(url: &Url, category: Category) -> String {
    let last_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty());

    let raw = match last_segment {
        Some(segment) => segment.to_string(),
        None => format!("{}{}{}", url.host_str().unwrap_or_default(), url.path(), PLACEHOLDER),
    };

    let mut name = collapse(&raw);
    if name.is_empty() {
        name = PLACEHOLDER.to_string();
    }
    if name.len() > MAX_NAME_LEN {
        // ASCII only at this point, so byte slicing is safe.
        name = name[name.len() - MAX_NAME_LEN..]
            .trim_start_matches(SEPARATOR)
            .to_string();
    }

    if category == Category::Link && !has_static_extension(&name) {
        name.push_str(".html");
    }
    name
}

/// Inserts a counter before the extension: `x.png` becomes `x.1.png`.
pub fn disambiguate(name: &str, n: usize) -> String {
    match name.rsplit_once(SEPARATOR) {
        Some((stem, ext)) => format!("{stem}{SEPARATOR}{n}{SEPARATOR}{ext}"),
        None => format!("{name}{SEPARATOR}{n}"),
    }
}

fn collapse(raw: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(raw, SEPARATOR.to_string().as_str())
        .trim_matches(SEPARATOR)
        .to_string()
}

fn has_static_extension(name: &str) -> bool {
    name.rsplit_once(SEPARATOR)
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| LINK_EXTENSIONS.contains(&ext.as_str()))
}
