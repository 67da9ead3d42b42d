use crate::config::FetchConfig;

const CATEGORY_PREFIXES: [&str; 2] = ["Category:", "تصنيف:"];
const FILE_PREFIXES: [&str; 4] = ["File:", "Image:", "ملف:", "صورة:"];

/// Site root plus article path, used to build links the API didn't hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrls {
    pub site_url: String,
    pub article_path: String,
}

impl SiteUrls {
    pub fn new(site_url: &str, article_path: &str) -> Self {
        Self {
            site_url: site_url.trim_end_matches('/').to_string(),
            article_path: article_path.to_string(),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(&config.site_url, &config.article_path)
    }

    /// `<site><article_path>` with `$1` replaced by the encoded title.
    pub fn article_url(&self, title: &str) -> String {
        self.url_for_path(&encode_title(title))
    }

    /// `Special:FilePath` redirect for an image title, with any file prefix dropped.
    pub fn file_path_url(&self, image_title: &str) -> String {
        let name = strip_file_prefix(image_title.trim());
        self.url_for_path(&format!("Special:FilePath/{}", encode_title(name)))
    }

    fn url_for_path(&self, encoded: &str) -> String {
        if self.article_path.contains("$1") {
            format!("{}{}", self.site_url, self.article_path.replace("$1", encoded))
        } else {
            format!(
                "{}/{}/{}",
                self.site_url,
                self.article_path.trim_matches('/'),
                encoded
            )
        }
    }
}

/// Percent-encode a title for a URL path, spaces becoming underscores.
pub fn encode_title(title: &str) -> String {
    urlencoding::encode(&title.trim().replace(' ', "_")).into_owned()
}

pub fn decode_title(raw: &str) -> String {
    raw.replace('_', " ").trim().to_string()
}

/// Prefix `Category:` unless the name already carries a category prefix.
pub fn category_title(name: &str) -> String {
    let trimmed = name.trim();
    if CATEGORY_PREFIXES
        .iter()
        .any(|prefix| starts_with_ignore_case(trimmed, prefix))
    {
        return trimmed.to_string();
    }
    format!("Category:{trimmed}")
}

pub fn strip_file_prefix(title: &str) -> &str {
    for prefix in FILE_PREFIXES {
        if starts_with_ignore_case(title, prefix) {
            return title[prefix.len()..].trim_start();
        }
    }
    title
}

pub fn is_file_title(title: &str) -> bool {
    FILE_PREFIXES
        .iter()
        .any(|prefix| starts_with_ignore_case(title.trim(), prefix))
}

pub fn is_category_title(title: &str) -> bool {
    CATEGORY_PREFIXES
        .iter()
        .any(|prefix| starts_with_ignore_case(title.trim(), prefix))
}

/// True when the title falls under one of the configured disallowed prefixes.
/// Underscores and spaces are treated alike, and ASCII case is ignored.
pub fn is_disallowed_title(title: &str, prefixes: &[String]) -> bool {
    let normalized = decode_title(title);
    prefixes.iter().any(|prefix| {
        let prefix = decode_title(prefix);
        !prefix.is_empty() && starts_with_ignore_case(&normalized, &prefix)
    })
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        ["User:", "Draft:", "مستخدم:", "Wikipedia:"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn article_url_encodes_title_with_underscores() {
        let site = SiteUrls::new("https://ar.wikipedia.org/", "/wiki/$1");
        assert_eq!(
            site.article_url("Alan Turing"),
            "https://ar.wikipedia.org/wiki/Alan_Turing"
        );
        assert_eq!(
            site.article_url("علوم"),
            "https://ar.wikipedia.org/wiki/%D8%B9%D9%84%D9%88%D9%85"
        );
    }

    #[test]
    fn article_url_accepts_paths_without_placeholder() {
        let site = SiteUrls::new("https://wiki.example.org", "/wiki/");
        assert_eq!(site.article_url("Alpha"), "https://wiki.example.org/wiki/Alpha");
    }

    #[test]
    fn file_path_url_strips_file_prefixes() {
        let site = SiteUrls::new("https://ar.wikipedia.org", "/wiki/$1");
        assert_eq!(
            site.file_path_url("File:Earth view.jpg"),
            "https://ar.wikipedia.org/wiki/Special:FilePath/Earth_view.jpg"
        );
        assert_eq!(
            site.file_path_url("ملف:Map.png"),
            "https://ar.wikipedia.org/wiki/Special:FilePath/Map.png"
        );
    }

    #[test]
    fn category_title_adds_prefix_once() {
        assert_eq!(category_title("علوم"), "Category:علوم");
        assert_eq!(category_title("Category:Physics"), "Category:Physics");
        assert_eq!(category_title("تصنيف:علوم"), "تصنيف:علوم");
    }

    #[test]
    fn disallowed_titles_are_detected_by_prefix() {
        let prefixes = prefixes();
        assert!(is_disallowed_title("User:Example", &prefixes));
        assert!(is_disallowed_title("user:example", &prefixes));
        assert!(is_disallowed_title("Draft:New_article", &prefixes));
        assert!(is_disallowed_title("مستخدم:مثال", &prefixes));
        assert!(!is_disallowed_title("Userland", &prefixes));
        assert!(!is_disallowed_title("Physics", &prefixes));
    }

    #[test]
    fn disallowed_prefix_matching_treats_underscores_as_spaces() {
        let prefixes = vec!["User talk:".to_string()];
        assert!(is_disallowed_title("User_talk:Someone", &prefixes));
    }

    #[test]
    fn file_and_category_titles_are_recognized() {
        assert!(is_file_title("image:Foo.png"));
        assert!(is_category_title("Category:Foo"));
        assert!(!is_file_title("Filet mignon"));
    }
}
