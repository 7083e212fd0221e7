use scraper::{Html, Selector};
use url::Url;

/// Metadata pulled from a fetched page. Every field is optional; a page may
/// carry no usable tags at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub favicon: Option<String>,
}

/// Parse Open Graph / Twitter card / plain HTML tags from `html`.
///
/// `base` is the final URL of the response (after redirects); relative
/// image and icon URLs are resolved against it. When the page declares no
/// icon, the favicon falls back to `/favicon.ico` at the page origin.
pub fn extract_metadata(html: &str, base: &Url) -> PageMetadata {
    let document = Html::parse_document(html);

    let title = get_meta_property(&document, "og:title")
        .or_else(|| get_meta_name(&document, "twitter:title"))
        .or_else(|| get_title_tag(&document));

    let description = get_meta_property(&document, "og:description")
        .or_else(|| get_meta_name(&document, "twitter:description"))
        .or_else(|| get_meta_name(&document, "description"));

    let image_url = get_meta_property(&document, "og:image")
        .or_else(|| get_meta_name(&document, "twitter:image"))
        .and_then(|raw| resolve(base, &raw));

    let favicon = get_icon_href(&document)
        .and_then(|raw| resolve(base, &raw))
        .or_else(|| default_favicon(base));

    PageMetadata {
        title,
        description,
        image_url,
        favicon,
    }
}

fn get_meta_property(doc: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[property="{property}"]"#)).ok()?;
    first_attr(doc, &selector, "content")
}

fn get_meta_name(doc: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[name="{name}"]"#)).ok()?;
    first_attr(doc, &selector, "content")
}

fn get_title_tag(doc: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

// `~=` matches "icon" as a whitespace-separated token, so "shortcut icon"
// is covered; apple-touch-icon is a separate rel value.
fn get_icon_href(doc: &Html) -> Option<String> {
    ["link[rel~=\"icon\"]", "link[rel=\"apple-touch-icon\"]"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| first_attr(doc, &selector, "href"))
}

fn first_attr(doc: &Html, selector: &Selector, attr: &str) -> Option<String> {
    doc.select(selector)
        .filter_map(|el| el.value().attr(attr))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Resolve `raw` against `base`, keeping only http(s) results.
fn resolve(base: &Url, raw: &str) -> Option<String> {
    let joined = base.join(raw).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

fn default_favicon(base: &Url) -> Option<String> {
    base.host_str()?;
    base.join("/favicon.ico").ok().map(|u| u.to_string())
}
