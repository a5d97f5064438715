//! HTML extraction helpers for article pages.
//!
//! Pure functions over page HTML: metadata lookup, content container
//! selection, blocked-page detection, `<img>` rewriting and Markdown
//! conversion. No I/O happens here.

use std::sync::LazyLock;

use chrono::DateTime;
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use archivist_shared::{ArchivistError, FetchFailure, Result};

/// Content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &["#js_content", ".rich_media_content", "article", "main"];

/// Page markers for a login or human-verification wall.
const AUTH_MARKERS: &[&str] = &[
    "环境异常",
    "完成验证后即可继续访问",
    "请在微信客户端打开链接",
];

/// Page markers for removed content.
const REMOVED_MARKERS: &[&str] = &["该内容已被发布者删除", "此内容因违规无法查看"];

/// Page markers for throttling served with a 200.
const THROTTLE_MARKERS: &[&str] = &["访问过于频繁", "操作频繁"];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("img tag regex"));

static IMG_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(data-src|data-original|src|alt)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("img attr regex")
});

static CREATE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"var\s+createTime\s*=\s*['"]([^'"]+)['"]"#).expect("createTime regex")
});

static CT_EPOCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"var\s+ct\s*=\s*"(\d{9,11})""#).expect("ct regex"));

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank lines regex"));

// ---------------------------------------------------------------------------
// Page metadata
// ---------------------------------------------------------------------------

/// Everything pulled out of one article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticlePage {
    pub title: String,
    pub author: Option<String>,
    pub published: Option<String>,
    /// Inner HTML of the content container.
    pub content_html: String,
}

/// Parse an article page, or explain why it is not one.
pub fn parse_article(html: &str) -> std::result::Result<ArticlePage, FetchFailure> {
    let doc = Html::parse_document(html);

    let Some(content_html) = content_html(&doc) else {
        return Err(classify_missing_content(html));
    };

    let title = extract_title(&doc).unwrap_or_else(|| "untitled".to_string());
    Ok(ArticlePage {
        title,
        author: extract_author(&doc),
        published: extract_published(&doc, html),
        content_html,
    })
}

fn classify_missing_content(html: &str) -> FetchFailure {
    if let Some(m) = AUTH_MARKERS.iter().find(|m| html.contains(**m)) {
        return FetchFailure::AuthRequired(format!("verification page ({m})"));
    }
    if let Some(m) = REMOVED_MARKERS.iter().find(|m| html.contains(**m)) {
        return FetchFailure::NotFound(format!("content removed ({m})"));
    }
    if let Some(m) = THROTTLE_MARKERS.iter().find(|m| html.contains(**m)) {
        return FetchFailure::RateLimited(format!("throttle page ({m})"));
    }
    FetchFailure::ParseFailure("no article content container found".into())
}

fn select_first<'a>(doc: &'a Html, css: &str) -> Option<scraper::ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next()
}

fn text_of(doc: &Html, css: &str) -> Option<String> {
    let el = select_first(doc, css)?;
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let el = select_first(doc, css)?;
    let content = el.value().attr("content")?.trim();
    (!content.is_empty()).then(|| content.to_string())
}

fn content_html(doc: &Html) -> Option<String> {
    CONTENT_SELECTORS.iter().find_map(|css| {
        let el = select_first(doc, css)?;
        let inner = el.inner_html();
        (!inner.trim().is_empty()).then_some(inner)
    })
}

/// `og:title`, then `twitter:title`, then `<title>`, then the first `<h1>`.
pub fn extract_title(doc: &Html) -> Option<String> {
    meta_content(doc, r#"meta[property="og:title"]"#)
        .or_else(|| meta_content(doc, r#"meta[name="twitter:title"]"#))
        .or_else(|| text_of(doc, "title"))
        .or_else(|| text_of(doc, "h1"))
}

pub fn extract_author(doc: &Html) -> Option<String> {
    text_of(doc, "#js_name")
        .or_else(|| text_of(doc, "#js_author_name"))
        .or_else(|| meta_content(doc, r#"meta[name="author"]"#))
}

/// Publication date as shown on the page, normalized to `YYYY-MM-DD` when
/// only an epoch is available.
pub fn extract_published(doc: &Html, html: &str) -> Option<String> {
    if let Some(t) = text_of(doc, "#publish_time") {
        return Some(t);
    }
    if let Some(caps) = CREATE_TIME_RE.captures(html) {
        return Some(caps[1].trim().to_string());
    }
    if let Some(caps) = CT_EPOCH_RE.captures(html) {
        if let Some(dt) = caps[1]
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        {
            return Some(dt.format("%Y-%m-%d").to_string());
        }
    }
    meta_content(doc, r#"meta[property="article:published_time"]"#)
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Source of every `<img>` in `html`, in document order.
///
/// Lazy-load attributes win over `src`. Protocol-relative and relative
/// sources are resolved against `page_url`.
pub fn image_sources(html: &str, page_url: &Url) -> Vec<Option<Url>> {
    IMG_TAG_RE
        .find_iter(html)
        .map(|m| {
            let attrs = img_attrs(m.as_str());
            let raw = attrs.data_src.or(attrs.data_original).or(attrs.src)?;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with("data:") {
                return None;
            }
            page_url.join(raw).ok()
        })
        .collect()
}

#[derive(Default)]
struct ImgAttrs {
    data_src: Option<String>,
    data_original: Option<String>,
    src: Option<String>,
    alt: Option<String>,
}

fn img_attrs(tag: &str) -> ImgAttrs {
    let mut attrs = ImgAttrs::default();
    for caps in IMG_ATTR_RE.captures_iter(tag) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string());
        match caps[1].to_ascii_lowercase().as_str() {
            "data-src" => attrs.data_src = value,
            "data-original" => attrs.data_original = value,
            "src" => attrs.src = value,
            "alt" => attrs.alt = value,
            _ => {}
        }
    }
    attrs
}

/// Replace the n-th `<img>` with a plain tag pointing at `replacements[n]`.
///
/// A `None` replacement drops the tag.
pub fn rewrite_images(html: &str, replacements: &[Option<String>]) -> String {
    let mut index = 0usize;
    IMG_TAG_RE
        .replace_all(html, |caps: &Captures| {
            let replacement = replacements.get(index).cloned().flatten();
            index += 1;
            match replacement {
                Some(src) => {
                    let alt = img_attrs(&caps[0]).alt.unwrap_or_default();
                    format!(
                        r#"<img src="{}" alt="{}">"#,
                        escape_attr(&src),
                        escape_attr(&alt)
                    )
                }
                None => String::new(),
            }
        })
        .into_owned()
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// File extension for a downloaded image.
///
/// Checks the URL path, then the `wx_fmt` query parameter, then the
/// response content type, and falls back to `jpg`.
pub fn image_extension(url: &Url, content_type: Option<&str>) -> &'static str {
    let from_path = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let from_query = url
        .query_pairs()
        .find(|(k, _)| k == "wx_fmt")
        .map(|(_, v)| v.to_ascii_lowercase());
    let from_type = content_type.and_then(|ct| {
        ct.split(';')
            .next()
            .and_then(|mime| mime.trim().strip_prefix("image/"))
            .map(str::to_ascii_lowercase)
    });

    [from_path, from_query, from_type]
        .into_iter()
        .flatten()
        .find_map(|ext| known_extension(&ext))
        .unwrap_or("jpg")
}

fn known_extension(ext: &str) -> Option<&'static str> {
    if ext == "jpeg" || ext == "jpg" {
        return Some("jpg");
    }
    IMAGE_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// Convert content HTML to Markdown.
pub fn to_markdown(html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "iframe", "noscript", "svg"])
        .build();

    let markdown = converter
        .convert(html)
        .map_err(|e| ArchivistError::parse(format!("html to markdown failed: {e}")))?;

    debug!(len = markdown.len(), "converted article body");
    Ok(BLANK_LINES_RE.replace_all(markdown.trim(), "\n\n").into_owned())
}

/// Assemble the primary document.
///
/// Only source-stable fields go into the header, so re-fetching an
/// unchanged article produces the same bytes.
pub fn build_document(
    title: &str,
    author: Option<&str>,
    published: Option<&str>,
    source: &str,
    body: &str,
    failed_images: &[String],
) -> String {
    let mut out = format!("# {title}\n\n");
    if let Some(author) = author {
        out.push_str(&format!("> **作者**: {author}\n"));
    }
    if let Some(published) = published {
        out.push_str(&format!("> **发布时间**: {published}\n"));
    }
    out.push_str(&format!("> **来源**: <{source}>\n\n---\n\n"));

    if !failed_images.is_empty() {
        out.push_str("## 图片下载失败列表\n\n");
        for (i, url) in failed_images.iter().enumerate() {
            out.push_str(&format!("- {:03}: {url}\n", i + 1));
        }
        out.push('\n');
    }

    out.push_str(body.trim());
    out.push('\n');
    out
}
