//! HTTP article fetcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};
use url::Url;

use archivist_identity::NormalizedLocator;
use archivist_shared::{ArchivistError, FetchConfig, FetchFailure, Result, layout};

use crate::extract::{self, ArticlePage};
use crate::{FetchedDocument, Fetcher};

/// Browser-like User-Agent; article hosts serve a verification wall to bare clients.
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 archivist/",
    env!("CARGO_PKG_VERSION")
);

/// Fetches article pages over HTTP and stages them as Markdown plus images.
pub struct HttpFetcher {
    client: Client,
    download_images: bool,
}

impl HttpFetcher {
    /// Create a fetcher with the given configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ArchivistError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            download_images: config.download_images,
        })
    }

    async fn get_page(&self, url: &Url) -> std::result::Result<String, FetchFailure> {
        let response = self
            .client
            .get(url.as_str())
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| FetchFailure::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if let Some(failure) = status_failure(status, url) {
            return Err(failure);
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::Transport(format!("{url}: failed to read body: {e}")))?;
        if body.trim().is_empty() {
            return Err(FetchFailure::ParseFailure(format!("{url}: empty body")));
        }
        Ok(body)
    }

    /// Download every image into `<staging>/images/NNN.ext`.
    ///
    /// Returns the replacement `src` per image (the staged relative path, or
    /// the remote URL when the download failed) and the failed URLs.
    async fn stage_images(
        &self,
        sources: &[Option<Url>],
        page_url: &Url,
        images_dir: &Path,
    ) -> Result<(Vec<Option<String>>, Vec<String>)> {
        let mut replacements = Vec::with_capacity(sources.len());
        let mut failed = Vec::new();

        for (i, source) in sources.iter().enumerate() {
            let Some(url) = source else {
                replacements.push(None);
                continue;
            };
            if !self.download_images {
                replacements.push(Some(url.to_string()));
                continue;
            }

            match self.download(url, page_url).await {
                Ok((bytes, content_type)) => {
                    let ext = extract::image_extension(url, content_type.as_deref());
                    let name = format!("{:03}.{ext}", i + 1);
                    tokio::fs::create_dir_all(images_dir)
                        .await
                        .map_err(|e| ArchivistError::io(images_dir, e))?;
                    let path = images_dir.join(&name);
                    tokio::fs::write(&path, &bytes)
                        .await
                        .map_err(|e| ArchivistError::io(&path, e))?;
                    replacements.push(Some(format!("{}/{name}", layout::ASSETS_DIR)));
                }
                Err(e) => {
                    warn!(%url, error = %e, "image download failed, keeping remote reference");
                    failed.push(url.to_string());
                    replacements.push(Some(url.to_string()));
                }
            }
        }

        Ok((replacements, failed))
    }

    async fn download(
        &self,
        url: &Url,
        referer: &Url,
    ) -> std::result::Result<(Vec<u8>, Option<String>), String> {
        let response = self
            .client
            .get(url.as_str())
            .header(REFERER, referer.as_str())
            .header(ACCEPT, "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Ok((bytes.to_vec(), content_type))
    }
}

/// Map a non-success HTTP status onto the fetch failure taxonomy.
fn status_failure(status: StatusCode, url: &Url) -> Option<FetchFailure> {
    if status.is_success() {
        return None;
    }
    let detail = format!("{url}: HTTP {}", status.as_u16());
    Some(match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchFailure::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchFailure::AuthRequired(detail),
        StatusCode::TOO_MANY_REQUESTS => FetchFailure::RateLimited(detail),
        _ => FetchFailure::Transport(detail),
    })
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip_all, fields(locator = %locator))]
    async fn fetch(
        &self,
        locator: &NormalizedLocator,
        staging_dir: &Path,
    ) -> Result<FetchedDocument> {
        let url = Url::parse(locator.as_str())
            .map_err(|e| ArchivistError::normalization(format!("{locator}: {e}")))?;

        debug!("fetching article page");
        let html = self.get_page(&url).await?;
        let ArticlePage {
            title,
            author,
            published,
            content_html,
        } = extract::parse_article(&html)?;

        tokio::fs::create_dir_all(staging_dir)
            .await
            .map_err(|e| ArchivistError::io(staging_dir, e))?;

        let images_dir = staging_dir.join(layout::ASSETS_DIR);
        let sources = extract::image_sources(&content_html, &url);
        let (replacements, failed) = self.stage_images(&sources, &url, &images_dir).await?;
        let content_html = extract::rewrite_images(&content_html, &replacements);

        let body = extract::to_markdown(&content_html)?;
        let document = extract::build_document(
            &title,
            author.as_deref(),
            published.as_deref(),
            locator.as_str(),
            &body,
            &failed,
        );

        let primary: PathBuf = staging_dir.join(layout::PRIMARY_DOCUMENT);
        tokio::fs::write(&primary, document)
            .await
            .map_err(|e| ArchivistError::io(&primary, e))?;

        info!(
            title = %title,
            images = sources.len(),
            failed_images = failed.len(),
            "article staged"
        );

        Ok(FetchedDocument {
            primary_document_path: primary,
            asset_directory: images_dir.is_dir().then_some(images_dir),
            title,
            extracted_date: published,
            author,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_identity::normalize_locator;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig::default()).unwrap()
    }

    fn staging() -> PathBuf {
        std::env::temp_dir().join(format!("archivist-fetch-test-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn stages_article_and_images() {
        let server = MockServer::start().await;
        let page = format!(
            r#"<html><head><meta property="og:title" content="长篇笔记"></head><body>
            <div id="js_content">
                <p>Body text.</p>
                <img data-src="{}/img/pic?wx_fmt=png" alt="diagram">
            </div></body></html>"#,
            server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/s/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/pic"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
            )
            .mount(&server)
            .await;

        let locator = normalize_locator(&format!("{}/s/abc", server.uri())).unwrap();
        let dir = staging();
        let doc = fetcher().fetch(&locator, &dir).await.unwrap();

        assert_eq!(doc.title, "长篇笔记");
        assert_eq!(doc.primary_document_path, dir.join("article.md"));
        assert_eq!(doc.asset_directory, Some(dir.join("images")));
        assert!(dir.join("images/001.png").is_file());

        let md = std::fs::read_to_string(&doc.primary_document_path).unwrap();
        assert!(md.starts_with("# 长篇笔记"));
        assert!(md.contains("Body text."));
        assert!(md.contains("images/001.png"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_image_keeps_remote_reference() {
        let server = MockServer::start().await;
        let page = format!(
            r#"<html><body><div id="js_content"><p>x</p><img src="{}/missing.jpg"></div></body></html>"#,
            server.uri()
        );
        Mock::given(path("/s/img"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let locator = normalize_locator(&format!("{}/s/img", server.uri())).unwrap();
        let dir = staging();
        let doc = fetcher().fetch(&locator, &dir).await.unwrap();

        assert_eq!(doc.asset_directory, None);
        let md = std::fs::read_to_string(&doc.primary_document_path).unwrap();
        assert!(md.contains("图片下载失败列表"));
        assert!(md.contains("/missing.jpg"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn status_codes_map_to_failures() {
        let server = MockServer::start().await;
        for (route, status) in [("/gone", 410), ("/login", 403), ("/slow", 429), ("/boom", 500)] {
            Mock::given(path(route))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        let expected = [
            ("/gone", "fetch:not-found"),
            ("/login", "fetch:auth-required"),
            ("/slow", "fetch:rate-limited"),
            ("/boom", "fetch:transport"),
        ];
        for (route, reason) in expected {
            let locator = normalize_locator(&format!("{}{route}", server.uri())).unwrap();
            let dir = staging();
            let err = fetcher().fetch(&locator, &dir).await.unwrap_err();
            assert_eq!(err.reason(), reason, "route {route}");
            assert!(!dir.exists(), "no staging output on failure");
        }
    }

    #[tokio::test]
    async fn verification_wall_is_auth_required() {
        let server = MockServer::start().await;
        Mock::given(path("/s/wall"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>环境异常 完成验证后即可继续访问</body></html>"),
            )
            .mount(&server)
            .await;

        let locator = normalize_locator(&format!("{}/s/wall", server.uri())).unwrap();
        let dir = staging();
        let err = fetcher().fetch(&locator, &dir).await.unwrap_err();
        assert_eq!(err.reason(), "fetch:auth-required");
        assert!(!dir.exists());
    }
}
