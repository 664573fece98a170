use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use url::Url;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// Blocking resource loader used for documents, scripts, and frame sources.
pub trait Fetch {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;

    fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        let bytes = self.fetch(url)?;
        String::from_utf8(bytes).map_err(|_| FetchError::Encoding {
            url: url.to_string(),
        })
    }
}

/// Fetches `http`/`https` over the network and `file` from disk.
pub struct NetFetcher {
    client: Client,
}

impl NetFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| FetchError::Network {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Fetch for NetFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        match url.scheme() {
            "file" => fetch_file_url(url),
            "http" | "https" => {
                tracing::debug!(target: "quickwindow::fetch", url = %url, "fetching");
                let network_error = |err: reqwest::Error| FetchError::Network {
                    url: url.to_string(),
                    message: err.to_string(),
                };
                let response = self.client.get(url.clone()).send().map_err(network_error)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                let bytes = response.bytes().map_err(network_error)?;
                Ok(bytes.to_vec())
            }
            _ => Err(FetchError::UnsupportedScheme(url.to_string())),
        }
    }
}

fn fetch_file_url(url: &Url) -> Result<Vec<u8>, FetchError> {
    let path = url.to_file_path().map_err(|_| {
        FetchError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "invalid file URL",
        ))
    })?;

    if path.is_dir() {
        return Err(FetchError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path is a directory",
        )));
    }

    tracing::debug!(target: "quickwindow::fetch", path = %path.display(), "reading file");
    Ok(std::fs::read(&path)?)
}

/// In-memory fetcher serving registered bodies; every other URL fails.
///
/// Records each requested URL so callers can assert on fetch order.
#[derive(Default)]
pub struct MapFetcher {
    resources: RefCell<HashMap<String, Vec<u8>>>,
    requests: RefCell<Vec<String>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.insert(url, body);
        self
    }

    pub fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        let key = Url::parse(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string());
        self.resources.borrow_mut().insert(key, body.into());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl Fetch for MapFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.requests.borrow_mut().push(url.to_string());
        self.resources
            .borrow()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| FetchError::Network {
                url: url.to_string(),
                message: "not found".to_string(),
            })
    }
}

/// True when a bare load argument names a fetchable resource rather than
/// inline markup: a `file`, `http`, or `https` URL, or an absolute path.
pub fn is_fetchable(input: &str) -> bool {
    if input.starts_with('/') {
        return true;
    }
    matches!(
        Url::parse(input).map(|url| url.scheme().to_string()).as_deref(),
        Ok("file" | "http" | "https")
    )
}

/// Turn a fetchable load argument into a URL; absolute paths become `file:`.
pub fn parse_fetchable(input: &str) -> Result<Url, FetchError> {
    if input.starts_with('/') {
        return Url::from_file_path(input)
            .map_err(|_| FetchError::UnsupportedScheme(input.to_string()));
    }
    Url::parse(input).map_err(|_| FetchError::UnsupportedScheme(input.to_string()))
}

/// Resolve `uri` against `base`; absolute URIs pass through unchanged.
pub fn resolve_url(uri: &str, base: &Url) -> Result<Url, FetchError> {
    if let Ok(absolute) = Url::parse(uri) {
        return Ok(absolute);
    }

    base.join(uri).map_err(|_| FetchError::Unresolvable {
        uri: uri.to_string(),
        base: base.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_url_absolute() {
        let base = Url::parse("https://base.com/page.html").unwrap();
        let result = resolve_url("https://example.com/script.js", &base).unwrap();
        assert_eq!(result.as_str(), "https://example.com/script.js");
    }

    #[test]
    fn resolve_url_relative_path() {
        let base = Url::parse("https://base.com/app/page.html").unwrap();
        assert_eq!(
            resolve_url("../lib/script.js", &base).unwrap().as_str(),
            "https://base.com/lib/script.js"
        );
        assert_eq!(
            resolve_url("/assets/script.js", &base).unwrap().as_str(),
            "https://base.com/assets/script.js"
        );
    }

    #[test]
    fn relative_against_about_blank_is_unresolvable() {
        let base = Url::parse("about:blank").unwrap();
        assert!(matches!(
            resolve_url("b.html", &base),
            Err(FetchError::Unresolvable { .. })
        ));
    }

    #[test]
    fn fetchable_inputs() {
        assert!(is_fetchable("http://x/a"));
        assert!(is_fetchable("https://x/a"));
        assert!(is_fetchable("file:///tmp/a.html"));
        assert!(is_fetchable("/tmp/a.html"));
        assert!(!is_fetchable("<p>hello</p>"));
        assert!(!is_fetchable("ftp://x/a"));
        assert!(!is_fetchable("a.html"));
    }

    #[test]
    fn map_fetcher_serves_registered_bodies() {
        let fetcher = MapFetcher::new().with("http://x/a", "hello");
        let url = Url::parse("http://x/a").unwrap();
        assert_eq!(fetcher.fetch_text(&url).unwrap(), "hello");
        let missing = Url::parse("http://x/b").unwrap();
        assert!(fetcher.fetch(&missing).is_err());
        assert_eq!(fetcher.requests(), vec!["http://x/a", "http://x/b"]);
    }

    #[test]
    fn file_urls_are_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<p>disk</p>").unwrap();
        let fetcher = NetFetcher::new(&FetchConfig::default()).unwrap();
        let url = Url::from_file_path(&path).unwrap();
        assert_eq!(fetcher.fetch_text(&url).unwrap(), "<p>disk</p>");
    }
}
