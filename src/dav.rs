//! File storage channel.
//!
//! Path-addressed WebDAV style operations against `<server>/<dav path>/…`.
//! They share the session and API key with the invocation channel but never
//! touch the parameter buffer or the cached response.

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::common::{encode_path, join_url};
use crate::error::{Result, XmlmcError};
use crate::service::XmlmcService;

fn dav_method(name: &'static str) -> Result<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| XmlmcError::Config(format!("invalid HTTP method {}: {}", name, e)))
}

impl XmlmcService {
    /// URL of `path` in the file store; each path segment is percent-encoded.
    ///
    /// `.` and `..` segments are rejected so a path cannot leave the mount.
    pub fn dav_url(&self, path: &str) -> Result<Url> {
        if path.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(XmlmcError::Config(format!(
                "file path '{}' contains relative segments",
                path
            )));
        }
        let encoded = encode_path(path);
        let url = join_url(self.server_url(), &[&self.config().dav_path, &encoded]);
        Ok(Url::parse(&url)?)
    }

    async fn dav_send<F>(&self, method: Method, path: &str, configure: F) -> Result<(Url, Response)>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = self.dav_url(path)?;
        debug!("🌐 {} {}", method, url);

        let request = configure(self.http().request(method, url.clone()));
        let response = self.authorize(request).send().await?;

        debug!("📥 {} for {}", response.status(), url);
        Ok((url, response))
    }

    /// Uploads `contents` as UTF-8 text, replacing any existing file.
    pub async fn put_text(&self, path: &str, contents: &str) -> Result<()> {
        let body = contents.as_bytes().to_vec();
        let (url, response) = self
            .dav_send(Method::PUT, path, |request| {
                request
                    .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                    .body(body)
            })
            .await?;
        ensure_success(response, &url).await?;
        info!("Stored {} bytes at {}", contents.len(), path);
        Ok(())
    }

    /// Streams a local file to `remote_path`.
    pub async fn put_file(&self, local_path: impl AsRef<Path>, remote_path: &str) -> Result<()> {
        let local_path = local_path.as_ref();
        let file = tokio::fs::File::open(local_path).await?;
        let length = file.metadata().await?.len();
        let mime = mime_guess::from_path(remote_path).first_or_octet_stream();

        let (url, response) = self
            .dav_send(Method::PUT, remote_path, |request| {
                request
                    .header(CONTENT_TYPE, mime.as_ref())
                    .header(CONTENT_LENGTH, length)
                    .body(Body::wrap_stream(ReaderStream::new(file)))
            })
            .await?;
        ensure_success(response, &url).await?;
        info!("Uploaded {} ({} bytes) to {}", local_path.display(), length, remote_path);
        Ok(())
    }

    /// Downloads a file into memory.
    pub async fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        let (url, response) = self.dav_send(Method::GET, path, |request| request).await?;
        let response = ensure_success(response, &url).await?;
        let content = response.bytes().await?;
        debug!("⬇️ Downloaded {} bytes from {}", content.len(), path);
        Ok(content.to_vec())
    }

    /// Downloads a file and decodes it as UTF-8.
    pub async fn get_file_contents(&self, path: &str) -> Result<String> {
        let bytes = self.get_file(path).await?;
        String::from_utf8(bytes)
            .map_err(|e| XmlmcError::Parse(format!("{} is not valid UTF-8: {}", path, e)))
    }

    /// True when the file or folder exists.
    ///
    /// Any non-success status counts as "does not exist"; only transport
    /// failures are errors.
    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        let (_, response) = self
            .dav_send(dav_method("PROPFIND")?, path, |request| request.header("Depth", "0"))
            .await?;
        let status = response.status();
        Ok(status.is_success() || status == StatusCode::MULTI_STATUS)
    }

    pub async fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        self.transfer(dav_method("COPY")?, from, to).await
    }

    /// Moves a file; afterwards only `to` exists.
    pub async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.transfer(dav_method("MOVE")?, from, to).await
    }

    async fn transfer(&self, method: Method, from: &str, to: &str) -> Result<()> {
        let destination = self.dav_url(to)?;
        let label = method.to_string();
        let (url, response) = self
            .dav_send(method, from, |request| {
                request
                    .header("Destination", destination.as_str())
                    .header("Overwrite", "T")
            })
            .await?;
        ensure_success(response, &url).await?;
        info!("{} {} -> {}", label, from, to);
        Ok(())
    }

    /// Deletes a file or folder. Deleting something that does not exist succeeds.
    pub async fn remove_file(&self, path: &str) -> Result<()> {
        let (url, response) = self.dav_send(Method::DELETE, path, |request| request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Nothing to delete at {}", path);
            return Ok(());
        }
        ensure_success(response, &url).await?;
        info!("Deleted {}", path);
        Ok(())
    }

    /// Creates a folder. A folder that already exists is left as is.
    pub async fn create_folder(&self, path: &str) -> Result<()> {
        let (url, response) = self.dav_send(dav_method("MKCOL")?, path, |request| request).await?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            // MKCOL on an existing collection
            debug!("Folder {} already exists", path);
            return Ok(());
        }
        ensure_success(response, &url).await?;
        info!("Created folder {}", path);
        Ok(())
    }
}

async fn ensure_success(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(XmlmcError::Http {
        status,
        url: url.to_string(),
        body,
    })
}
