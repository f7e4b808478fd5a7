//! The site route: an archive directory served under a URL prefix.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use percent_encoding::percent_decode_str;

use crate::config::INDEX_FILE;
use crate::error::{FsError, ServeError};
use crate::resolve::Prefix;
use crate::vfs::{ArchiveFs, Metadata, path};

use super::listing;

pub type HttpResponse = Response<Full<Bytes>>;

/// Serves one archive view below one URL prefix. Every other path is 404.
#[derive(Clone)]
pub struct Mount {
    fs: ArchiveFs,
    prefix: Prefix,
}

impl Mount {
    pub fn new(fs: ArchiveFs, prefix: Prefix) -> Self {
        Self { fs, prefix }
    }

    /// Mount `directory` of `fs`, which must exist and be a directory.
    pub fn for_directory(
        fs: &ArchiveFs,
        directory: &str,
        prefix: Prefix,
    ) -> Result<Self, ServeError> {
        match fs.sub(directory) {
            Ok(site) => Ok(Self::new(site, prefix)),
            Err(FsError::Closed) => Err(ServeError::Traversal(FsError::Closed)),
            Err(e) => {
                tracing::debug!("Cannot mount {}: {}", directory, e);
                Err(ServeError::RootNotDirectory(directory.to_string()))
            }
        }
    }

    pub async fn handle<B>(&self, request: &Request<B>) -> HttpResponse {
        let uri = request.uri();
        // The prefix is matched in decoded form, as it is written in `.prefix`
        let decoded = percent_decode_str(uri.path()).decode_utf8_lossy();
        let Some(rest) = self.prefix.strip(&decoded) else {
            if self.prefix.without_trailing_slash() == Some(&*decoded) {
                return redirect(with_query(&self.prefix.encoded(), uri.query()));
            }
            return not_found();
        };

        let method = request.method();
        if method != Method::GET && method != Method::HEAD {
            let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed\n");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let rel = path::clean(rest);
        let wants_dir = rest.is_empty() || rest.ends_with('/');

        let meta = match self.fs.stat(&rel) {
            Ok(meta) => meta,
            Err(e) => return self.failure(&rel, e),
        };

        let response = if meta.is_dir() {
            if !wants_dir {
                let location = format!("{}/", uri.path());
                return redirect(with_query(&location, uri.query()));
            }
            let index = path::join(&rel, INDEX_FILE);
            match self.fs.stat(&index) {
                Ok(index_meta) if !index_meta.is_dir() => {
                    self.file(&index, &index_meta, request.headers()).await
                }
                _ => self.listing(&rel),
            }
        } else {
            if wants_dir {
                let location = uri.path().trim_end_matches('/');
                return redirect(with_query(location, uri.query()));
            }
            self.file(&rel, &meta, request.headers()).await
        };

        if method == Method::HEAD {
            strip_body(response)
        } else {
            response
        }
    }

    async fn file(&self, rel: &str, meta: &Metadata, headers: &HeaderMap) -> HttpResponse {
        let modified = meta.modified();
        if let Some(modified) = modified {
            if not_modified_since(headers, modified) {
                let mut response = empty(StatusCode::NOT_MODIFIED);
                set_last_modified(&mut response, modified);
                return response;
            }
        }

        let size = meta.len();
        let range = match requested_range(headers, size) {
            Ok(range) => range,
            Err(()) => {
                let mut response = text(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "416 requested range not satisfiable\n",
                );
                if let Ok(value) = HeaderValue::try_from(format!("bytes */{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                return response;
            }
        };

        let content = match range {
            Some((start, end)) => self.fs.read_range(rel, start..end + 1).await,
            None => self.fs.read(rel).await,
        };
        let content = match content {
            Ok(content) => content,
            Err(e) => return self.failure(rel, e),
        };

        let mut response = match range {
            Some((start, end)) => {
                let mut response = with_body(StatusCode::PARTIAL_CONTENT, content);
                if let Ok(value) = HeaderValue::try_from(format!("bytes {start}-{end}/{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                response
            }
            None => with_body(StatusCode::OK, content),
        };

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(listing::content_type(path::base_name(rel))),
        );
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Some(modified) = modified {
            set_last_modified(&mut response, modified);
        }
        response
    }

    fn listing(&self, rel: &str) -> HttpResponse {
        match self.fs.read_dir(rel) {
            Ok(entries) => {
                let mut response = with_body(StatusCode::OK, Bytes::from(listing::render(&entries)));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=utf-8"),
                );
                response
            }
            Err(e) => self.failure(rel, e),
        }
    }

    fn failure(&self, rel: &str, error: FsError) -> HttpResponse {
        match error {
            FsError::NotFound(_) | FsError::NotDirectory(_) => not_found(),
            FsError::Closed => text(StatusCode::SERVICE_UNAVAILABLE, "503 service unavailable\n"),
            e => {
                tracing::error!(
                    "Error serving {}: {}",
                    path::display(&path::join(self.fs.root(), rel)),
                    e
                );
                text(StatusCode::INTERNAL_SERVER_ERROR, "500 internal server error\n")
            }
        }
    }
}

/// Parse a single `bytes=` range against a body of `size` bytes.
///
/// `Ok(None)` means serve the whole body: no header, an empty body, or a
/// multi-range request. `Err` means the range cannot be satisfied.
fn requested_range(headers: &HeaderMap, size: u64) -> Result<Option<(u64, u64)>, ()> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(None);
    };
    if size == 0 {
        return Ok(None);
    }
    let value = value.to_str().map_err(|_| ())?;
    let ranges = value.strip_prefix("bytes=").ok_or(())?.trim();
    if ranges.contains(',') {
        return Ok(None);
    }
    let (first, last) = ranges.split_once('-').ok_or(())?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = if first.is_empty() {
        let suffix: u64 = last.parse().map_err(|_| ())?;
        if suffix == 0 {
            return Err(());
        }
        (size.saturating_sub(suffix), size - 1)
    } else {
        let start: u64 = first.parse().map_err(|_| ())?;
        let end = if last.is_empty() {
            size - 1
        } else {
            last.parse::<u64>().map_err(|_| ())?.min(size - 1)
        };
        (start, end)
    };

    if start >= size || start > end {
        return Err(());
    }
    Ok(Some((start, end)))
}

fn not_modified_since(headers: &HeaderMap, modified: SystemTime) -> bool {
    let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok())
    else {
        return false;
    };
    match (modified.duration_since(UNIX_EPOCH), since.duration_since(UNIX_EPOCH)) {
        (Ok(modified), Ok(since)) => modified.as_secs() <= since.as_secs(),
        _ => false,
    }
}

fn set_last_modified(response: &mut HttpResponse, modified: SystemTime) {
    if let Ok(value) = HeaderValue::try_from(httpdate::fmt_http_date(modified)) {
        response.headers_mut().insert(header::LAST_MODIFIED, value);
    }
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

fn with_body(status: StatusCode, body: Bytes) -> HttpResponse {
    let len = body.len();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response
}

fn empty(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn text(status: StatusCode, body: &'static str) -> HttpResponse {
    let mut response = with_body(status, Bytes::from_static(body.as_bytes()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

fn not_found() -> HttpResponse {
    text(StatusCode::NOT_FOUND, "404 page not found\n")
}

fn redirect(location: String) -> HttpResponse {
    match HeaderValue::try_from(location) {
        Ok(value) => {
            let mut response = empty(StatusCode::MOVED_PERMANENTLY);
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => text(StatusCode::BAD_REQUEST, "400 bad request\n"),
    }
}

/// Drop the body of a HEAD response, keeping its Content-Length.
fn strip_body(response: HttpResponse) -> HttpResponse {
    let (parts, _) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;
    use crate::io::BytesReader;
    use crate::testutil::ZipFixture;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    async fn archive() -> Archive {
        let data = ZipFixture::new()
            .file("site/.prefix", "demo\n")
            .deflated("site/index.html", "<h1>demo</h1>")
            .file("site/notes.txt", "0123456789")
            .file("site/assets/app.css", "body{}")
            .file("site/assets/a b.txt", "spaced")
            .file("outside.txt", "secret")
            .build();
        Archive::from_reader("site.zip", Arc::new(BytesReader::new(data)))
            .await
            .unwrap()
    }

    fn mount(archive: &Archive) -> Mount {
        Mount::for_directory(&archive.fs(), "site", Prefix::normalize("demo")).unwrap()
    }

    fn get(uri: &str) -> Request<()> {
        Request::get(uri).body(()).unwrap()
    }

    async fn body(response: HttpResponse) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    fn header<'a>(response: &'a HttpResponse, name: header::HeaderName) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn serves_files_under_prefix() {
        let archive = archive().await;
        let mount = mount(&archive);

        let response = mount.handle(&get("/demo/index.html")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, header::CONTENT_TYPE), "text/html; charset=utf-8");
        assert_eq!(header(&response, header::CONTENT_LENGTH), "13");
        assert_eq!(header(&response, header::ACCEPT_RANGES), "bytes");
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body(response).await, "<h1>demo</h1>");
    }

    #[tokio::test]
    async fn paths_outside_prefix_are_not_found() {
        let archive = archive().await;
        let mount = mount(&archive);

        for uri in ["/other/", "/", "/demoish/index.html", "/outside.txt"] {
            let response = mount.handle(&get(uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body(response).await, "404 page not found\n");
        }
    }

    #[tokio::test]
    async fn directory_serves_index() {
        let archive = archive().await;
        let response = mount(&archive).handle(&get("/demo/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "<h1>demo</h1>");
    }

    #[tokio::test]
    async fn directory_without_index_is_listed() {
        let archive = archive().await;
        let response = mount(&archive).handle(&get("/demo/assets/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let page = body(response).await;
        let page = std::str::from_utf8(&page).unwrap();
        assert!(page.contains("<a href=\"a%20b.txt\">a b.txt</a>"));
        assert!(page.contains("<a href=\"app.css\">app.css</a>"));
    }

    #[tokio::test]
    async fn redirects_to_canonical_form() {
        let archive = archive().await;
        let mount = mount(&archive);

        let response = mount.handle(&get("/demo")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(header(&response, header::LOCATION), "/demo/");

        let response = mount.handle(&get("/demo/assets?x=1")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(header(&response, header::LOCATION), "/demo/assets/?x=1");

        let response = mount.handle(&get("/demo/notes.txt/")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(header(&response, header::LOCATION), "/demo/notes.txt");
    }

    #[tokio::test]
    async fn traversal_stays_inside_site() {
        let archive = archive().await;
        let mount = mount(&archive);

        let response = mount.handle(&get("/demo/../outside.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = mount.handle(&get("/demo/%2e%2e/outside.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn percent_encoded_names() {
        let archive = archive().await;
        let response = mount(&archive).handle(&get("/demo/assets/a%20b.txt")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "spaced");
    }

    #[tokio::test]
    async fn non_ascii_prefix() {
        let data = ZipFixture::new()
            .file("site/.prefix", "café\n")
            .file("site/index.html", "<h1>café</h1>")
            .build();
        let archive = Archive::from_reader("site.zip", Arc::new(BytesReader::new(data)))
            .await
            .unwrap();
        let fs = archive.fs();
        let prefix = crate::resolve::resolve_prefix(&fs, "site", "").await;
        assert_eq!(prefix.as_str(), "/café/");
        let mount = Mount::for_directory(&fs, "site", prefix).unwrap();

        let response = mount.handle(&get("/caf%C3%A9/index.html")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "<h1>café</h1>");

        let response = mount.handle(&get("/caf%C3%A9")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(header(&response, header::LOCATION), "/caf%C3%A9/");

        let response = mount.handle(&get("/caf%C3%A9/")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deflated_ranges() {
        let archive = archive().await;
        let request = Request::get("/demo/index.html")
            .header(header::RANGE, "bytes=1-2")
            .body(())
            .unwrap();
        let response = mount(&archive).handle(&request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&response, header::CONTENT_LENGTH), "2");
        assert_eq!(body(response).await, "h1");
    }

    #[tokio::test]
    async fn only_get_and_head() {
        let archive = archive().await;
        let mount = mount(&archive);

        let post = Request::post("/demo/index.html").body(()).unwrap();
        let response = mount.handle(&post).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(header(&response, header::ALLOW), "GET, HEAD");

        let head = Request::head("/demo/index.html").body(()).unwrap();
        let response = mount.handle(&head).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, header::CONTENT_LENGTH), "13");
        assert!(body(response).await.is_empty());
    }

    #[tokio::test]
    async fn byte_ranges() {
        let archive = archive().await;
        let mount = mount(&archive);

        let request = Request::get("/demo/notes.txt")
            .header(header::RANGE, "bytes=2-5")
            .body(())
            .unwrap();
        let response = mount.handle(&request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&response, header::CONTENT_RANGE), "bytes 2-5/10");
        assert_eq!(body(response).await, "2345");

        let request = Request::get("/demo/notes.txt")
            .header(header::RANGE, "bytes=-3")
            .body(())
            .unwrap();
        assert_eq!(body(mount.handle(&request).await).await, "789");

        let request = Request::get("/demo/notes.txt")
            .header(header::RANGE, "bytes=20-")
            .body(())
            .unwrap();
        let response = mount.handle(&request).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(header(&response, header::CONTENT_RANGE), "bytes */10");
    }

    #[tokio::test]
    async fn if_modified_since() {
        let archive = archive().await;
        let mount = mount(&archive);

        let response = mount.handle(&get("/demo/notes.txt")).await;
        let last_modified = header(&response, header::LAST_MODIFIED).to_string();

        let request = Request::get("/demo/notes.txt")
            .header(header::IF_MODIFIED_SINCE, last_modified)
            .body(())
            .unwrap();
        let response = mount.handle(&request).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(body(response).await.is_empty());

        let request = Request::get("/demo/notes.txt")
            .header(header::IF_MODIFIED_SINCE, "Mon, 01 Jan 1979 00:00:00 GMT")
            .body(())
            .unwrap();
        assert_eq!(mount.handle(&request).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn root_prefix_serves_everything() {
        let archive = archive().await;
        let mount = Mount::new(archive.fs(), Prefix::normalize(""));
        let response = mount.handle(&get("/outside.txt")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "secret");
    }

    #[tokio::test]
    async fn rejects_missing_or_file_directory() {
        let archive = archive().await;
        let fs = archive.fs();
        for directory in ["nope", "outside.txt"] {
            match Mount::for_directory(&fs, directory, Prefix::normalize("")) {
                Err(ServeError::RootNotDirectory(d)) => assert_eq!(d, directory),
                Err(e) => panic!("unexpected error {e}"),
                Ok(_) => panic!("mounted {directory}"),
            }
        }
    }

    #[tokio::test]
    async fn closed_archive_is_unavailable() {
        let mut archive = archive().await;
        let mount = mount(&archive);
        archive.close();
        let response = mount.handle(&get("/demo/index.html")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
