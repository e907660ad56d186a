//! Static-file response builder.
//!
//! Resolves the request path under the document root, derives the status
//! from the file's metadata, and emits the status line and headers into the
//! connection's write buffer. The body is a memory-mapped file exposed via
//! [`Response::file`] so the connection can send (headers, file) with one
//! gathering write; when the file cannot be opened or mapped, a small HTML
//! error page is inlined into the write buffer instead.

use crate::mapped::MappedFile;
use io_poll::Buffer;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn status_reason(code: u16) -> Option<&'static str> {
    match code {
        200 => Some("OK"),
        400 => Some("Bad Request"),
        403 => Some("Forbidden"),
        404 => Some("Not Found"),
        _ => None,
    }
}

fn error_page(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

fn mime_from_suffix(path: &str) -> &'static str {
    let suffix = match path.rfind('.') {
        Some(idx) => &path[idx..],
        None => return "text/plain",
    };
    match suffix {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/nsword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}

/// Response builder state for one request/response cycle.
pub struct Response {
    code: Option<u16>,
    keep_alive: bool,
    path: String,
    root: PathBuf,
    file: Option<MappedFile>,
}

impl Response {
    pub fn new() -> Response {
        Response {
            code: None,
            keep_alive: false,
            path: String::new(),
            root: PathBuf::new(),
            file: None,
        }
    }

    /// Prepare for a new response. Any previous file mapping is dropped.
    ///
    /// `code` of `None` means "derive from the file's metadata".
    pub fn init(&mut self, root: &Path, path: &str, keep_alive: bool, code: Option<u16>) {
        self.file = None;
        self.code = code;
        self.keep_alive = keep_alive;
        self.path = path.to_string();
        self.root = root.to_path_buf();
    }

    /// Emit the status line and headers into `buf` and map the body file.
    pub fn build(&mut self, buf: &mut Buffer) {
        match fs::metadata(self.full_path()) {
            Err(_) => self.code = Some(404),
            Ok(meta) if meta.is_dir() => self.code = Some(404),
            Ok(meta) if meta.permissions().mode() & 0o004 == 0 => self.code = Some(403),
            Ok(_) => {
                if self.code.is_none() {
                    self.code = Some(200);
                }
            }
        }
        if let Some(page) = self.code.and_then(error_page) {
            self.path = page.to_string();
        }
        self.append_status_line(buf);
        self.append_headers(buf);
        self.append_content(buf);
    }

    /// The status code. Meaningful after `build`.
    pub fn code(&self) -> u16 {
        self.code.unwrap_or(200)
    }

    /// The mapped file body, if any.
    pub fn file(&self) -> Option<&[u8]> {
        self.file.as_ref().map(|m| m.as_slice())
    }

    /// Length of the mapped file body.
    pub fn file_len(&self) -> usize {
        self.file.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    fn full_path(&self) -> PathBuf {
        self.root.join(self.path.trim_start_matches('/'))
    }

    fn append_status_line(&mut self, buf: &mut Buffer) {
        let code = self.code.unwrap_or(200);
        let (code, reason) = match status_reason(code) {
            Some(reason) => (code, reason),
            None => (400, "Bad Request"),
        };
        self.code = Some(code);
        buf.append(format!("HTTP/1.1 {} {}\r\n", code, reason).as_bytes());
    }

    fn append_headers(&self, buf: &mut Buffer) {
        buf.append(b"Connection: ");
        if self.keep_alive {
            buf.append(b"keep-alive\r\n");
            buf.append(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append(b"close\r\n");
        }
        buf.append(format!("Content-type: {}\r\n", mime_from_suffix(&self.path)).as_bytes());
    }

    fn append_content(&mut self, buf: &mut Buffer) {
        match MappedFile::open(&self.full_path()) {
            Ok(map) => {
                buf.append(format!("Content-length: {}\r\n\r\n", map.len()).as_bytes());
                self.file = Some(map);
            }
            Err(err) => {
                tracing::debug!(path = %self.path, %err, "falling back to inline error body");
                self.error_content(buf, "File NotFound!");
            }
        }
    }

    /// Append a minimal HTML error body (used when the file cannot be
    /// opened or mapped).
    pub fn error_content(&self, buf: &mut Buffer, message: &str) {
        let code = self.code.unwrap_or(400);
        let reason = status_reason(code).unwrap_or("Bad Request");
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n\
             <p>{}</p><hr><em>hearth</em></body></html>",
            code, reason, message
        );
        buf.append(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
        buf.append(body.as_bytes());
    }
}

impl Default for Response {
    fn default() -> Response {
        Response::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    /// Build a scratch document root with the standard error pages.
    fn scratch_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "hearth-response-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&root).unwrap();
        for page in ["400.html", "403.html", "404.html"] {
            let mut f = File::create(root.join(page)).unwrap();
            write!(f, "<html>{}</html>", page).unwrap();
        }
        root
    }

    fn write_file(root: &Path, name: &str, contents: &[u8]) {
        let mut f = File::create(root.join(name)).unwrap();
        f.write_all(contents).unwrap();
    }

    fn built(root: &Path, path: &str, keep_alive: bool, code: Option<u16>) -> (Response, String) {
        let mut resp = Response::new();
        resp.init(root, path, keep_alive, code);
        let mut buf = Buffer::new();
        resp.build(&mut buf);
        let head = buf.take_all_string();
        (resp, head)
    }

    #[test]
    fn test_existing_file_yields_200_with_mapping() {
        let root = scratch_root();
        write_file(&root, "index.html", b"<html>home</html>");

        let (resp, head) = built(&root, "/index.html", true, Some(200));
        assert_eq!(resp.code(), 200);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(head.contains("keep-alive: max=6, timeout=120\r\n"));
        assert!(head.contains("Content-type: text/html\r\n"));
        assert!(head.ends_with("Content-length: 17\r\n\r\n"));
        assert_eq!(resp.file(), Some(&b"<html>home</html>"[..]));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_file_serves_404_page() {
        let root = scratch_root();
        let (resp, head) = built(&root, "/absent.html", false, Some(200));
        assert_eq!(resp.code(), 404);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert_eq!(resp.file(), Some(&b"<html>404.html</html>"[..]));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_directory_serves_404_page() {
        let root = scratch_root();
        fs::create_dir(root.join("subdir")).unwrap();
        let (resp, _) = built(&root, "/subdir", false, Some(200));
        assert_eq!(resp.code(), 404);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_unreadable_file_serves_403_page() {
        let root = scratch_root();
        write_file(&root, "secret.html", b"<html>secret</html>");
        fs::set_permissions(
            root.join("secret.html"),
            fs::Permissions::from_mode(0o640),
        )
        .unwrap();

        let (resp, head) = built(&root, "/secret.html", false, Some(200));
        assert_eq!(resp.code(), 403);
        assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert_eq!(resp.file(), Some(&b"<html>403.html</html>"[..]));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_parse_failure_code_wins_over_healthy_file() {
        let root = scratch_root();
        write_file(&root, "index.html", b"<html>home</html>");
        let (resp, head) = built(&root, "/index.html", false, Some(400));
        assert_eq!(resp.code(), 400);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(resp.file(), Some(&b"<html>400.html</html>"[..]));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_error_page_missing_falls_back_to_inline_body() {
        let root = std::env::temp_dir().join(format!(
            "hearth-response-bare-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&root).unwrap();

        let (resp, head) = built(&root, "/absent.html", false, Some(200));
        assert_eq!(resp.code(), 404);
        assert!(resp.file().is_none());
        assert!(head.contains("<html><title>Error</title>"));
        assert!(head.contains("404 : Not Found"));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_from_suffix("/a.html"), "text/html");
        assert_eq!(mime_from_suffix("/a.png"), "image/png");
        assert_eq!(mime_from_suffix("/a.js"), "text/javascript");
        assert_eq!(mime_from_suffix("/archive.tar"), "application/x-tar");
        assert_eq!(mime_from_suffix("/no-suffix"), "text/plain");
        assert_eq!(mime_from_suffix("/a.weird"), "text/plain");
    }

    #[test]
    fn test_unknown_status_becomes_400() {
        let root = scratch_root();
        write_file(&root, "index.html", b"x");
        let (resp, head) = built(&root, "/index.html", false, Some(999));
        assert_eq!(resp.code(), 400);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        fs::remove_dir_all(&root).unwrap();
    }
}
