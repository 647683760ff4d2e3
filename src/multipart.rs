//! Streaming multipart/form-data parser
//!
//! Consumes the request body chunk by chunk, with no relation assumed
//! between chunk boundaries and line or part boundaries. Form fields are
//! collected into a key/value table; the file part is streamed to a
//! [`TempFileSpool`] as complete CRLF-terminated lines are drained, with a
//! forced flush once the unterminated tail grows past [`MAX_CONTENT_LINE`].
//!
//! The CRLF that terminates a file line is written one line behind: the
//! CRLF preceding the closing boundary belongs to the delimiter, not the
//! payload, and holding the previous terminator lets it be discarded
//! exactly when the next line turns out to be a boundary.

use crate::spool::TempFileSpool;
use bytes::BytesMut;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Flush threshold for an unterminated content line. Boundary lines are
/// assumed to be shorter than this.
pub const MAX_CONTENT_LINE: usize = 10240;

/// Parse failures, split by who is at fault.
#[derive(Debug, Error)]
pub enum MultipartError {
    /// The body violates multipart framing; answered with 400.
    #[error("malformed multipart body: {0}")]
    Malformed(&'static str),

    /// Spool creation or write failed; answered with 500.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Init,
    Headers,
    Content,
    Error,
}

/// Byte-driven parser for one multipart request body.
pub struct MultipartParser {
    state: ParseState,
    boundary: String,
    spool_dir: PathBuf,

    /// Undrained body bytes; at most one partial line at rest.
    line: BytesMut,
    /// Name of the form field currently being received.
    input_name: Option<String>,
    /// Declared filename of the `file` part.
    file_name: Option<String>,
    form_kvs: HashMap<String, String>,

    /// The previous file line ended in a CRLF that has not been written yet.
    recved_crlf: bool,
    spool: Option<TempFileSpool>,
}

impl MultipartParser {
    pub fn new(boundary: String, spool_dir: PathBuf) -> Self {
        Self {
            state: ParseState::Init,
            boundary,
            spool_dir,
            line: BytesMut::new(),
            input_name: None,
            file_name: None,
            form_kvs: HashMap::new(),
            recved_crlf: false,
            spool: None,
        }
    }

    /// Consume one body chunk. After an error the parser stays in the error
    /// state and absorbs further chunks without doing any work.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), MultipartError> {
        if self.state == ParseState::Error {
            return Ok(());
        }
        self.line.extend_from_slice(chunk);
        match self.drain() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ParseState::Error;
                Err(e)
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.state == ParseState::Error
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form_kvs.get(key).map(String::as_str)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn spool_path(&self) -> Option<&Path> {
        self.spool.as_ref().map(TempFileSpool::path)
    }

    fn drain(&mut self) -> Result<(), MultipartError> {
        loop {
            let progressed = match self.state {
                ParseState::Init => self.step_init()?,
                ParseState::Headers => self.step_headers()?,
                ParseState::Content => {
                    if self.input_name.as_deref() == Some("file") {
                        self.step_file_data()?
                    } else {
                        self.step_form_field()?
                    }
                }
                ParseState::Error => false,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn step_init(&mut self) -> Result<bool, MultipartError> {
        let Some(line) = take_line(&mut self.line) else {
            return Ok(false);
        };
        if !contains_token(&line, self.boundary.as_bytes()) {
            return Err(MultipartError::Malformed("first line carries no boundary"));
        }
        self.state = ParseState::Headers;
        Ok(true)
    }

    fn step_headers(&mut self) -> Result<bool, MultipartError> {
        let Some(line) = take_line(&mut self.line) else {
            return Ok(false);
        };
        if line.is_empty() {
            // Blank line: headers of this part are done.
            if self.input_name.as_deref() == Some("file") {
                let name = self
                    .file_name
                    .as_deref()
                    .ok_or(MultipartError::Malformed("file part without filename"))?;
                self.spool = Some(TempFileSpool::create(&self.spool_dir, name)?);
                self.recved_crlf = false;
            }
            debug!(field = ?self.input_name, "part content begins");
            self.state = ParseState::Content;
        } else {
            self.parse_mime_header(&line)?;
        }
        Ok(true)
    }

    fn step_form_field(&mut self) -> Result<bool, MultipartError> {
        let Some(line) = take_line(&mut self.line) else {
            return Ok(false);
        };
        if contains_token(&line, self.boundary.as_bytes()) {
            self.input_name = None;
            self.state = ParseState::Headers;
        } else if let Some(name) = &self.input_name {
            let value = String::from_utf8_lossy(&line).into_owned();
            debug!(field = %name, "form field received");
            self.form_kvs.insert(name.clone(), value);
        }
        Ok(true)
    }

    fn step_file_data(&mut self) -> Result<bool, MultipartError> {
        let Some(line) = take_line(&mut self.line) else {
            // No complete line. Once the tail outgrows any plausible
            // boundary line, flush it so memory stays bounded.
            if self.line.len() >= MAX_CONTENT_LINE {
                self.flush_partial()?;
            }
            return Ok(false);
        };

        if contains_token(&line, self.boundary.as_bytes()) {
            // The held CRLF belonged to the delimiter; drop it.
            self.input_name = None;
            self.state = ParseState::Headers;
            return Ok(true);
        }

        let pending_crlf = self.recved_crlf;
        let spool = self.spool_mut()?;
        if pending_crlf {
            spool.write_all(b"\r\n")?;
        }
        spool.write_all(&line)?;
        self.recved_crlf = true;
        Ok(true)
    }

    fn flush_partial(&mut self) -> Result<(), MultipartError> {
        let pending = self.line.split();
        debug!(len = pending.len(), "flushing unterminated file data");
        let pending_crlf = std::mem::replace(&mut self.recved_crlf, false);
        let spool = self.spool_mut()?;
        if pending_crlf {
            spool.write_all(b"\r\n")?;
        }
        spool.write_all(&pending)?;
        Ok(())
    }

    fn spool_mut(&mut self) -> Result<&mut TempFileSpool, MultipartError> {
        self.spool
            .as_mut()
            .ok_or(MultipartError::Malformed("file content before spool open"))
    }

    fn parse_mime_header(&mut self, line: &[u8]) -> Result<(), MultipartError> {
        let header = String::from_utf8_lossy(line);
        let Some((name, rest)) = header.split_once(':') else {
            return Err(MultipartError::Malformed("mime header has no colon"));
        };
        // Only Content-Disposition matters; Content-Type and the rest are
        // accepted and ignored.
        if name != "Content-Disposition" {
            return Ok(());
        }

        let params: Vec<&str> = rest.split(';').map(str::trim).collect();
        if params.len() < 2 {
            return Err(MultipartError::Malformed(
                "too few Content-Disposition params",
            ));
        }
        if !params[0].eq_ignore_ascii_case("form-data") {
            return Err(MultipartError::Malformed(
                "Content-Disposition is not form-data",
            ));
        }

        let input_name = params
            .iter()
            .find(|p| param_has_prefix(p, "name"))
            .and_then(|p| mime_param_value(p))
            .ok_or(MultipartError::Malformed("no field name given"))?;
        self.input_name = Some(input_name.to_string());

        if input_name == "file" {
            let file_name = params
                .iter()
                .find(|p| param_has_prefix(p, "filename"))
                .and_then(|p| mime_param_value(p))
                .ok_or(MultipartError::Malformed("no filename given"))?;
            self.file_name = Some(file_name.to_string());
        }
        Ok(())
    }
}

/// Extract the boundary parameter from a `Content-Type` request header.
/// Returns None unless the type is `multipart/form-data` with a non-empty
/// boundary.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let params: Vec<&str> = content_type.split(';').map(str::trim).collect();
    if params.len() < 2 || !params[0].eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    let param = params.iter().find(|p| param_has_prefix(p, "boundary"))?;
    let (_, value) = param.split_once('=')?;
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

/// Value of a quoted MIME parameter: the text between the first and last
/// double quote.
fn mime_param_value(param: &str) -> Option<&str> {
    let first = param.find('"')?;
    let last = param.rfind('"')?;
    if first == last {
        return None;
    }
    Some(&param[first + 1..last])
}

fn param_has_prefix(param: &str, prefix: &str) -> bool {
    param.len() >= prefix.len()
        && param.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Drain one strictly CRLF-terminated line, without its terminator.
fn take_line(buf: &mut BytesMut) -> Option<BytesMut> {
    let pos = find_crlf(buf)?;
    let mut line = buf.split_to(pos + 2);
    line.truncate(pos);
    Some(line)
}

/// Find the position of \r\n in a byte slice
fn find_crlf(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == b'\r' && data[i + 1] == b'\n')
}

fn contains_token(line: &[u8], token: &[u8]) -> bool {
    !token.is_empty() && line.windows(token.len()).any(|w| w == token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const BOUNDARY: &str = "AaB03x";

    fn upload_body(parent_dir: &str, filename: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"parent_dir\"\r\n\r\n",
        );
        body.extend_from_slice(parent_dir.as_bytes());
        body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    /// Feed `body` in chunks of `chunk` bytes and return the parser plus the
    /// spooled content.
    fn parse_chunked(dir: &TempDir, body: &[u8], chunk: usize) -> (MultipartParser, Vec<u8>) {
        let mut parser =
            MultipartParser::new(BOUNDARY.to_string(), dir.path().to_path_buf());
        for piece in body.chunks(chunk.max(1)) {
            parser.feed(piece).unwrap();
        }
        let spooled = parser
            .spool_path()
            .map(|p| std::fs::read(p).unwrap())
            .unwrap_or_default();
        (parser, spooled)
    }

    #[test]
    fn test_simple_body() {
        let dir = TempDir::new().unwrap();
        let body = upload_body("/docs", "notes.txt", b"hello\r\nworld");
        let (parser, spooled) = parse_chunked(&dir, &body, body.len());

        assert_eq!(parser.form_value("parent_dir"), Some("/docs"));
        assert_eq!(parser.file_name(), Some("notes.txt"));
        assert_eq!(spooled, b"hello\r\nworld");
        assert!(!parser.is_error());
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        // Chunk boundaries land mid-CRLF, mid-boundary-token and mid-header.
        let dir = TempDir::new().unwrap();
        let body = upload_body("/d", "f.bin", b"abc\r\ndef\r\n");
        let (parser, spooled) = parse_chunked(&dir, &body, 1);

        assert_eq!(parser.form_value("parent_dir"), Some("/d"));
        assert_eq!(spooled, b"abc\r\ndef\r\n");
    }

    #[test]
    fn test_payload_without_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let body = upload_body("/d", "f.txt", b"no trailing newline");
        let (_, spooled) = parse_chunked(&dir, &body, 7);
        assert_eq!(spooled, b"no trailing newline");
    }

    #[test]
    fn test_payload_with_trailing_crlf_kept() {
        let dir = TempDir::new().unwrap();
        let body = upload_body("/d", "f.txt", b"line\r\n");
        let (_, spooled) = parse_chunked(&dir, &body, 3);
        assert_eq!(spooled, b"line\r\n");
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let body = upload_body("/d", "empty.txt", b"");
        let (parser, spooled) = parse_chunked(&dir, &body, 11);
        assert_eq!(spooled, b"");
        assert!(parser.spool_path().is_some());
    }

    #[test]
    fn test_forced_flush_of_long_unterminated_line() {
        let dir = TempDir::new().unwrap();
        let payload = vec![b'a'; MAX_CONTENT_LINE];
        let mut parser =
            MultipartParser::new(BOUNDARY.to_string(), dir.path().to_path_buf());

        let mut head = Vec::new();
        head.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        head.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\r\n",
        );
        parser.feed(&head).unwrap();
        parser.feed(&payload).unwrap();

        // The whole tail was flushed before any terminator arrived.
        let spool = parser.spool_path().unwrap().to_path_buf();
        assert_eq!(std::fs::read(&spool).unwrap().len(), MAX_CONTENT_LINE);

        parser.feed(format!("\r\n--{BOUNDARY}--\r\n").as_bytes()).unwrap();
        assert_eq!(std::fs::read(&spool).unwrap(), payload);
    }

    #[test]
    fn test_flush_then_terminated_remainder() {
        // Chunks small enough that the buffer crosses the flush threshold
        // several times before the closing boundary arrives.
        let dir = TempDir::new().unwrap();
        let payload = vec![b'x'; 3 * MAX_CONTENT_LINE];
        let body = upload_body("/d", "big.bin", &payload);
        let (_, spooled) = parse_chunked(&dir, &body, 4096);
        assert_eq!(spooled, payload);
    }

    #[test]
    fn test_resent_field_keeps_last_value() {
        let dir = TempDir::new().unwrap();
        let mut body = Vec::new();
        for value in ["/first", "/second"] {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                b"Content-Disposition: form-data; name=\"parent_dir\"\r\n\r\n",
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let (parser, _) = parse_chunked(&dir, &body, 5);
        assert_eq!(parser.form_value("parent_dir"), Some("/second"));
    }

    #[test]
    fn test_multiline_field_keeps_last_line() {
        let dir = TempDir::new().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"notes\"\r\n\r\n");
        body.extend_from_slice(b"one\r\ntwo\r\n");
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let (parser, _) = parse_chunked(&dir, &body, body.len());
        assert_eq!(parser.form_value("notes"), Some("two"));
    }

    #[test]
    fn test_first_line_must_carry_boundary() {
        let dir = TempDir::new().unwrap();
        let mut parser =
            MultipartParser::new(BOUNDARY.to_string(), dir.path().to_path_buf());
        let err = parser.feed(b"preamble junk\r\n").unwrap_err();
        assert!(matches!(err, MultipartError::Malformed(_)));
        assert!(parser.is_error());

        // Further chunks are absorbed without work.
        assert!(parser.feed(b"more\r\n").is_ok());
    }

    #[test]
    fn test_boundary_matched_by_substring() {
        // The boundary is recognized anywhere in the line, not only as a
        // leading "--" delimiter.
        let dir = TempDir::new().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(format!("junk --{BOUNDARY} junk\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"k\"\r\n\r\n");
        body.extend_from_slice(b"v\r\n");
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let (parser, _) = parse_chunked(&dir, &body, body.len());
        assert_eq!(parser.form_value("k"), Some("v"));
    }

    #[test]
    fn test_header_without_colon_rejected() {
        let dir = TempDir::new().unwrap();
        let mut parser =
            MultipartParser::new(BOUNDARY.to_string(), dir.path().to_path_buf());
        let body = format!("--{BOUNDARY}\r\nnot a header\r\n");
        assert!(matches!(
            parser.feed(body.as_bytes()),
            Err(MultipartError::Malformed(_))
        ));
    }

    #[test]
    fn test_file_field_requires_filename() {
        let dir = TempDir::new().unwrap();
        let mut parser =
            MultipartParser::new(BOUNDARY.to_string(), dir.path().to_path_buf());
        let body =
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"\r\n");
        assert!(matches!(
            parser.feed(body.as_bytes()),
            Err(MultipartError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_headers_ignored() {
        let dir = TempDir::new().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"X-Custom: whatever\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"k\"\r\n");
        body.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
        body.extend_from_slice(b"v\r\n");
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let (parser, _) = parse_chunked(&dir, &body, 4);
        assert_eq!(parser.form_value("k"), Some("v"));
    }

    #[test]
    fn test_spool_create_failure_is_io() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let mut parser = MultipartParser::new(BOUNDARY.to_string(), missing);
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f\"\r\n\r\n"
        );
        assert!(matches!(
            parser.feed(body.as_bytes()),
            Err(MultipartError::Io(_))
        ));
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=AaB03x"),
            Some("AaB03x".to_string())
        );
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data;  boundary=xyz"),
            Some("xyz".to_string())
        );
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
        assert_eq!(
            boundary_from_content_type("application/json; boundary=x"),
            None
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary="),
            None
        );
    }

    #[test]
    fn test_mime_param_value() {
        assert_eq!(mime_param_value("name=\"file\""), Some("file"));
        assert_eq!(mime_param_value("filename=\"a \\\"b\\\".txt\""), Some("a \\\"b\\\".txt"));
        assert_eq!(mime_param_value("name=file"), None);
        assert_eq!(mime_param_value("name=\"unterminated"), None);
    }

    proptest! {
        /// Spooled bytes never depend on where the transport cut the body.
        #[test]
        fn prop_chunk_split_invariance(
            segments in proptest::collection::vec("[a-z ]{0,40}", 0..8),
            chunk in 1usize..64,
        ) {
            let payload = segments.join("\r\n");
            let dir = TempDir::new().unwrap();
            let body = upload_body("/p", "f.txt", payload.as_bytes());

            let (whole, spool_whole) = parse_chunked(&dir, &body, body.len());
            let (split, spool_split) = parse_chunked(&dir, &body, chunk);

            prop_assert_eq!(spool_whole, payload.as_bytes());
            prop_assert_eq!(spool_split, payload.as_bytes());
            prop_assert_eq!(whole.form_value("parent_dir"), split.form_value("parent_dir"));
        }
    }
}
