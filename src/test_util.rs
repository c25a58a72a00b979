use crate::prelude::*;

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// A tiny in-process HTTP server for tests. Serves canned responses by path
/// (and optionally static files from a directory, with `Range:` support), and
/// records every request so tests can assert on methods, ordering, and
/// headers, in particular on which requests carried credentials.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    thread: Option<JoinHandle<()>>,
}

struct ServerState {
    root: Option<PathBuf>,
    routes: Mutex<HashMap<String, CannedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    stop: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|value| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// When set, advertise the full Content-Length but only send this many
    /// bytes before hanging up, to simulate a connection dying mid-download.
    pub truncate_at: Option<usize>,
}

impl CannedResponse {
    pub fn status(status: u16) -> CannedResponse {
        CannedResponse {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            truncate_at: None,
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> CannedResponse {
        CannedResponse {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            truncate_at: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> CannedResponse {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn truncated_at(mut self, length: usize) -> CannedResponse {
        self.truncate_at = Some(length);
        self
    }
}

impl TestServer {
    pub fn new() -> TestServer {
        TestServer::start(None)
    }

    /// Serve files under `root` for any path without a canned route, honoring
    /// byte-range requests the way a static file host would.
    pub fn serving_dir(root: &Path) -> TestServer {
        TestServer::start(Some(root.to_path_buf()))
    }

    fn start(root: Option<PathBuf>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            root,
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        });
        let loop_state = state.clone();
        let thread = std::thread::spawn(move || {
            for stream in listener.incoming() {
                if loop_state.stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Ok(stream) = stream {
                    let _ = handle_connection(&loop_state, stream);
                }
            }
        });
        TestServer {
            addr,
            state,
            thread: Some(thread),
        }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!(
            "http://{}/{}",
            self.addr,
            path.trim_start_matches('/')
        ))
        .unwrap()
    }

    pub fn route(&self, path: &str, response: CannedResponse) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.stop.store(true, Ordering::SeqCst);
        // wake the accept loop so it notices the stop flag
        let _ = TcpStream::connect(self.addr);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn handle_connection(state: &ServerState, stream: TcpStream) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    if request_line.trim().is_empty() {
        // the wake-up connection from Drop
        return Ok(());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let raw_path = parts.next().unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let mut body = Vec::new();
    if let Some(length) = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
    {
        body.resize(length, 0);
        reader.read_exact(&mut body)?;
    }

    let path = raw_path
        .split('?')
        .next()
        .unwrap_or(&raw_path)
        .to_string();
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        headers: headers.clone(),
        body,
    });

    let canned = state.routes.lock().unwrap().get(&path).cloned();
    let response = match canned {
        Some(response) => response,
        None => match &state.root {
            Some(root) => file_response(root, &path, headers.get("range").map(String::as_str)),
            None => CannedResponse::status(404),
        },
    };
    write_response(stream, &method, &response)
}

fn file_response(root: &Path, path: &str, range: Option<&str>) -> CannedResponse {
    let full = root.join(path.trim_start_matches('/'));
    let data = match std::fs::read(&full) {
        Ok(data) => data,
        Err(_) => return CannedResponse::status(404),
    };
    let etag = format!("\"{}\"", data.len());
    match range {
        Some(spec) if spec.starts_with("bytes=") => {
            match parse_range(&spec["bytes=".len()..], data.len() as u64) {
                Some((start, end)) => CannedResponse {
                    status: 206,
                    headers: vec![
                        (
                            "Content-Range".to_string(),
                            format!("bytes {}-{}/{}", start, end, data.len()),
                        ),
                        ("etag".to_string(), etag),
                    ],
                    body: data[start as usize..=end as usize].to_vec(),
                    truncate_at: None,
                },
                None => CannedResponse::status(416).with_header(
                    "Content-Range",
                    &format!("bytes */{}", data.len()),
                ),
            }
        }
        _ => CannedResponse::ok(data).with_header("etag", &etag),
    }
}

fn parse_range(spec: &str, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    if let Some(suffix) = spec.strip_prefix('-') {
        let count: u64 = suffix.parse().ok()?;
        if count == 0 {
            return None;
        }
        return Some((total.saturating_sub(count), total - 1));
    }
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    if start >= total {
        return None;
    }
    let end = match end {
        "" => total - 1,
        end => end.parse::<u64>().ok()?.min(total - 1),
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

fn write_response(
    mut stream: TcpStream,
    method: &str,
    response: &CannedResponse,
) -> std::io::Result<()> {
    let reason = match response.status {
        200 => "OK",
        206 => "Partial Content",
        302 => "Found",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        _ => "Response",
    };
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!("content-length: {}\r\n", response.body.len()));
    head.push_str("connection: close\r\n\r\n");
    stream.write_all(head.as_bytes())?;
    if method != "HEAD" {
        let body = match response.truncate_at {
            Some(length) => &response.body[..length.min(response.body.len())],
            None => &response.body[..],
        };
        stream.write_all(body)?;
    }
    stream.flush()
}

/// Write a single-column `required int64` parquet file, for fixtures.
pub fn write_parquet_i64(path: &Path, column: &str, values: &[i64]) {
    use parquet::data_type::Int64Type;
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use std::sync::Arc as StdArc;

    let schema = StdArc::new(
        parse_message_type(&format!("message table {{ required int64 {}; }}", column))
            .unwrap(),
    );
    let file = std::fs::File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(
        file,
        schema,
        StdArc::new(WriterProperties::builder().build()),
    )
    .unwrap();
    let mut row_group = writer.next_row_group().unwrap();
    if let Some(mut column_writer) = row_group.next_column().unwrap() {
        column_writer
            .typed::<Int64Type>()
            .write_batch(values, None, None)
            .unwrap();
        column_writer.close().unwrap();
    }
    row_group.close().unwrap();
    writer.close().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_routes_and_recording() {
        let server = TestServer::new();
        server.route("/hello", CannedResponse::ok("hi").with_header("etag", "\"e\""));

        let agent = ureq::Agent::new();
        let response = agent.request_url("GET", &server.url("hello")).call().unwrap();
        assert_eq!(response.header("etag"), Some("\"e\""));
        assert_eq!(response.into_string().unwrap(), "hi");

        use ureq::OrAnyStatus;
        let missing = agent
            .request_url("GET", &server.url("nope"))
            .call()
            .or_any_status()
            .unwrap();
        assert_eq!(missing.status(), 404);

        assert_eq!(server.request_count("GET", "/hello"), 1);
        assert_eq!(server.request_count("GET", "/nope"), 1);
    }

    #[test]
    fn test_head_gets_headers_but_no_body() {
        let server = TestServer::new();
        server.route("/x", CannedResponse::ok("12345").with_header("etag", "\"e\""));
        let agent = ureq::Agent::new();
        let response = agent.request_url("HEAD", &server.url("x")).call().unwrap();
        assert_eq!(response.header("etag"), Some("\"e\""));
        assert_eq!(response.header("content-length"), Some("5"));
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!(parse_range("0-9", 100), Some((0, 9)));
        assert_eq!(parse_range("90-200", 100), Some((90, 99)));
        assert_eq!(parse_range("-10", 100), Some((90, 99)));
        assert_eq!(parse_range("-200", 100), Some((0, 99)));
        assert_eq!(parse_range("100-200", 100), None);
        assert_eq!(parse_range("5-2", 100), None);
    }
}
