use crate::prelude::*;

use std::cmp;
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};
use ureq::Agent;

use regex::Regex;

// Semi-arbitrary; should be large enough to catch a parquet footer + page
// index in one round-trip for typical files.
const LAZY_FETCH_SIZE: u64 = 64_000;

/// A `Read + Seek` view of a remote file, pulled in on demand via HTTP
/// `Range:` requests. Fetched chunks are kept in a gap-tracking map so
/// repeated reads over the same region hit memory.
pub struct LazyRemoteFile {
    agent: Agent,
    url: Url,
    auth_header: Option<String>,
    loaded: BTreeMap<u64, Vec<u8>>,
    length: u64,
    seek_pos: u64,
}

fn slurp(mut data: Box<dyn Read>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    data.read_to_end(&mut buf)?;
    Ok(buf)
}

impl Seek for LazyRemoteFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let LazyRemoteFile {
            length, seek_pos, ..
        } = self;
        // Basic structure cribbed from io::Cursor
        // NB: this allows seeking past the end of the file (and then read just
        // returns EOF, I guess)
        let (base_pos, offset) = match pos {
            SeekFrom::Start(offset) => {
                *seek_pos = offset;
                return Ok(offset);
            }
            SeekFrom::End(offset) => (*length, offset),
            SeekFrom::Current(offset) => (*seek_pos, offset),
        };
        let new_pos = if offset >= 0 {
            base_pos.checked_add(offset as u64)
        } else {
            base_pos.checked_sub((offset.wrapping_neg()) as u64)
        };
        match new_pos {
            Some(n) => {
                *seek_pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

enum RangeResponse {
    Partial {
        offset: u64,
        total_len: u64,
        data: Box<dyn Read>,
    },
    Complete(Box<dyn Read>),
}

fn fetch_range(
    agent: &Agent,
    url: &Url,
    auth_header: Option<&str>,
    range_header: &str,
) -> Result<RangeResponse> {
    // The full syntax has a bunch of possibilities that this doesn't account for:
    //   https://datatracker.ietf.org/doc/html/rfc7233#section-4.2
    // but this is the only format that's actually *useful* to us.
    static CONTENT_RANGE_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^bytes ([0-9]+)-[0-9]+/([0-9]+)$").unwrap());

    debug!("range read {} on {}", range_header, url);

    let mut req = agent.request_url("GET", url).set("Range", range_header);
    if let Some(auth) = auth_header {
        req = req.set("Authorization", auth);
    }
    let response = super::retry::call_with_retry(req)
        .with_context(|| format!("range request to {} failed", url))?;

    Ok(match response.status() {
        // 206 Partial Content
        206 => match response.header("Content-Range") {
            None => bail!("range response is missing Content-Range"),
            Some(content_range) => match CONTENT_RANGE_RE.captures(content_range) {
                None => bail!("failed to parse Content-Range"),
                Some(captures) => {
                    // unwraps safe because groups always match a valid int
                    let offset: u64 = captures.get(1).unwrap().as_str().parse()?;
                    let total_len: u64 = captures.get(2).unwrap().as_str().parse()?;
                    RangeResponse::Partial {
                        offset,
                        total_len,
                        data: Box::new(response.into_reader()),
                    }
                }
            },
        },
        // 200 Ok -> server doesn't like Range: requests and is just sending the full
        // data
        200 => RangeResponse::Complete(Box::new(response.into_reader())),
        status => bail!("expected 200 or 206 HTTP response, not {}", status),
    })
}

impl LazyRemoteFile {
    fn load_range(&mut self, offset: u64, length: u64) -> Result<()> {
        match fetch_range(
            &self.agent,
            &self.url,
            self.auth_header.as_deref(),
            &format!("bytes={}-{}", offset, offset.saturating_add(length) - 1),
        )? {
            RangeResponse::Partial { offset, data, .. } => {
                self.loaded.insert(offset, slurp(data)?);
                Ok(())
            }
            RangeResponse::Complete(_) => {
                bail!("server abruptly stopped understanding range requests?!?")
            }
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Read for LazyRemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        fn copy_loaded(
            offset: u64,
            loaded: &BTreeMap<u64, Vec<u8>>,
            buf: &mut [u8],
        ) -> Option<usize> {
            // find the btree entry that's closest to the requested offset, if any
            match loaded.range(..=offset).next_back() {
                None => None,
                Some((loaded_offset, loaded_data)) => {
                    if let Ok(slide) =
                        usize::try_from(offset.saturating_sub(*loaded_offset))
                    {
                        if slide < loaded_data.len() {
                            let usable_loaded_data = &loaded_data[slide..];
                            let len = cmp::min(buf.len(), usable_loaded_data.len());
                            buf[..len].copy_from_slice(&usable_loaded_data[..len]);
                            Some(len)
                        } else {
                            None
                        }
                    } else {
                        None
                    }
                }
            }
        }

        fn fix_err<T, E>(input: std::result::Result<T, E>) -> std::io::Result<T>
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            use std::io::{Error, ErrorKind};
            match input {
                Ok(t) => Ok(t),
                Err(e) => Err(Error::new(ErrorKind::Other, e)),
            }
        }

        let bytes_wanted =
            cmp::min(buf.len() as u64, self.length.saturating_sub(self.seek_pos));
        if bytes_wanted == 0 {
            return Ok(0);
        }
        // maybe we already have it in cache?
        if let Some(len) = copy_loaded(self.seek_pos, &self.loaded, buf) {
            self.seek_pos = self.seek_pos.saturating_add(fix_err(len.try_into())?);
            return Ok(len);
        }
        // otherwise, we need to fetch + fill in the cache
        // first find the empty gap around our current position
        let gap_start = match self.loaded.range(..=self.seek_pos).next_back() {
            Some((loaded_offset, loaded_data)) => {
                loaded_offset + (loaded_data.len() as u64)
            }
            None => 0,
        };
        let gap_end = match self.loaded.range(self.seek_pos + 1..).next() {
            Some((loaded_offset, _)) => *loaded_offset,
            None => self.length,
        };
        let fetch_start = if gap_end - self.seek_pos < LAZY_FETCH_SIZE {
            gap_end.saturating_sub(LAZY_FETCH_SIZE)
        } else {
            self.seek_pos
        };
        let fetch_end = fetch_start + LAZY_FETCH_SIZE;
        let fetch_start = fetch_start.clamp(gap_start, gap_end);
        let fetch_end = fetch_end.clamp(gap_start, gap_end);
        fix_err(self.load_range(fetch_start, fetch_end - fetch_start))?;
        // now it's definitely in cache
        if let Some(len) = copy_loaded(self.seek_pos, &self.loaded, buf) {
            self.seek_pos = self.seek_pos.saturating_add(fix_err(len.try_into())?);
            return Ok(len);
        }
        unreachable!("and you may ask yourself, well, how did I get here?")
    }
}

impl LazyRemoteFile {
    pub fn new(agent: &Agent, url: &Url, auth_token: Option<&str>) -> Result<LazyRemoteFile> {
        let mut remote = LazyRemoteFile {
            agent: agent.clone(),
            url: url.clone(),
            auth_header: auth_token.map(|token| format!("Bearer {}", token)),
            loaded: BTreeMap::new(),
            length: 0,
            seek_pos: 0,
        };
        // Fetch the tail straight away: the first thing a parquet reader asks
        // for is the footer, and this also tells us the total length.
        match fetch_range(
            &remote.agent,
            url,
            remote.auth_header.as_deref(),
            &format!("bytes=-{}", LAZY_FETCH_SIZE),
        )? {
            RangeResponse::Partial {
                offset,
                total_len,
                data,
            } => {
                remote.length = total_len;
                remote.loaded.insert(offset, slurp(data)?);
            }
            RangeResponse::Complete(data) => {
                warn!(
                    "server doesn't support range requests; fetching whole file into memory: {}",
                    url.as_str()
                );
                let buf = slurp(data)?;
                // unwrap safe because: converting usize to u64
                remote.length = buf.len().try_into().unwrap();
                remote.loaded.insert(0, buf);
            }
        }
        Ok(remote)
    }
}
