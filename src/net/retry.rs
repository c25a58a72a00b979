use std::time::Duration;
use ureq::OrAnyStatus;

const SLEEP_TIMES: &[u64] = &[250, 500, 1000, 2000, 4000]; // milliseconds
// Copied from pip/_internal/network/session.py
const RETRY_STATUS: &[u16] = &[500, 503, 520, 527];
// https://docs.rs/ureq/2.1.1/ureq/enum.ErrorKind.html
// This is my attempt to pick out the ones that seem (potentially) transient
use ureq::ErrorKind::*;
const RETRY_ERRORKIND: &[ureq::ErrorKind] =
    &[Dns, ConnectionFailed, TooManyRedirects, Io, ProxyConnect];

pub fn call_with_retry(
    req: ureq::Request,
) -> std::result::Result<ureq::Response, ureq::Transport> {
    // Every status comes back as a response, so the caching layer above can
    // classify 3xx/4xx itself; only transport failures are errors here.
    //
    // Pip's retry logic is in
    //    pip/_internal/network/session.py
    //    urllib3/util/retry.py
    // - retry on codes 500, 503, 520, 527
    // - sleep time is 0.25 * 2 ** (retries - 1)
    //   so 0.25, 0.50, etc., with 120 as max
    // - also retries on connect-related errors, read errors, "other errors"

    let mut sleeps = SLEEP_TIMES.iter();
    loop {
        let result = req.clone().call().or_any_status();
        match &result {
            Ok(response) => {
                if !RETRY_STATUS.contains(&response.status()) {
                    return result;
                }
            }
            Err(err) => {
                if !RETRY_ERRORKIND.contains(&err.kind()) {
                    return result;
                }
            }
        }
        match sleeps.next() {
            Some(sleep_time) => std::thread::sleep(Duration::from_millis(*sleep_time)),
            None => return result,
        }
    }
}
