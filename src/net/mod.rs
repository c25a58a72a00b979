mod lazy_remote_file;
pub(crate) mod retry;

pub use lazy_remote_file::LazyRemoteFile;

use crate::error::status_error;
use crate::prelude::*;

use std::io::{self, Write};
use std::time::Duration;
use ureq::{Agent, AgentBuilder, OrAnyStatus};

pub(crate) fn user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Thin wrapper around a ureq agent. Redirects are disabled: the cache layer
/// does its own redirect handling so it can strip credentials on cross-origin
/// hops.
#[derive(Clone, Debug)]
pub struct HttpClient {
    agent: Agent,
}

impl Default for HttpClient {
    fn default() -> HttpClient {
        HttpClient::new()
    }
}

impl HttpClient {
    pub fn new() -> HttpClient {
        HttpClient {
            agent: AgentBuilder::new()
                .user_agent(&user_agent())
                .redirects(0)
                .timeout_read(Duration::from_secs(15))
                .timeout_write(Duration::from_secs(15))
                .build(),
        }
    }

    pub(crate) fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Perform a request without following redirects. Any HTTP status comes
    /// back as a response; only transport failures (DNS, TCP, TLS, timeouts)
    /// are errors, after the retry schedule is exhausted.
    pub fn request(
        &self,
        method: &str,
        url: &Url,
        headers: &[(&str, String)],
    ) -> Result<ureq::Response> {
        let mut req = self.agent.request_url(method, url);
        for (name, value) in headers {
            req = req.set(name, value);
        }
        let response = retry::call_with_retry(req)
            .with_context(|| format!("{} {} failed", method, url))?;
        Ok(response)
    }

    /// POST a body in one shot. No retries: the commit endpoint is not
    /// idempotent.
    pub fn post(
        &self,
        url: &Url,
        headers: &[(&str, String)],
        content_type: &str,
        body: &str,
    ) -> Result<ureq::Response> {
        let mut req = self
            .agent
            .request_url("POST", url)
            .set("Content-Type", content_type);
        for (name, value) in headers {
            req = req.set(name, value);
        }
        let response = req
            .send_string(body)
            .or_any_status()
            .with_context(|| format!("POST {} failed", url))?;
        Ok(response)
    }

    /// Stream a GET response body into `dest`. The body is staged under a
    /// temporary name next to `dest` and renamed into place only once fully
    /// written, so a failed download never leaves a partial file visible.
    pub fn download(&self, url: &Url, headers: &[(&str, String)], dest: &Path) -> Result<()> {
        let response = self.request("GET", url, headers)?;
        let status = response.status();
        if status >= 300 {
            // The caller hands us a fully resolved URL, so a redirect here is
            // just as unexpected as a 4xx.
            return Err(status_error(url, &response).into());
        }
        // unwrap rationale: cache entry paths always have a parent
        let mut tmp = tempfile::NamedTempFile::new_in(dest.parent().unwrap())?;
        io::copy(&mut response.into_reader(), tmp.as_file_mut())
            .with_context(|| format!("download of {} was interrupted", url))?;
        tmp.as_file_mut().flush()?;
        tmp.persist(dest)
            .with_context(|| format!("failed to move download into place at {}", dest.display()))?;
        Ok(())
    }
}
