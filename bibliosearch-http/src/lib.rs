use std::io::Read;

use bibliosearch_core::{ApiBook, ApiPage, ClientError, SearchBackend};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use ureq::{Agent, AgentBuilder};
use url::Url;

/// [`SearchBackend`] over HTTP. Each request runs on tokio's blocking pool.
#[derive(Clone)]
pub struct HttpBackend {
    agent: Agent,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self {
            agent: AgentBuilder::new().build(),
        }
    }

    fn get_json<T>(&self, url: &Url) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .agent
            .request_url("GET", url)
            .set("Content-Type", "application/json")
            .call();

        match response {
            // `into_string` stops at 10 MB and pages carry full book texts
            Ok(response) => decode_reader(response.into_reader()),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(status_error(code, &body))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(ClientError::Network(transport.to_string()))
            }
        }
    }

    async fn run<T>(&self, url: &Url) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let backend = self.clone();
        let url = url.clone();
        debug!(%url, "GET");
        let outcome = tokio::task::spawn_blocking(move || backend.get_json::<T>(&url))
            .await
            .map_err(|err| ClientError::Network(format!("request task failed: {}", err)))?;
        if let Err(err) = &outcome {
            warn!(%err, "request failed");
        }
        outcome
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SearchBackend for HttpBackend {
    #[instrument(skip(self, url), fields(url = %url))]
    async fn fetch_page(&self, url: &Url) -> Result<ApiPage, ClientError> {
        self.run(url).await
    }

    #[instrument(skip(self, url), fields(url = %url))]
    async fn fetch_book(&self, url: &Url) -> Result<ApiBook, ClientError> {
        self.run(url).await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

fn decode_reader<T, R>(reader: R) -> Result<T, ClientError>
where
    T: DeserializeOwned,
    R: Read,
{
    serde_json::from_reader(reader).map_err(|err| {
        if err.is_io() {
            ClientError::Network(err.to_string())
        } else {
            ClientError::Decode(err.to_string())
        }
    })
}

/// Maps a non-2xx answer, keeping the service's `detail` message if it sent one.
fn status_error(code: u16, body: &str) -> ClientError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.detail);
    ClientError::status(code, detail)
}
