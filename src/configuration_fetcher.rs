//! An HTTP client that fetches the experiment datafile.
use reqwest::Url;

use crate::{Datafile, Error, Result};

/// A client that downloads the datafile from a fixed URL.
pub struct ConfigurationFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    url: Url,
}

impl ConfigurationFetcher {
    pub fn new(url: &str) -> Result<ConfigurationFetcher> {
        let url = Url::parse(url).map_err(Error::InvalidUrl)?;

        Ok(ConfigurationFetcher {
            client: reqwest::Client::new(),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Perform a single GET request and parse the response body as a datafile.
    ///
    /// Failures are logged together with the URL and returned as [`Error::Network`], or
    /// [`Error::EmptyDatafile`] if the body is `null`. There are no retries at this level.
    pub async fn fetch(&self) -> Result<Datafile> {
        log::debug!(target: "abtest", url:display = self.url; "fetching datafile");
        self.fetch_datafile().await.inspect_err(|err| {
            log::error!(target: "abtest",
                        url:display = self.url;
                        "failed to fetch datafile JSON from {}: {:?}", self.url, err);
        })
    }

    async fn fetch_datafile(&self) -> Result<Datafile> {
        let response = self.client.get(self.url.clone()).send().await?;
        let response = response.error_for_status()?;
        let datafile: Datafile = response.json().await?;
        if datafile.as_json().is_null() {
            return Err(Error::EmptyDatafile);
        }
        Ok(datafile)
    }
}
