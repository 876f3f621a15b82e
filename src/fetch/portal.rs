use std::time::Duration;

use reqwest::Client;
use scraper::Html;
use tracing::debug;

use crate::{credentials::Credentials, error::FetchError, fetch::Fetcher};

pub const LOGIN_URL: &str = "https://mywings.unf.edu/";
pub const SCHEDULE_URL: &str = "http://mywings2.unf.edu/cp/ip/login?sys=sctssb\
    &url=https://banner.unf.edu/pls/nfpo/bwskfshd.P_CrseSchdDetl";

/// Session against the student portal, over plain HTTP with a cookie jar
pub struct PortalFetcher {
    pub login_url: String,
    pub schedule_url: String,
    /// Deadline for the portal to answer the first request of a session
    pub session_timeout: Duration,
    /// Deadline of every other request of the session
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl PortalFetcher {
    fn client(&self) -> Result<Client, FetchError> {
        Ok(Client::builder()
            .user_agent(&self.user_agent)
            .cookie_store(true)
            .timeout(self.request_timeout)
            .build()?)
    }

    async fn get(&self, client: &Client, url: &str) -> Result<String, FetchError> {
        let response = client.get(url).send().await?.error_for_status()?;

        Ok(response.text().await?)
    }
}

impl Fetcher for PortalFetcher {
    async fn fetch(
        &mut self,
        identity: &str,
        credentials: &Credentials,
    ) -> Result<String, FetchError> {
        // Fresh cookie jar for each session
        let client = self.client()?;

        debug!("Opening a session on {}", self.login_url);
        client
            .get(&self.login_url)
            .timeout(self.session_timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    FetchError::Timeout(format!("{} did not answer", self.login_url))
                } else {
                    FetchError::Http(err)
                }
            })?
            .error_for_status()?;

        debug!("Logging in as {identity}");
        client
            .post(&self.login_url)
            .form(&[
                ("user", credentials.username.as_str()),
                ("pass", credentials.password.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        debug!("Downloading the schedule");
        let html = self.get(&client, &self.schedule_url).await?;

        extract_body(&html)
    }
}

/// Keep only the schedule part of the page
fn extract_body(html: &str) -> Result<String, FetchError> {
    let document = Html::parse_document(html);
    let body = document
        .select(selector!(".pagebodydiv"))
        .next()
        .map(|body| body.inner_html());

    body.ok_or_else(|| {
        FetchError::Portal("schedule page not reached, check your credentials".to_owned())
    })
}
