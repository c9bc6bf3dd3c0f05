use crate::connector::PeerConnector;
use crate::error::{Error, Result};
use crate::types::{NamespaceEntries, PutAck, PutRequest, Timestamp, VersionedValue};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub timestamp: Timestamp,
}

/// reqwest-based connector speaking the `/peer`, `/friends` and `/data`
/// routes of [`crate::api::create_router`].
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::unreachable("<client>", e))?;
        Ok(Self { client })
    }

    fn url(peer: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(peer).map_err(|e| Error::InvalidPeerUri {
            uri: peer.to_string(),
            reason: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidPeerUri {
                uri: peer.to_string(),
                reason: "cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_json<Resp>(&self, peer: &str, request: reqwest::RequestBuilder) -> Result<Resp>
    where
        Resp: serde::de::DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .map_err(|e| Error::unreachable(peer, e))?;

        if !response.status().is_success() {
            return Err(Error::unreachable(
                peer,
                format!("HTTP error: {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::unreachable(peer, e))
    }
}

#[async_trait]
impl PeerConnector for HttpConnector {
    async fn get(
        &self,
        peer: &str,
        namespace: &str,
        key: &str,
        since: Option<Timestamp>,
    ) -> Result<Option<VersionedValue>> {
        let mut url = Self::url(peer, &["peer", namespace, key])?;
        if let Some(ts) = since {
            url.query_pairs_mut().append_pair("since", &ts.to_string());
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::unreachable(peer, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| Error::unreachable(peer, e)),
            s => Err(Error::unreachable(peer, format!("HTTP error: {}", s))),
        }
    }

    async fn put(
        &self,
        peer: &str,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Timestamp,
    ) -> Result<PutAck> {
        let url = Self::url(peer, &["peer", namespace, key])?;
        let body = PutRequest {
            value: value.to_string(),
            timestamp: Some(timestamp),
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::unreachable(peer, e))?;

        match response.status() {
            StatusCode::NOT_ACCEPTABLE => Ok(PutAck::Stale),
            s if s.is_success() => {
                let resp: PutResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::unreachable(peer, e))?;
                Ok(PutAck::Accepted {
                    timestamp: resp.timestamp,
                })
            }
            s => Err(Error::unreachable(peer, format!("HTTP error: {}", s))),
        }
    }

    async fn friends(&self, peer: &str, me: Option<&str>) -> Result<Vec<String>> {
        let mut url = Self::url(peer, &["friends"])?;
        if let Some(me) = me {
            url.query_pairs_mut().append_pair("friend_uri", me);
        }
        self.fetch_json(peer, self.client.get(url)).await
    }

    async fn bulk_data(&self, peer: &str, since: Timestamp) -> Result<Vec<NamespaceEntries>> {
        let since = since.to_string();
        let url = Self::url(peer, &["data", since.as_str()])?;
        self.fetch_json(peer, self.client.get(url)).await
    }
}
