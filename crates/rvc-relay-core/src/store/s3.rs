use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::sigv4::{self, CanonicalRequest, Signer, EMPTY_PAYLOAD_SHA256};
use super::{check_key, ObjectStore};
use crate::config::Credentials;
use crate::error::StoreError;

pub(crate) fn default_client() -> Client {
    Client::builder()
        .user_agent(concat!("rvc-relay/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// S3 (or S3-compatible) bucket accessed over the REST API.
///
/// Without credentials requests go out unsigned, which works for public
/// buckets and pre-authorised endpoints.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
    /// Custom endpoint for path-style addressing; `None` means AWS virtual-hosted.
    endpoint: Option<Url>,
    signer: Option<Signer>,
}

impl S3Store {
    pub fn new(
        client: Client,
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        credentials: Option<Credentials>,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint
            .map(|raw| {
                Url::parse(raw).map_err(|e| StoreError::InvalidEndpoint {
                    endpoint: raw.to_owned(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        if let Some(url) = &endpoint {
            if url.host_str().is_none() {
                return Err(StoreError::InvalidEndpoint {
                    endpoint: url.to_string(),
                    message: "endpoint has no host".into(),
                });
            }
        }

        Ok(Self {
            client,
            bucket: bucket.to_owned(),
            region: region.to_owned(),
            endpoint,
            signer: credentials.map(|c| Signer::new(c, region)),
        })
    }

    /// `(url, host header, encoded path)` for `key`.
    fn locate(&self, key: &str) -> (String, String, String) {
        match &self.endpoint {
            Some(endpoint) => {
                let host = match (endpoint.host_str(), endpoint.port()) {
                    (Some(h), Some(p)) => format!("{h}:{p}"),
                    (Some(h), None) => h.to_owned(),
                    (None, _) => String::new(),
                };
                let base = endpoint.path().trim_end_matches('/');
                let path = sigv4::uri_encode_path(&format!("{base}/{}/{key}", self.bucket));
                let url = format!("{}://{host}{path}", endpoint.scheme());
                (url, host, path)
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let path = sigv4::uri_encode_path(&format!("/{key}"));
                (format!("https://{host}{path}"), host, path)
            }
        }
    }

    fn request(
        &self,
        method: Method,
        key: &str,
        payload_sha256: &str,
    ) -> reqwest::RequestBuilder {
        let (url, host, path) = self.locate(key);
        let builder = self.client.request(method.clone(), url);

        let Some(signer) = &self.signer else {
            return builder;
        };

        let now = Utc::now();
        let mut headers = vec![
            ("host".to_owned(), host),
            ("x-amz-content-sha256".to_owned(), payload_sha256.to_owned()),
            ("x-amz-date".to_owned(), sigv4::amz_date(now)),
        ];
        if let Some(token) = signer.session_token() {
            headers.push(("x-amz-security-token".to_owned(), token.to_owned()));
        }
        let authorization = signer.authorization(
            &CanonicalRequest {
                method: method.as_str(),
                path: &path,
                query: "",
                headers: &headers,
                payload_sha256,
            },
            now,
        );

        // reqwest derives Host from the URL; every other signed header is set here.
        headers
            .into_iter()
            .filter(|(name, _)| name != "host")
            .fold(builder, |b, (name, value)| b.header(name, value))
            .header(reqwest::header::AUTHORIZATION, authorization)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, key: &str, dest: &Path) -> Result<bool, StoreError> {
        check_key(key)?;
        let mut resp = self
            .request(Method::GET, key, EMPTY_PAYLOAD_SHA256)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                debug!(bucket = %self.bucket, key, "object not found");
                return Ok(false);
            }
            s if !s.is_success() => {
                return Err(StoreError::Status {
                    status: s.as_u16(),
                    key: key.to_owned(),
                });
            }
            _ => {}
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(bucket = %self.bucket, key, bytes = written, "object downloaded");
        Ok(true)
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        check_key(key)?;
        let payload_sha256 = sigv4::sha256_hex(&body);
        let resp = self
            .request(Method::PUT, key, &payload_sha256)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StoreError::Status {
                status: resp.status().as_u16(),
                key: key.to_owned(),
            });
        }
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        self.locate(key).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: Option<&str>) -> S3Store {
        S3Store::new(Client::new(), "out-bucket", "eu-west-1", endpoint, None).unwrap()
    }

    #[test]
    fn virtual_hosted_url_uses_bucket_and_region() {
        assert_eq!(
            store(None).object_url("outputs/j1_spb_abcd1234.wav"),
            "https://out-bucket.s3.eu-west-1.amazonaws.com/outputs/j1_spb_abcd1234.wav"
        );
    }

    #[test]
    fn custom_endpoint_switches_to_path_style() {
        let s = store(Some("http://127.0.0.1:9000"));
        let (url, host, path) = s.locate("models/v2/spb.pth");
        assert_eq!(url, "http://127.0.0.1:9000/out-bucket/models/v2/spb.pth");
        assert_eq!(host, "127.0.0.1:9000");
        assert_eq!(path, "/out-bucket/models/v2/spb.pth");
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        let err = S3Store::new(Client::new(), "b", "us-east-1", Some("not a url"), None);
        assert!(matches!(err, Err(StoreError::InvalidEndpoint { .. })));
    }
}
