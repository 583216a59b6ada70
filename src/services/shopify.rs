//! Shopify Admin REST transport.
//!
//! Credentials, store and API version are re-read from the [`ConfigStore`] on
//! every request, so operator changes take effect without a restart. The only
//! thing remembered between calls is the discovered location id, keyed by store.

use crate::config::ConfigStore;
use crate::models::{
    InventoryItemId, LocationId, ProductId, Quantity, SyncConfig, VariantId, VariantRecord,
    VariantRef,
};
use crate::services::inventory::{AdminApi, ApiError};
use crate::services::registry::ConfigError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Largest page the REST Admin API serves.
const PAGE_LIMIT: u32 = 250;

/// [`AdminApi`] implementation over the Shopify Admin REST API
pub struct ShopifyApi {
    http: reqwest::Client,
    store: Arc<ConfigStore>,
    /// Overrides `https://{store}` (used to point at a local stub).
    base_override: Option<String>,
    location: Mutex<Option<(String, LocationId)>>,
}

#[derive(Debug, Deserialize)]
struct VariantEnvelope {
    variant: WireVariant,
}

#[derive(Debug, Deserialize)]
struct VariantsEnvelope {
    variants: Vec<WireVariant>,
}

#[derive(Debug, Deserialize)]
struct WireVariant {
    id: u64,
    product_id: u64,
    inventory_item_id: u64,
    #[serde(default)]
    option1: Option<String>,
    #[serde(default)]
    option2: Option<String>,
    #[serde(default)]
    option3: Option<String>,
}

impl WireVariant {
    fn size_letter(&self, size_option: u8) -> String {
        let value = match size_option {
            2 => &self.option2,
            3 => &self.option3,
            _ => &self.option1,
        };
        value.as_deref().unwrap_or_default().trim().to_string()
    }

    fn into_ref(self, size_option: u8) -> VariantRef {
        VariantRef {
            size_letter: self.size_letter(size_option),
            variant_id: VariantId(self.id),
            inventory_item_id: InventoryItemId(self.inventory_item_id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InventoryLevelsEnvelope {
    inventory_levels: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    inventory_item_id: u64,
    location_id: u64,
    #[serde(default)]
    available: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SetLevelRequest {
    location_id: u64,
    inventory_item_id: u64,
    available: u32,
}

#[derive(Debug, Deserialize)]
struct LocationsEnvelope {
    locations: Vec<WireLocation>,
}

#[derive(Debug, Deserialize)]
struct WireLocation {
    id: u64,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

impl ShopifyApi {
    /// Build the transport. The request timeout comes from the current config.
    pub fn new(store: Arc<ConfigStore>) -> Result<Self> {
        let timeout = Duration::from_secs(store.snapshot().sync.request_timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            store,
            base_override: None,
            location: Mutex::new(None),
        })
    }

    /// Send requests to `base` instead of the shop domain.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_override = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    fn settings(&self) -> Result<SyncConfig, ApiError> {
        let config = self.store.snapshot();
        if !config.has_credentials() {
            return Err(ApiError::AuthFailure(
                ConfigError::MissingCredentials.to_string(),
            ));
        }
        Ok(config)
    }

    fn endpoint_url(&self, config: &SyncConfig, endpoint: &str) -> String {
        admin_url(
            self.base_override.as_deref(),
            &config.shopify.store,
            &config.shopify.api_version,
            endpoint,
        )
    }

    async fn request<B>(
        &self,
        config: &SyncConfig,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint_url(config, endpoint);
        tracing::debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method, &url)
            .header(ACCESS_TOKEN_HEADER, &config.shopify.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }
        Ok(response)
    }

    async fn send<B, T>(
        &self,
        config: &SyncConfig,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self.request(config, method, endpoint, body).await?;
        decode(response, endpoint).await
    }

    async fn get<T: DeserializeOwned>(&self, config: &SyncConfig, endpoint: &str) -> Result<T, ApiError> {
        self.send::<(), T>(config, Method::GET, endpoint, None).await
    }

    /// Location whose levels are read and written.
    ///
    /// Uses the configured id when present, otherwise the shop's first active location.
    async fn location_id(&self, config: &SyncConfig) -> Result<LocationId, ApiError> {
        if let Some(id) = config.shopify.location_id {
            return Ok(LocationId(id));
        }

        let cached = self.location.lock().unwrap().clone();
        if let Some((store, id)) = cached {
            if store == config.shopify.store {
                return Ok(id);
            }
        }

        let envelope: LocationsEnvelope = self.get(config, "locations.json").await?;
        let location = envelope
            .locations
            .iter()
            .find(|l| l.active)
            .map(|l| LocationId(l.id))
            .ok_or_else(|| ApiError::NotFound("no active location on shop".to_string()))?;

        tracing::info!("Using location {} for {}", location, config.shopify.store);
        *self.location.lock().unwrap() = Some((config.shopify.store.clone(), location));
        Ok(location)
    }
}

#[async_trait]
impl AdminApi for ShopifyApi {
    async fn fetch_variant(&self, variant_id: VariantId) -> Result<VariantRecord, ApiError> {
        let config = self.settings()?;
        let envelope: VariantEnvelope = self
            .get(&config, &format!("variants/{}.json", variant_id))
            .await?;

        let product_id = ProductId(envelope.variant.product_id);
        Ok(VariantRecord {
            variant: envelope.variant.into_ref(config.size_option),
            product_id,
        })
    }

    async fn fetch_product_variants(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<VariantRef>, ApiError> {
        let config = self.settings()?;
        let first = format!("products/{}/variants.json?limit={}", product_id, PAGE_LIMIT);

        let mut variants = Vec::new();
        let mut endpoint = first.clone();
        loop {
            let response = self
                .request::<()>(&config, Method::GET, &endpoint, None)
                .await?;
            let next = next_page_info(response.headers());
            let envelope: VariantsEnvelope = decode(response, &endpoint).await?;
            variants.extend(
                envelope
                    .variants
                    .into_iter()
                    .map(|v| v.into_ref(config.size_option)),
            );

            match next {
                Some(page_info) => endpoint = format!("{}&page_info={}", first, page_info),
                None => break,
            }
        }

        tracing::debug!("Product {} has {} variants", product_id, variants.len());
        Ok(variants)
    }

    async fn fetch_available(&self, variant: &VariantRef) -> Result<i64, ApiError> {
        let config = self.settings()?;
        let location = self.location_id(&config).await?;
        let endpoint = format!(
            "inventory_levels.json?inventory_item_ids={}&location_ids={}",
            variant.inventory_item_id, location
        );
        let envelope: InventoryLevelsEnvelope = self.get(&config, &endpoint).await?;

        envelope
            .inventory_levels
            .iter()
            .find(|l| {
                l.inventory_item_id == variant.inventory_item_id.0 && l.location_id == location.0
            })
            // Untracked items report no count
            .map(|l| l.available.unwrap_or(0))
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "no inventory level for {} at location {}",
                    variant, location
                ))
            })
    }

    async fn set_available(&self, variant: &VariantRef, quantity: Quantity) -> Result<(), ApiError> {
        let config = self.settings()?;
        let location = self.location_id(&config).await?;
        let body = SetLevelRequest {
            location_id: location.0,
            inventory_item_id: variant.inventory_item_id.0,
            available: quantity.get(),
        };

        let _: serde_json::Value = self
            .send(&config, Method::POST, "inventory_levels/set.json", Some(&body))
            .await?;
        Ok(())
    }
}

/// Build an Admin API URL for `endpoint`.
fn admin_url(base_override: Option<&str>, store: &str, api_version: &str, endpoint: &str) -> String {
    let base = match base_override {
        Some(base) => base.to_string(),
        None => format!("https://{}", store.trim().trim_end_matches('/')),
    };
    format!("{}/admin/api/{}/{}", base, api_version, endpoint)
}

async fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T, ApiError> {
    response.json::<T>().await.map_err(|e| {
        ApiError::UpstreamUnavailable(format!("malformed response from {}: {}", endpoint, e))
    })
}

/// Cursor of the next page from a `Link` header, if there is one.
///
/// Shopify sends `<url>; rel="previous", <url>; rel="next"` with the cursor in
/// the `page_info` query parameter of each url.
fn next_page_info(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    let next = link
        .split(',')
        .find(|part| part.split(';').skip(1).any(|p| p.trim() == r#"rel="next""#))?;
    let url = next
        .split(';')
        .next()?
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>');

    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == "page_info")
        .map(|(_, value)| value.into_owned())
}

/// Map a non-success HTTP status to the failure taxonomy.
fn classify_status(status: StatusCode, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::AuthFailure(format!("HTTP {}", status.as_u16()))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(format!("HTTP 404: {}", body)),
        StatusCode::CONFLICT => ApiError::Conflict(body),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ApiError::UpstreamUnavailable(format!("HTTP {}", status.as_u16()))
        }
        s if s.is_server_error() => ApiError::UpstreamUnavailable(format!("HTTP {}", s.as_u16())),
        s => ApiError::Rejected {
            status: s.as_u16(),
            body,
        },
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::UpstreamUnavailable(format!("request timed out: {}", err))
    } else {
        ApiError::UpstreamUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_admin_url() {
        assert_eq!(
            admin_url(None, "shop.myshopify.com", "2024-01", "variants/1.json"),
            "https://shop.myshopify.com/admin/api/2024-01/variants/1.json"
        );
        assert_eq!(
            admin_url(Some("http://127.0.0.1:9000"), "ignored", "2024-04", "locations.json"),
            "http://127.0.0.1:9000/admin/api/2024-04/locations.json"
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            ApiError::AuthFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new()),
            ApiError::AuthFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, String::new()),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "stale".into()),
            ApiError::Conflict(_)
        ));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad".into()),
            ApiError::Rejected {
                status: 422,
                body: "bad".into()
            }
        );
    }

    #[test]
    fn test_parse_variant_and_size_option() {
        let json = r#"{"variant": {"id": 11, "product_id": 7, "inventory_item_id": 21,
            "option1": " j ", "option2": "Gold", "option3": null}}"#;
        let envelope: VariantEnvelope = serde_json::from_str(json).unwrap();

        assert_eq!(envelope.variant.size_letter(1), "j");
        assert_eq!(envelope.variant.size_letter(2), "Gold");
        assert_eq!(envelope.variant.size_letter(3), "");

        let variant = envelope.variant.into_ref(1);
        assert_eq!(variant.variant_id, VariantId(11));
        assert_eq!(variant.inventory_item_id, InventoryItemId(21));
    }

    #[test]
    fn test_parse_inventory_levels() {
        let json = r#"{"inventory_levels": [
            {"inventory_item_id": 21, "location_id": 5, "available": 3},
            {"inventory_item_id": 22, "location_id": 5, "available": null}]}"#;
        let envelope: InventoryLevelsEnvelope = serde_json::from_str(json).unwrap();

        assert_eq!(envelope.inventory_levels[0].available, Some(3));
        assert_eq!(envelope.inventory_levels[1].available, None);
    }

    #[test]
    fn test_set_level_body() {
        let body = SetLevelRequest {
            location_id: 5,
            inventory_item_id: 21,
            available: 9,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"location_id": 5, "inventory_item_id": 21, "available": 9})
        );
    }

    #[test]
    fn test_next_page_info() {
        let mut headers = HeaderMap::new();
        assert_eq!(next_page_info(&headers), None);

        headers.insert(
            LINK,
            r#"<https://shop.myshopify.com/admin/api/2024-01/products/7/variants.json?limit=250&page_info=prev1>; rel="previous", <https://shop.myshopify.com/admin/api/2024-01/products/7/variants.json?limit=250&page_info=next2>; rel="next""#
                .parse()
                .unwrap(),
        );
        assert_eq!(next_page_info(&headers), Some("next2".to_string()));

        headers.insert(
            LINK,
            r#"<https://shop.myshopify.com/admin/api/2024-01/products/7/variants.json?page_info=prev1>; rel="previous""#
                .parse()
                .unwrap(),
        );
        assert_eq!(next_page_info(&headers), None);
    }

    // Serves a product whose variants span two pages, one request per connection.
    async fn serve_two_pages(listener: TcpListener, paths: Arc<Mutex<Vec<String>>>) {
        let base = format!("http://{}", listener.local_addr().unwrap());
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = String::from_utf8_lossy(&request).to_string();
            let path = head.split_whitespace().nth(1).unwrap_or_default().to_string();
            paths.lock().unwrap().push(path.clone());

            let (link, body) = if path.contains("page_info=cursor2") {
                (
                    None,
                    r#"{"variants": [{"id": 13, "product_id": 7, "inventory_item_id": 23, "option1": "K"}]}"#,
                )
            } else {
                (
                    Some(format!(
                        r#"<{}/admin/api/2024-01/products/7/variants.json?limit=250&page_info=cursor2>; rel="next""#,
                        base
                    )),
                    r#"{"variants": [
                        {"id": 11, "product_id": 7, "inventory_item_id": 21, "option1": "I"},
                        {"id": 12, "product_id": 7, "inventory_item_id": 22, "option1": "J"}]}"#,
                )
            };

            let mut response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                body.len()
            );
            if let Some(link) = link {
                response.push_str(&format!("Link: {}\r\n", link));
            }
            response.push_str("\r\n");
            response.push_str(body);
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_product_variants_follow_next_page() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = camino::Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let store = Arc::new(ConfigStore::open(&dir, Default::default()).unwrap());
        store.set_credentials("shop.myshopify.com", "shpat_test").unwrap();
        store
            .update(|config| config.shopify.api_version = "2024-01".to_string())
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let paths = Arc::new(Mutex::new(Vec::new()));
        let server = tokio::spawn(serve_two_pages(listener, paths.clone()));

        let api = ShopifyApi::new(store).unwrap().with_base_url(base);
        let variants = api.fetch_product_variants(ProductId(7)).await.unwrap();
        server.abort();

        let letters: Vec<&str> = variants.iter().map(|v| v.size_letter.as_str()).collect();
        assert_eq!(letters, vec!["I", "J", "K"]);

        let paths = paths.lock().unwrap().clone();
        assert_eq!(
            paths,
            vec![
                "/admin/api/2024-01/products/7/variants.json?limit=250".to_string(),
                "/admin/api/2024-01/products/7/variants.json?limit=250&page_info=cursor2"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_is_auth_failure() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = camino::Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let store = Arc::new(ConfigStore::open(&dir, Default::default()).unwrap());
        let api = ShopifyApi::new(store).unwrap();

        let err = api.fetch_variant(VariantId(1)).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthFailure(_)));
    }
}
