use std::time::Instant;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::MakerConfig;
use crate::error::GatewayError;

use super::auth::sign_request;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlaceOrderRequest {
    pub asset_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

#[derive(Clone, Debug)]
pub struct PlacedOrder {
    pub order_id: String,
    pub asset_id: String,
    pub side: OrderSide,
    pub price: f64,
}

#[derive(Deserialize)]
struct PlaceOrderResponse {
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

/// Hand-rolled REST client for the order gateway: place, cancel-by-id,
/// batch-cancel, cancel-all, cancel-by-market. Every request is signed
/// per the same HMAC scheme as the user channel. In `dry_run` mode,
/// placements are simulated locally and no network call is made — mirrors
/// the dry-run branch the live order path takes.
pub struct OrderGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    secret: Option<String>,
    passphrase: Option<String>,
    dry_run: bool,
    next_dry_run_id: std::sync::atomic::AtomicU64,
}

impl OrderGateway {
    pub fn new(config: &MakerConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.gateway_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            secret: config.api_secret.clone(),
            passphrase: config.api_passphrase.clone(),
            dry_run: config.dry_run,
            next_dry_run_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn credentials(&self) -> Result<(&str, &str, &str), GatewayError> {
        match (&self.api_key, &self.secret, &self.passphrase) {
            (Some(k), Some(s), Some(p)) => Ok((k, s, p)),
            _ => Err(GatewayError::MissingCredentials("api_key/secret/passphrase not configured".to_string())),
        }
    }

    fn signed_headers(&self, method: &str, path: &str, body: Option<&str>) -> Result<reqwest::header::HeaderMap, GatewayError> {
        let (api_key, secret, passphrase) = self.credentials()?;
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign_request(secret, timestamp, method, path, body);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("POLY_API_KEY", api_key.parse().unwrap());
        headers.insert("POLY_SIGNATURE", signature.parse().unwrap());
        headers.insert("POLY_TIMESTAMP", timestamp.to_string().parse().unwrap());
        headers.insert("POLY_PASSPHRASE", passphrase.parse().unwrap());
        Ok(headers)
    }

    pub async fn place(&self, req: &PlaceOrderRequest) -> Result<PlacedOrder, GatewayError> {
        if self.dry_run {
            let id = self.next_dry_run_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let order_id = format!("dryrun-{id}");
            eprintln!("[MAKER_GW] dry-run place {} {} {:.4} asset={:.8}.. -> {}", req.side.as_str(), req.size, req.price, req.asset_id, order_id);
            return Ok(PlacedOrder {
                order_id,
                asset_id: req.asset_id.clone(),
                side: req.side,
                price: req.price,
            });
        }

        let path = "/order";
        let body = json!({
            "asset_id": req.asset_id,
            "side": req.side.as_str(),
            "price": format!("{:.4}", req.price),
            "size": format!("{:.2}", req.size),
            "order_type": "GTC",
            "post_only": true,
        })
        .to_string();

        let headers = self.signed_headers("POST", path, Some(&body))?;
        let started = Instant::now();
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .headers(headers)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let parsed: PlaceOrderResponse = resp.json().await.map_err(|e| GatewayError::Decode(e.to_string()))?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !parsed.success {
            let reason = parsed.error_msg.unwrap_or_else(|| format!("http {status}"));
            eprintln!("[MAKER_GW] place rejected: {reason}");
            return Err(GatewayError::Rejected { status: status.as_u16(), body: reason });
        }

        let order_id = parsed.order_id.ok_or_else(|| GatewayError::Decode("missing orderID".to_string()))?;
        eprintln!("[MAKER_GW] placed {} lat={:.1}ms id={}", req.side.as_str(), latency_ms, order_id);

        Ok(PlacedOrder {
            order_id,
            asset_id: req.asset_id.clone(),
            side: req.side,
            price: req.price,
        })
    }

    pub async fn cancel_by_id(&self, order_id: &str) -> Result<(), GatewayError> {
        if self.dry_run {
            eprintln!("[MAKER_GW] dry-run cancel {order_id}");
            return Ok(());
        }
        let path = format!("/order/{order_id}");
        let headers = self.signed_headers("DELETE", &path, None)?;
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .headers(headers)
            .send()
            .await?;
        Ok(())
    }

    pub async fn batch_cancel(&self, order_ids: &[String]) -> Result<(), GatewayError> {
        if order_ids.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            eprintln!("[MAKER_GW] dry-run batch-cancel {} orders", order_ids.len());
            return Ok(());
        }
        let path = "/orders";
        let body = serde_json::to_string(order_ids).map_err(|e| GatewayError::Decode(e.to_string()))?;
        let headers = self.signed_headers("DELETE", path, Some(&body))?;
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .headers(headers)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    pub async fn cancel_all(&self) -> Result<(), GatewayError> {
        if self.dry_run {
            eprintln!("[MAKER_GW] dry-run cancel-all");
            return Ok(());
        }
        let path = "/cancel-all";
        let headers = self.signed_headers("DELETE", path, None)?;
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .headers(headers)
            .send()
            .await?;
        Ok(())
    }

    /// Bulk cancel scoped to a market or asset — preferred over per-order
    /// cancels during a spike-guard, where every quote for the asset must
    /// go at once.
    pub async fn cancel_by_market(&self, market: Option<&str>, asset_id: Option<&str>) -> Result<(), GatewayError> {
        if self.dry_run {
            eprintln!("[MAKER_GW] dry-run cancel-by-market market={market:?} asset={asset_id:?}");
            return Ok(());
        }
        let path = "/cancel-market-orders";
        let body = json!({ "market": market, "asset_id": asset_id }).to_string();
        let headers = self.signed_headers("DELETE", path, Some(&body))?;
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .headers(headers)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a gateway constructed with dry_run=true and no credentials.
    /// Expected: place() succeeds locally without requiring api_key/secret/passphrase.
    #[tokio::test]
    async fn test_dry_run_place_does_not_require_credentials() {
        let config = MakerConfig {
            dry_run: true,
            ..MakerConfig::default()
        };
        let gw = OrderGateway::new(&config);
        let req = PlaceOrderRequest {
            asset_id: "asset-1".to_string(),
            side: OrderSide::Buy,
            price: 0.40,
            size: 5.0,
        };
        let placed = gw.place(&req).await.unwrap();
        assert_eq!(placed.asset_id, "asset-1");
        assert_eq!(placed.price, 0.40);
    }

    /// Scenario: live (non-dry-run) gateway with no api credentials configured.
    /// Expected: signed_headers fails fast with MissingCredentials rather than sending an unsigned request.
    #[tokio::test]
    async fn test_live_gateway_requires_credentials() {
        let config = MakerConfig {
            dry_run: false,
            ..MakerConfig::default()
        };
        let gw = OrderGateway::new(&config);
        let err = gw.cancel_all().await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredentials(_)));
    }
}
