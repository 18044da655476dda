use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CheckResult, MarketDataFeed, OrderGateway, OrderRequest, OrderResult};
use crate::error::TraderError;
use crate::models::{AccountInfo, Bar, BrokerPosition, SymbolSpec, Tick, Timeframe};
use crate::Result;

const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8765";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// HTTP client for a terminal bridge process running next to the broker terminal
#[derive(Clone)]
pub struct BridgeGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
    account: Option<SessionAccount>,
}

/// Terminal account the bridge should log into on connect
#[derive(Debug, Clone, Serialize)]
struct SessionAccount {
    login: u64,
    server: String,
}

#[derive(Debug, Deserialize)]
struct CloseAllResponse {
    closed: bool,
}

impl BridgeGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            account: None,
        })
    }

    /// Bearer token sent with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Account the terminal logs into when the session is opened
    pub fn with_account(mut self, login: u64, server: impl Into<String>) -> Self {
        self.account = Some(SessionAccount {
            login,
            server: server.into(),
        });
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraderError::Gateway(format!(
                "{} failed with HTTP {}: {}",
                what,
                status,
                body.trim()
            )));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let response = self.send(self.client.get(self.url(path)), what).await?;
        Ok(response.json().await?)
    }
}

impl Default for BridgeGateway {
    fn default() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BRIDGE_URL.to_string(),
            token: None,
            account: None,
        }
    }
}

#[async_trait]
impl MarketDataFeed for BridgeGateway {
    async fn get_history(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>> {
        let request = self
            .client
            .get(self.url(&format!("/rates/{}", symbol)))
            .query(&[("timeframe", timeframe.code().to_string()), ("count", count.to_string())]);
        let response = self
            .send(request, "history read")
            .await
            .map_err(|e| TraderError::Feed(e.to_string()))?;
        Ok(response.json().await?)
    }

    async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Bar>> {
        let request = self
            .client
            .get(self.url(&format!("/rates/{}/latest", symbol)))
            .query(&[("timeframe", timeframe.code())]);
        let response = self.authorized(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(TraderError::Feed(format!(
                "latest bar read failed with HTTP {}",
                response.status()
            )));
        }
        Ok(response.json::<Option<Bar>>().await?)
    }
}

#[async_trait]
impl OrderGateway for BridgeGateway {
    async fn connect(&self) -> Result<()> {
        let request = self.client.post(self.url("/session/connect"));
        let request = match &self.account {
            Some(account) => request.json(account),
            None => request,
        };
        self.send(request, "connect").await?;
        tracing::info!("✓ Connected to terminal bridge at {}", self.base_url);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.send(self.client.post(self.url("/session/disconnect")), "disconnect")
            .await?;
        tracing::info!("Disconnected from terminal bridge");
        Ok(())
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        self.get_json("/account", "account read").await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolSpec> {
        self.get_json(&format!("/symbols/{}", symbol), "symbol read")
            .await
    }

    async fn tick(&self, symbol: &str) -> Result<Tick> {
        self.get_json(&format!("/tick/{}", symbol), "tick read").await
    }

    async fn check(&self, request: &OrderRequest) -> Result<CheckResult> {
        let response = self
            .send(self.client.post(self.url("/orders/check")).json(request), "order check")
            .await?;
        Ok(response.json().await?)
    }

    async fn submit(&self, request: &OrderRequest) -> Result<Option<OrderResult>> {
        let response = self
            .send(self.client.post(self.url("/orders/send")).json(request), "order send")
            .await?;
        Ok(response.json::<Option<OrderResult>>().await?)
    }

    async fn positions_for(&self, symbol: &str) -> Result<Vec<BrokerPosition>> {
        let request = self
            .client
            .get(self.url("/positions"))
            .query(&[("symbol", symbol)]);
        let response = self.send(request, "positions read").await?;
        Ok(response.json().await?)
    }

    async fn close_all(&self, symbol: &str) -> Result<bool> {
        let request = self
            .client
            .post(self.url("/positions/close_all"))
            .json(&serde_json::json!({ "symbol": symbol }));
        let response = self.send(request, "close all").await?;
        let body: CloseAllResponse = response.json().await?;
        Ok(body.closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FillPolicy, Side};
    use mockito::{Matcher, Server};
    use uuid::Uuid;

    fn order_request() -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".to_string(),
            volume: 1.0,
            side: Side::Buy,
            price: 1.1002,
            sl: Some(1.0972),
            tp: Some(1.1052),
            deviation: 10,
            magic: 2,
            comment: "pattern_rsi_trend".to_string(),
            type_time: Default::default(),
            type_filling: FillPolicy::Return,
            position: None,
            tag: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_history_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/rates/EURUSD")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("timeframe".into(), "t5".into()),
                Matcher::UrlEncoded("count".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                {"timestamp":"2025-03-10T09:00:00Z","open":1.1,"high":1.2,"low":1.0,"close":1.15,"tick_volume":10,"spread":1,"volume":0},
                {"timestamp":"2025-03-10T09:05:00Z","open":1.15,"high":1.15,"low":1.15,"close":1.15,"tick_volume":1,"spread":1,"volume":0}
            ]"#,
            )
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url()).unwrap();
        let bars = bridge.get_history("EURUSD", Timeframe::M5, 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 1.15);
    }

    #[tokio::test]
    async fn test_latest_not_found_is_empty_read() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rates/EURUSD/latest")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url()).unwrap();
        let latest = bridge.get_latest("EURUSD", Timeframe::M1).await.unwrap();
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_latest_null_body_is_empty_read() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rates/EURUSD/latest")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("null")
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url()).unwrap();
        assert!(bridge.get_latest("EURUSD", Timeframe::M1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_sends_token_and_parses_result() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/orders/send")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "symbol": "EURUSD",
                "side": "Buy",
                "deviation": 10,
                "type_filling": "return",
                "type_time": "day"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"retcode":10009,"deal":77,"order":78,"volume":1.0,"price":1.1002,"comment":"done"}"#)
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url()).unwrap().with_token("secret");
        let result = bridge.submit(&order_request()).await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(result.retcode, 10009);
        assert_eq!(result.order, 78);
    }

    #[tokio::test]
    async fn test_submit_null_result() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/orders/send")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("null")
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url()).unwrap();
        assert!(bridge.submit(&order_request()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_failure_is_gateway_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/session/connect")
            .with_status(503)
            .with_body("terminal not running")
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url()).unwrap();
        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(err, TraderError::Gateway(ref msg) if msg.contains("terminal not running")));
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/positions/close_all")
            .match_body(Matcher::Json(serde_json::json!({ "symbol": "EURUSD" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"closed":true}"#)
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url()).unwrap();
        assert!(bridge.close_all("EURUSD").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_sends_account() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/session/connect")
            .match_body(Matcher::Json(serde_json::json!({ "login": 5123, "server": "Broker-Demo" })))
            .with_status(200)
            .create_async()
            .await;

        let bridge = BridgeGateway::new(server.url())
            .unwrap()
            .with_account(5123, "Broker-Demo");
        bridge.connect().await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let bridge = BridgeGateway::new("http://localhost:9000/").unwrap();
        assert_eq!(bridge.base_url(), "http://localhost:9000");
    }
}
