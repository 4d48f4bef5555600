use super::{Commitment, LedgerClient, SignedTransaction, TransactionRecord};
use crate::errors::{MarketplaceError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// JSON-RPC 2.0 client for the settlement network's node API.
pub struct RpcLedgerClient {
    rpc_url: String,
    http: Client,
    request_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: String, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(RpcLedgerClient {
            rpc_url,
            http,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<Option<R>> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!("Ledger RPC call: {}", method);

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body = response.json::<RpcResponse<R>>().await?;

        if let Some(error) = body.error {
            return Err(MarketplaceError::Ledger(format!(
                "{} failed with code {}: {}",
                method, error.code, error.message
            )));
        }

        Ok(body.result)
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_transaction(&self, reference: &str) -> Result<Option<TransactionRecord>> {
        // A null result is "not yet observable", not an error
        self.call(
            "getTransaction",
            json!([reference, { "commitment": Commitment::Confirmed }]),
        )
        .await
    }

    async fn get_balance(&self, address: &str) -> Result<Option<u64>> {
        self.call("getBalance", json!([address])).await
    }

    async fn latest_finality_marker(&self) -> Result<String> {
        self.call::<_, String>("getLatestBlockhash", json!([]))
            .await?
            .ok_or_else(|| MarketplaceError::Ledger("node returned no finality marker".to_string()))
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<String> {
        self.call::<_, String>("sendTransaction", json!([tx]))
            .await?
            .ok_or_else(|| MarketplaceError::Ledger("node returned no transaction reference".to_string()))
    }

    async fn confirm(&self, reference: &str, commitment: Commitment) -> Result<bool> {
        let confirmed: Option<bool> = self
            .call("confirmTransaction", json!([reference, commitment.as_str()]))
            .await?;
        Ok(confirmed.unwrap_or(false))
    }

    async fn request_funds(&self, address: &str, amount: u64) -> Result<()> {
        self.call::<_, String>("requestAirdrop", json!([address, amount]))
            .await?;
        Ok(())
    }
}
