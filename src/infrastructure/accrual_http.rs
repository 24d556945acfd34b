//! Reqwest-backed accrual authority adapter.
//!
//! Owns transport details only: URL building, request timeout, status
//! mapping and JSON decoding into [`AccrualReply`]. Lifecycle mapping and the
//! global cooldown live in the application layer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header::RETRY_AFTER};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::accrual::{AccrualError, AccrualReply, AccrualStatus};
use crate::domain::order::OrderNumber;
use crate::domain::ports::AccrualSource;
use crate::error::{LoyaltyError, Result};

#[derive(Debug, Deserialize)]
struct AccrualResponseDto {
    order: String,
    status: AccrualStatus,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    accrual: Option<Decimal>,
}

/// Queries `GET {base}/api/orders/{number}` on the accrual authority.
pub struct HttpAccrualSource {
    client: Client,
    base: Url,
}

impl HttpAccrualSource {
    /// Builds an adapter for the authority at `address`.
    ///
    /// A bare `host:port` is treated as plain HTTP.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the address is not a valid URL or the
    /// reqwest client cannot be constructed.
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let base = parse_base(address)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoyaltyError::ConfigError(format!("accrual client: {e}")))?;
        Ok(Self { client, base })
    }

    fn order_url(&self, number: &OrderNumber) -> std::result::Result<Url, AccrualError> {
        self.base
            .join(&format!("api/orders/{number}"))
            .map_err(|e| AccrualError::Transport(format!("invalid accrual url: {e}")))
    }
}

fn parse_base(address: &str) -> Result<Url> {
    let trimmed = address.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    };
    // `join` replaces the last path segment unless the base ends with '/'.
    let normalized = if with_scheme.ends_with('/') {
        with_scheme
    } else {
        format!("{with_scheme}/")
    };
    Url::parse(&normalized).map_err(|e| {
        LoyaltyError::ConfigError(format!("invalid accrual address {address:?}: {e}"))
    })
}

#[async_trait]
impl AccrualSource for HttpAccrualSource {
    async fn fetch(&self, number: &OrderNumber) -> std::result::Result<AccrualReply, AccrualError> {
        let response = self
            .client
            .get(self.order_url(number)?)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(map_transport_error)?;

        interpret(status, retry_after.as_deref(), body.as_ref())
    }
}

/// Maps one HTTP exchange to a reply.
fn interpret(
    status: StatusCode,
    retry_after: Option<&str>,
    body: &[u8],
) -> std::result::Result<AccrualReply, AccrualError> {
    match status {
        StatusCode::OK => {
            let dto: AccrualResponseDto = serde_json::from_slice(body).map_err(|e| {
                AccrualError::Decode(format!("invalid accrual JSON payload: {e}"))
            })?;
            Ok(AccrualReply::Status {
                order: dto.order,
                status: dto.status,
                accrual: dto.accrual,
            })
        }
        StatusCode::NO_CONTENT => Ok(AccrualReply::NoContent),
        StatusCode::TOO_MANY_REQUESTS => Ok(AccrualReply::RateLimited {
            retry_after: retry_after
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }),
        _ => Err(AccrualError::UnexpectedStatus {
            status: status.as_u16(),
            message: body_preview(body),
        }),
    }
}

fn map_transport_error(error: reqwest::Error) -> AccrualError {
    if error.is_timeout() {
        AccrualError::Timeout(error.to_string())
    } else {
        AccrualError::Transport(error.to_string())
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    compact.chars().take(PREVIEW_CHAR_LIMIT).collect()
}
