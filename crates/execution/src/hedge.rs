//! External hedge service.
//!
//! The keeper asks it for a health verdict on the tracked position and,
//! periodically, tells it the token A exposure to offset.

use async_trait::async_trait;
use clmm_keeper_domain::DomainError;
use clmm_keeper_domain::entities::{PoolSnapshot, PositionId, RangePosition};
use clmm_keeper_domain::math::concentrated_liquidity::amounts_for_liquidity;
use clmm_keeper_domain::math::price_tick::tick_to_sqrt_price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HedgeError {
    #[error("hedge request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hedge service returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait HedgeService: Send + Sync {
    /// `false` means the position must not be touched by automation.
    async fn check_health(&self, position: &PositionId) -> Result<bool, HedgeError>;

    /// Sets the hedge to offset `exposure` units of token A.
    async fn adjust_hedge(
        &self,
        exposure: Decimal,
        position: &PositionId,
    ) -> Result<(), HedgeError>;
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    healthy: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HedgeRequest<'a> {
    position_id: &'a str,
    exposure: Decimal,
}

/// JSON over HTTP client.
///
/// `GET {base}/health/{position}` answers `{"healthy": bool}`;
/// `POST {base}/hedge` takes `{"positionId", "exposure"}`.
#[derive(Debug, Clone)]
pub struct HttpHedgeService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHedgeService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HedgeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HedgeService for HttpHedgeService {
    async fn check_health(&self, position: &PositionId) -> Result<bool, HedgeError> {
        let url = format!("{}/health/{}", self.base_url, position);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(HedgeError::Status(response.status().as_u16()));
        }
        let health: HealthResponse = response.json().await?;
        Ok(health.healthy)
    }

    async fn adjust_hedge(
        &self,
        exposure: Decimal,
        position: &PositionId,
    ) -> Result<(), HedgeError> {
        let url = format!("{}/hedge", self.base_url);
        let request = HedgeRequest {
            position_id: position.as_str(),
            exposure,
        };
        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(HedgeError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Used when no hedge service is configured: always healthy, never hedges.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledHedge;

#[async_trait]
impl HedgeService for DisabledHedge {
    async fn check_health(&self, _position: &PositionId) -> Result<bool, HedgeError> {
        Ok(true)
    }

    async fn adjust_hedge(
        &self,
        exposure: Decimal,
        position: &PositionId,
    ) -> Result<(), HedgeError> {
        debug!(position = %position, exposure = %exposure, "Hedging disabled, skipping adjustment");
        Ok(())
    }
}

/// Token A held by `position` at the snapshot price, in UI units.
pub fn position_exposure(
    snapshot: &PoolSnapshot,
    position: &RangePosition,
) -> Result<Decimal, DomainError> {
    let (amount_a, _) = amounts_for_liquidity(
        snapshot.sqrt_price,
        tick_to_sqrt_price(position.tick_lower)?,
        tick_to_sqrt_price(position.tick_upper)?,
        position.liquidity,
    )?;
    let raw = u64::try_from(amount_a).map_err(|_| DomainError::Overflow("exposure"))?;
    Ok(snapshot.ui_amount_a(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clmm_keeper_domain::value_objects::Percentage;
    use rust_decimal_macros::dec;

    fn snapshot(tick: i32) -> PoolSnapshot {
        let sqrt_price = tick_to_sqrt_price(tick).unwrap();
        PoolSnapshot {
            current_price: sqrt_price * sqrt_price,
            current_tick: tick,
            total_liquidity: 1_000_000_000,
            tick_spacing: 10,
            sqrt_price,
            decimals_a: 6,
            decimals_b: 6,
            fee_rate: Percentage::from_bps(30),
        }
    }

    fn position(lower: i32, upper: i32) -> RangePosition {
        RangePosition {
            tick_lower: lower,
            tick_upper: upper,
            liquidity: 50_000_000,
            owed_amount_a: 0,
            owed_amount_b: 0,
        }
    }

    #[test]
    fn test_exposure_is_all_token_a_below_range() {
        let exposure = position_exposure(&snapshot(-500), &position(100, 200)).unwrap();
        assert!(exposure > dec!(0));
    }

    #[test]
    fn test_exposure_is_zero_above_range() {
        let exposure = position_exposure(&snapshot(500), &position(100, 200)).unwrap();
        assert_eq!(exposure, dec!(0));
    }

    #[tokio::test]
    async fn test_disabled_hedge_is_always_healthy() {
        let id = PositionId::new("Pos1").unwrap();
        assert!(DisabledHedge.check_health(&id).await.unwrap());
        assert!(DisabledHedge.adjust_hedge(dec!(1.5), &id).await.is_ok());
    }
}
