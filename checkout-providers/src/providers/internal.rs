//! Internal settlement: `Dummy` for testing and `Balance` for in-account
//! credit. Both settle at checkout time.
//!
//! The order id is the payment metadata itself, encoded as an opaque token,
//! so reconciliation needs no storage and no network.

use async_trait::async_trait;
use checkout_types::{
    NotifyRequest, NotifyResult, PayReq, PayResp, PaymentMetadata, PaymentProvider,
    ProviderError, Settlement,
};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct InternalProvider {
    name: &'static str,
    requires_payer: bool,
}

impl InternalProvider {
    pub fn dummy() -> Self {
        Self {
            name: "Dummy",
            requires_payer: false,
        }
    }

    /// Balance payments are debited from the payer's account, so the payer
    /// must be known.
    pub fn balance() -> Self {
        Self {
            name: "Balance",
            requires_payer: true,
        }
    }
}

#[async_trait]
impl PaymentProvider for InternalProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    #[instrument(skip(self, req), fields(provider = self.name, payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        if self.requires_payer && req.payer_id.trim().is_empty() {
            return Err(ProviderError::InvalidRequest(
                "Balance payment requires a payer id".into(),
            ));
        }

        let order_id = req.metadata()?.to_token()?;
        info!("Settled internal payment");

        let mut resp = PayResp {
            pay_url: req.return_url.clone(),
            order_id,
            ..Default::default()
        };
        if self.requires_payer {
            resp.attach_info
                .insert("payer_id".to_string(), req.payer_id.clone());
        }
        Ok(resp)
    }

    #[instrument(skip(self, req), fields(provider = self.name))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        let metadata = PaymentMetadata::from_token(&req.order_id)?;
        let (price, currency) = metadata.require_price()?;
        let settlement = Settlement::from_metadata(&metadata, price, currency)?;
        Ok(NotifyResult::paid(req.order_id.clone(), settlement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_types::{CodecError, PaymentState};
    use rust_decimal::Decimal;

    fn req() -> PayReq {
        PayReq {
            provider_name: "balance".into(),
            product_name: "p1".into(),
            product_display_name: "Plan One".into(),
            payment_name: "pay-123".into(),
            payer_id: "user-7".into(),
            price: Decimal::new(1050, 2),
            currency: "USD".into(),
            return_url: "https://shop.example/return".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pay_then_notify_is_paid() {
        let provider = InternalProvider::balance();
        let resp = provider.pay(&req()).await.unwrap();
        assert_eq!(resp.pay_url, "https://shop.example/return");
        assert_eq!(resp.attach_info["payer_id"], "user-7");

        let result = provider
            .notify(&NotifyRequest::poll(&resp.order_id))
            .await
            .unwrap();
        assert_eq!(result.payment_status, PaymentState::Paid);
        assert_eq!(result.payment_name(), Some("pay-123"));
        assert_eq!(result.product_name(), Some("p1"));
        assert_eq!(result.price(), Some(Decimal::new(1050, 2)));
        assert_eq!(result.currency(), Some("USD"));
    }

    #[tokio::test]
    async fn test_notify_is_idempotent() {
        let provider = InternalProvider::dummy();
        let resp = provider.pay(&req()).await.unwrap();
        let first = provider.notify(&NotifyRequest::poll(&resp.order_id)).await.unwrap();
        let second = provider.notify(&NotifyRequest::poll(&resp.order_id)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_balance_requires_payer() {
        let mut req = req();
        req.payer_id.clear();
        let err = InternalProvider::balance().pay(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(InternalProvider::dummy().pay(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_tampered_order_id_is_rejected() {
        let err = InternalProvider::dummy()
            .notify(&NotifyRequest::poll("%%%"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Codec(CodecError::InvalidOrderToken(_))
        ));
    }
}
