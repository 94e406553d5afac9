//! Address normalization
//!
//! TON addresses come in a raw form (`0:<hex>`) and several base64
//! "friendly" forms. Conversion is delegated to TonAPI's address parser;
//! this module only picks the forms the proxy reports.

use serde::Serialize;
use tonapi::{ParsedAddress, TonApi};

/// The forms of one address the proxy works with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressForms {
    /// `0:<hex>`; used as the transaction cache key
    pub raw: String,
    /// URL-safe, non-bounceable; what the proxy shows to users
    pub friendly: String,
    /// URL-safe, bounceable
    pub bounceable: String,
}

impl From<ParsedAddress> for AddressForms {
    fn from(parsed: ParsedAddress) -> Self {
        Self {
            raw: parsed.raw_form,
            friendly: parsed.non_bounceable.b64url,
            bounceable: parsed.bounceable.b64url,
        }
    }
}

/// Resolve all forms of `address`, which may be given in any form
pub async fn resolve(api: &TonApi, address: &str) -> tonapi::Result<AddressForms> {
    let parsed = api.parse_address(address.trim()).await?;
    Ok(parsed.into())
}

/// Non-bounceable friendly form
pub async fn friendly(api: &TonApi, address: &str) -> tonapi::Result<String> {
    Ok(resolve(api, address).await?.friendly)
}

/// Raw `0:<hex>` form
pub async fn raw(api: &TonApi, address: &str) -> tonapi::Result<String> {
    Ok(resolve(api, address).await?.raw)
}
