//! Payment method taxonomy shared between the cart engine's payment engine
//! (C8) and the transaction/report types (§4.3, §6.2).

use serde::{Deserialize, Serialize};

/// The closed set of payment methods a tenant may configure (§4.3). New
/// methods are added here, not discovered at runtime — C8's
/// `PaymentMethodRegistry` maps each variant to its tender/change rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodCode {
    Cash,
    Cashless,
    Other,
}

impl PaymentMethodCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodCode::Cash => "cash",
            PaymentMethodCode::Cashless => "cashless",
            PaymentMethodCode::Other => "other",
        }
    }

    /// The two-digit wire code from §4.3's configuration table (`01`, `11`, `12`).
    pub fn wire_code(&self) -> &'static str {
        match self {
            PaymentMethodCode::Cash => "01",
            PaymentMethodCode::Cashless => "11",
            PaymentMethodCode::Other => "12",
        }
    }

    pub fn from_wire_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(PaymentMethodCode::Cash),
            "11" => Some(PaymentMethodCode::Cashless),
            "12" => Some(PaymentMethodCode::Other),
            _ => None,
        }
    }

    /// Whether this method can produce change (only cash can, §4.3 rule 2).
    pub fn allows_change(&self) -> bool {
        matches!(self, PaymentMethodCode::Cash)
    }

    /// All three configured methods allow split/partial tender (§4.3).
    pub fn allows_partial(&self) -> bool {
        true
    }
}
