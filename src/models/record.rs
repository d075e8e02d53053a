//! The structured record a `StructuredExtractor` parses out of OCR text:
//! a document + property + one-to-many buyers, sellers, confirming parties.

use serde::{Deserialize, Serialize};

/// The full parsed output for one deed, before and after `Validator::clean`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub transaction_date: Option<String>,
    pub registration_office: Option<String>,
    pub property: Property,
    #[serde(default)]
    pub buyers: Vec<Party>,
    #[serde(default)]
    pub sellers: Vec<Party>,
    #[serde(default)]
    pub confirming_parties: Vec<Party>,
}

/// Monetary fields are kept as the original human-written string (e.g.
/// "Rs. 45,00,000/-") — normalization must preserve that form, not replace it
/// with a parsed number. Areas are genuinely numeric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Property {
    pub survey_number: Option<String>,
    pub village: Option<String>,
    pub taluk: Option<String>,
    pub district: Option<String>,
    pub site_area_sqft: Option<f64>,
    pub built_up_area_sqft: Option<f64>,
    pub sale_consideration: Option<String>,
    pub total_fee: Option<String>,
    pub registration_fee: Option<String>,
    /// Vision-extracted registration fee from the separate table-detection
    /// pass (`spec.md` §1, out of scope here; cross-checked when present).
    pub vision_registration_fee: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
    Buyer,
    Seller,
    ConfirmingParty,
}

impl PartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyRole::Buyer => "buyer",
            PartyRole::Seller => "seller",
            PartyRole::ConfirmingParty => "confirming_party",
        }
    }

    /// The repository table a party of this role is stored in.
    pub fn table_name(&self) -> &'static str {
        match self {
            PartyRole::Buyer => "buyers",
            PartyRole::Seller => "sellers",
            PartyRole::ConfirmingParty => "confirming_parties",
        }
    }
}

/// A buyer, seller, or confirming party. `property_share` is only meaningful
/// for sellers but is carried on the shared struct to keep `Validator` and
/// the repository's row mapping uniform across the three roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub father_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub aadhaar: Option<String>,
    pub pan: Option<String>,
    pub address: Option<String>,
    pub property_share: Option<String>,
}
