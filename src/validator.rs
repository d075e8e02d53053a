//! Cleans a freshly-parsed [`StructuredRecord`] before it is persisted
//! (`spec.md` §4.D.4 step 3): monetary normalization, Aadhaar/PAN shape
//! checks, registration-fee cross-check, and father-name/DOB extraction from
//! relation markers the LLM often leaves embedded in the name field.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::PipelineError;
use crate::models::{Party, StructuredRecord};

static AADHAAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{12}$").unwrap());
static PAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").unwrap());

/// English and Kannada relation markers that precede a father's or husband's
/// name inside a party's `name` field, e.g. "Ramesh S/O Krishnappa" or
/// "ರಮೇಶ್ ಮಗ ಕೃಷ್ಣಪ್ಪ".
static RELATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:S/O|D/O|W/O|ಮಗ|ಮಗಳು|ಪತ್ನಿ)\.?\s*([^,;]+)").unwrap()
});

static DOB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:DOB|D\.O\.B\.?|date of birth)\s*[:\-]?\s*([0-9]{1,2}[/\-][0-9]{1,2}[/\-][0-9]{2,4})").unwrap()
});

/// Digits only, used for the registration-fee ratio check — amounts carry
/// currency symbols, commas, and trailing "/-" that must not affect it.
fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn normalize_monetary(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn clean_aadhaar(value: Option<String>) -> Option<String> {
    value.filter(|v| AADHAAR_RE.is_match(v.trim()))
}

fn clean_pan(value: Option<String>) -> Option<String> {
    value.filter(|v| PAN_RE.is_match(v.trim()))
}

/// Split a relation marker out of `name`, returning the cleaned name and the
/// extracted father/husband name if a marker was found and `father_name` was
/// not already populated.
fn extract_relation(name: &str, existing_father_name: Option<String>) -> (String, Option<String>) {
    if existing_father_name.is_some() {
        return (name.to_string(), existing_father_name);
    }

    match RELATION_RE.find(name) {
        Some(m) => {
            let captures = RELATION_RE.captures(name).unwrap();
            let relation_name = captures.get(1).map(|g| g.as_str().trim().to_string());
            let cleaned_name = format!("{}{}", &name[..m.start()], &name[m.end()..]);
            (cleaned_name.trim().trim_end_matches(',').trim().to_string(), relation_name)
        }
        None => (name.to_string(), None),
    }
}

fn extract_dob(address: Option<&str>, name: &str) -> Option<String> {
    for haystack in [address.unwrap_or(""), name] {
        if let Some(caps) = DOB_RE.captures(haystack) {
            return caps.get(1).map(|g| g.as_str().to_string());
        }
    }
    None
}

fn clean_party(mut party: Party) -> Party {
    let (name, father_name) = extract_relation(&party.name, party.father_name.take());
    party.name = name;
    party.father_name = father_name;
    party.date_of_birth = party
        .date_of_birth
        .take()
        .or_else(|| extract_dob(party.address.as_deref(), &party.name));
    party.aadhaar = clean_aadhaar(party.aadhaar.take());
    party.pan = clean_pan(party.pan.take());
    party
}

/// Apply every cleaning rule and report whether the record is fit to
/// persist. A record with no buyers and no sellers can't be tied to a
/// transaction at all and is rejected (`spec.md` §9 open question: routed to
/// `failed/` with `ValidationError`, not silently dropped).
pub fn clean(mut record: StructuredRecord) -> Result<StructuredRecord, PipelineError> {
    if record.buyers.is_empty() && record.sellers.is_empty() {
        return Err(PipelineError::ValidationError(
            "record has no buyers or sellers".to_string(),
        ));
    }

    record.property.registration_fee = normalize_monetary(record.property.registration_fee.take());
    record.property.total_fee = normalize_monetary(record.property.total_fee.take());
    record.property.sale_consideration = normalize_monetary(record.property.sale_consideration.take());

    if record.property.vision_registration_fee.is_some() {
        if let (Some(reg_fee), Some(total_fee)) = (
            record.property.registration_fee.clone(),
            record.property.total_fee.clone(),
        ) {
            let reg_digits = digits_only(&reg_fee);
            let total_digits = digits_only(&total_fee);
            let ratio_is_one = !reg_digits.is_empty()
                && !total_digits.is_empty()
                && reg_digits.trim_start_matches('0') == total_digits.trim_start_matches('0');

            if ratio_is_one || reg_digits.len() < 3 {
                record.property.registration_fee = None;
            }
        }
    }

    record.buyers = record.buyers.into_iter().map(clean_party).collect();
    record.sellers = record.sellers.into_iter().map(clean_party).collect();
    record.confirming_parties = record
        .confirming_parties
        .into_iter()
        .map(clean_party)
        .collect();

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Property;

    fn record_with(buyers: Vec<Party>, sellers: Vec<Party>) -> StructuredRecord {
        StructuredRecord {
            transaction_date: Some("2024-01-01".into()),
            registration_office: Some("Sub-Registrar, Bengaluru".into()),
            property: Property::default(),
            buyers,
            sellers,
            confirming_parties: vec![],
        }
    }

    fn party(name: &str) -> Party {
        Party {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_record_with_no_parties() {
        let record = record_with(vec![], vec![]);
        assert!(clean(record).is_err());
    }

    #[test]
    fn nulls_malformed_aadhaar_and_pan() {
        let mut buyer = party("Ramesh Kumar");
        buyer.aadhaar = Some("12345".to_string());
        buyer.pan = Some("not-a-pan".to_string());

        let record = record_with(vec![buyer], vec![]);
        let cleaned = clean(record).unwrap();
        assert_eq!(cleaned.buyers[0].aadhaar, None);
        assert_eq!(cleaned.buyers[0].pan, None);
    }

    #[test]
    fn keeps_valid_aadhaar_and_pan() {
        let mut buyer = party("Ramesh Kumar");
        buyer.aadhaar = Some("123456789012".to_string());
        buyer.pan = Some("ABCDE1234F".to_string());

        let record = record_with(vec![buyer], vec![]);
        let cleaned = clean(record).unwrap();
        assert_eq!(cleaned.buyers[0].aadhaar.as_deref(), Some("123456789012"));
        assert_eq!(cleaned.buyers[0].pan.as_deref(), Some("ABCDE1234F"));
    }

    #[test]
    fn extracts_father_name_from_relation_marker() {
        let buyer = party("Ramesh S/O Krishnappa");
        let record = record_with(vec![buyer], vec![]);
        let cleaned = clean(record).unwrap();
        assert_eq!(cleaned.buyers[0].name, "Ramesh");
        assert_eq!(cleaned.buyers[0].father_name.as_deref(), Some("Krishnappa"));
    }

    #[test]
    fn nulls_registration_fee_when_ratio_is_one() {
        let buyer = party("Ramesh Kumar");
        let mut record = record_with(vec![buyer], vec![]);
        record.property.vision_registration_fee = Some("Rs. 50,000/-".to_string());
        record.property.registration_fee = Some("Rs. 50,000/-".to_string());
        record.property.total_fee = Some("Rs. 50,000/-".to_string());

        let cleaned = clean(record).unwrap();
        assert_eq!(cleaned.property.registration_fee, None);
    }

    #[test]
    fn nulls_registration_fee_with_too_few_digits() {
        let buyer = party("Ramesh Kumar");
        let mut record = record_with(vec![buyer], vec![]);
        record.property.vision_registration_fee = Some("Rs. 50/-".to_string());
        record.property.registration_fee = Some("Rs. 5/-".to_string());
        record.property.total_fee = Some("Rs. 50,000/-".to_string());

        let cleaned = clean(record).unwrap();
        assert_eq!(cleaned.property.registration_fee, None);
    }
}
