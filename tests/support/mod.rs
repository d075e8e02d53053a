//! Fakes used across the pipeline scenario tests (`spec.md` §8), mirroring
//! the teacher's own `FakeTextExtractor`/`FakeStructuredExtractor` style of
//! testing the scheduler against a real `SqliteRepository` rather than
//! mocking the database.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use deed_pipeline::cancel::CancelToken;
use deed_pipeline::error::PipelineError;
use deed_pipeline::extractor::{ExtractionOutput, TextExtractor};
use deed_pipeline::llm::StructuredExtractor;
use deed_pipeline::models::{Party, Property, StructuredRecord};

pub struct FakeTextExtractor {
    pub delay: Duration,
}

impl FakeTextExtractor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl TextExtractor for FakeTextExtractor {
    async fn extract(
        &self,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractionOutput, PipelineError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("doc")
            .to_string();
        Ok(ExtractionOutput {
            text: format!("text-{stem}"),
            page_count: 1,
            elapsed_ms: self.delay.as_millis() as u64,
        })
    }
}

pub struct FakeStructuredExtractor {
    pub delay: Duration,
    pub fail_markers: Mutex<HashSet<String>>,
}

impl FakeStructuredExtractor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_markers: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_failures(delay: Duration, markers: &[&str]) -> Self {
        Self {
            delay,
            fail_markers: Mutex::new(markers.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl StructuredExtractor for FakeStructuredExtractor {
    async fn parse(&self, text: &str) -> Result<StructuredRecord, PipelineError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = self
            .fail_markers
            .lock()
            .unwrap()
            .iter()
            .any(|marker| text.contains(marker.as_str()));
        if should_fail {
            return Err(PipelineError::LlmParse("forced test failure".to_string()));
        }

        Ok(valid_record())
    }
}

pub fn valid_record() -> StructuredRecord {
    StructuredRecord {
        transaction_date: Some("2024-01-01".to_string()),
        registration_office: Some("Sub-Registrar, Bengaluru".to_string()),
        property: Property {
            survey_number: Some("123/4".to_string()),
            village: Some("Yelahanka".to_string()),
            taluk: Some("Bengaluru North".to_string()),
            district: Some("Bengaluru Urban".to_string()),
            site_area_sqft: Some(1200.0),
            built_up_area_sqft: Some(900.0),
            sale_consideration: Some("Rs. 45,00,000/-".to_string()),
            total_fee: Some("Rs. 50,000/-".to_string()),
            registration_fee: Some("Rs. 45,000/-".to_string()),
            vision_registration_fee: None,
        },
        buyers: vec![Party {
            name: "Ramesh Kumar".to_string(),
            father_name: Some("Krishnappa".to_string()),
            date_of_birth: None,
            aadhaar: Some("123456789012".to_string()),
            pan: Some("ABCDE1234F".to_string()),
            address: Some("Bengaluru".to_string()),
            property_share: None,
        }],
        sellers: vec![Party {
            name: "Suresh Rao".to_string(),
            father_name: Some("Rao Senior".to_string()),
            date_of_birth: None,
            aadhaar: Some("987654321098".to_string()),
            pan: Some("FGHIJ5678K".to_string()),
            address: Some("Bengaluru".to_string()),
            property_share: Some("full".to_string()),
        }],
        confirming_parties: vec![],
    }
}

pub fn write_pdf(path: &Path) {
    std::fs::write(path, b"%PDF-1.4 fake").unwrap();
}
