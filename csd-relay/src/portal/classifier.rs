//! Portal response classification
//!
//! Rules, in order:
//! 1. non-2xx status: retryable failure
//! 2. a rejection selector matches an element with text: rejected, text verbatim
//! 3. a success text appears (case-insensitive): success
//! 4. anything else: per [`UnrecognizedResponse`]

use scraper::{ElementRef, Html, Selector};

use super::{PortalError, SubmitOutcome, VERIFY_MANUALLY};
use crate::config::{PortalMarkers, UnrecognizedResponse};

/// Pure classifier built once from configured markers
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    success_texts: Vec<String>,
    rejection_selectors: Vec<Selector>,
    confirmation_selector: Option<Selector>,
    unrecognized: UnrecognizedResponse,
}

fn parse_selector(css: &str) -> Result<Selector, PortalError> {
    Selector::parse(css).map_err(|e| PortalError::Config(format!("selector '{}': {}", css, e)))
}

/// Element text with whitespace runs collapsed to single spaces
fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

impl ResponseClassifier {
    /// Compile the markers; an invalid selector is a configuration error
    pub fn new(markers: &PortalMarkers) -> Result<Self, PortalError> {
        let rejection_selectors = markers
            .rejection_selectors
            .iter()
            .map(|css| parse_selector(css))
            .collect::<Result<Vec<_>, _>>()?;

        let confirmation_selector = markers
            .confirmation_selector
            .as_deref()
            .map(parse_selector)
            .transpose()?;

        Ok(Self {
            success_texts: markers
                .success_texts
                .iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            rejection_selectors,
            confirmation_selector,
            unrecognized: markers.unrecognized_response,
        })
    }

    pub fn classify(&self, status: u16, body: &str) -> SubmitOutcome {
        if !(200..300).contains(&status) {
            return PortalError::Status(status).into();
        }

        let document = Html::parse_document(body);

        for selector in &self.rejection_selectors {
            if let Some(message) = document
                .select(selector)
                .map(element_text)
                .find(|text| !text.is_empty())
            {
                return PortalError::Rejected(message).into();
            }
        }

        let page_text = element_text(document.root_element()).to_lowercase();
        if self.success_texts.iter().any(|t| page_text.contains(t.as_str())) {
            let confirmation_code = self
                .confirmation_selector
                .as_ref()
                .and_then(|selector| {
                    document
                        .select(selector)
                        .map(element_text)
                        .find(|text| !text.is_empty())
                })
                .unwrap_or_else(|| VERIFY_MANUALLY.to_string());
            return SubmitOutcome::Success { confirmation_code };
        }

        match self.unrecognized {
            UnrecognizedResponse::Retry => SubmitOutcome::Failure {
                retryable: true,
                message: "Portal response matched no success or rejection marker".to_string(),
            },
            UnrecognizedResponse::AcceptUnverified => SubmitOutcome::Success {
                confirmation_code: VERIFY_MANUALLY.to_string(),
            },
        }
    }
}
