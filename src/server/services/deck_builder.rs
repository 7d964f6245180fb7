use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::server::models::PresentationStrawman;

#[derive(Error, Debug)]
pub enum DeckBuilderError {
    #[error("preview request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("preview request error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct PreviewRequest<'a> {
    presentation_id: &'a str,
    strawman: &'a PresentationStrawman,
}

#[derive(Debug, Deserialize)]
pub struct PreviewResponse {
    pub preview_url: String,
    pub preview_id: String,
}

#[derive(Debug, Serialize)]
struct AssembleRequest<'a> {
    presentation_id: &'a str,
    strawman: &'a PresentationStrawman,
    slides: &'a [crate::server::services::scheduler::GeneratedSlide],
}

#[derive(Debug, Deserialize)]
pub struct AssembleResponse {
    pub url: String,
}

/// Client for the deck-builder/renderer service that turns a strawman into
/// a preview HTML deck. Optional; absence of a preview never blocks the
/// dialog.
#[derive(Debug, Clone)]
pub struct DeckBuilderClient {
    client: Client,
    base_url: String,
}

impl DeckBuilderClient {
    pub fn new(base_url: String) -> Self {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }

    pub async fn build_preview(
        &self,
        presentation_id: &str,
        strawman: &PresentationStrawman,
    ) -> Result<PreviewResponse, DeckBuilderError> {
        let response = self
            .client
            .post(format!("{}/preview", self.base_url.trim_end_matches('/')))
            .json(&PreviewRequest {
                presentation_id,
                strawman,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeckBuilderError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let preview: PreviewResponse = response.json().await?;
        info!(presentation_id, url = %preview.preview_url, "preview built");
        Ok(preview)
    }

    /// Assemble the final rendered deck from the strawman and the generated
    /// slide content.
    pub async fn assemble(
        &self,
        presentation_id: &str,
        strawman: &PresentationStrawman,
        slides: &[crate::server::services::scheduler::GeneratedSlide],
    ) -> Result<AssembleResponse, DeckBuilderError> {
        let response = self
            .client
            .post(format!("{}/assemble", self.base_url.trim_end_matches('/')))
            .json(&AssembleRequest {
                presentation_id,
                strawman,
                slides,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeckBuilderError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let assembled: AssembleResponse = response.json().await?;
        info!(presentation_id, url = %assembled.url, "final deck assembled");
        Ok(assembled)
    }
}
