//! Books API Data Transfer Objects
//!
//! These types match what the volumes endpoint returns.
//! DO NOT use these types outside the bibliographic module - convert to domain types.
//!
//! API Reference: https://developers.google.com/books/docs/v1/reference/volumes

use serde::{Deserialize, Serialize};

/// Response from `GET /volumes?q=...`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesResponse {
    #[serde(default)]
    pub total_items: u32,
    /// Absent entirely when nothing matched
    #[serde(default)]
    pub items: Vec<Volume>,
}

/// One volume record
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub volume_info: VolumeInfo,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub industry_identifiers: Vec<IndustryIdentifier>,
}

/// `{"type": "ISBN_13", "identifier": "9780765326355"}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndustryIdentifier {
    /// ISBN_10, ISBN_13, ISSN or OTHER
    #[serde(rename = "type")]
    pub id_type: String,
    pub identifier: String,
}

/// Error envelope returned with 4xx responses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiErrorBody {
    pub code: u16,
    pub message: String,
}
