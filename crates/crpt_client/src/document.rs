//! Wire model of the document creation request.
//!
//! The remote API rejects unknown or missing fields, so these structs mirror its
//! schema one to one. Field order follows the schema as well; `serde_json` writes
//! fields in declaration order.

use bon::Builder;
use serde::{Deserialize, Serialize};

/// A document submitted to `POST /api/v3/lk/documents/create`.
///
/// # Example
///
/// ```rust
/// use crpt_client::document::{Description, Document, Product};
///
/// let document = Document::builder()
///     .description(Description::new("7700000000"))
///     .doc_id("doc-1")
///     .doc_status("NEW")
///     .doc_type("LP_INTRODUCE_GOODS")
///     .owner_inn("7700000000")
///     .participant_inn("7700000000")
///     .producer_inn("7700000000")
///     .production_date("2024-01-15")
///     .production_type("OWN_PRODUCTION")
///     .products(vec![Product::builder().uit_code("010461").build()])
///     .reg_date("2024-01-16")
///     .reg_number("42")
///     .build();
///
/// let json = serde_json::to_value(&document).unwrap();
/// assert_eq!(json["importRequest"], false);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Builder)]
#[serde(deny_unknown_fields)]
#[builder(on(String, into))]
pub struct Document {
    pub description: Description,
    pub doc_id: String,
    pub doc_status: String,
    pub doc_type: String,
    #[serde(rename = "importRequest")]
    #[builder(default)]
    pub import_request: bool,
    pub owner_inn: String,
    pub participant_inn: String,
    pub producer_inn: String,
    pub production_date: String,
    pub production_type: String,
    #[builder(default)]
    pub products: Vec<Product>,
    pub reg_date: String,
    pub reg_number: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Description {
    pub participant_inn: String,
}

impl Description {
    pub fn new(participant_inn: impl Into<String>) -> Self {
        Self {
            participant_inn: participant_inn.into(),
        }
    }
}

/// One product line of a [`Document`]. Unset fields serialize as empty strings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default, Builder)]
#[serde(deny_unknown_fields)]
#[builder(on(String, into))]
pub struct Product {
    #[builder(default)]
    pub certificate_document: String,
    #[builder(default)]
    pub certificate_document_date: String,
    #[builder(default)]
    pub certificate_document_number: String,
    #[builder(default)]
    pub owner_inn: String,
    #[builder(default)]
    pub producer_inn: String,
    #[builder(default)]
    pub production_date: String,
    #[builder(default)]
    pub tnved_code: String,
    #[builder(default)]
    pub uit_code: String,
    #[builder(default)]
    pub uitu_code: String,
}
