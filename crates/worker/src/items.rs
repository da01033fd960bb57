//! Concrete item payloads. The generated item schema is out of scope
//! (spec §1); `Product` carries the fields the ASOS parser actually fills
//! in and serializes the way the real schema message would over the wire.

use serde::Serialize;

use crate::parser::ItemPayload;

#[derive(Debug, Clone, Serialize)]
pub struct ProductSource {
	pub id: String,
	pub crawl_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
	pub source: ProductSource,
	pub title: String,
	pub brand_name: String,
	pub current_price: f64,
	pub currency: String,
	pub description: String,
	pub images: Vec<String>,
	pub rating: f64,
	pub review_count: i64,
}

impl ItemPayload for Product {
	fn type_url(&self) -> &'static str {
		"voila.items.v1.Product"
	}

	fn to_json(&self) -> serde_json::Value {
		serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
	}
}
