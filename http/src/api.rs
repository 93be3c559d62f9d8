//! Wire shapes of the commerce service

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateProductRequest<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub price: u64,
    pub stock: u32,
}

/// Product ids are UUID strings on some deployments and integers on others
#[derive(Debug, Deserialize)]
pub(crate) struct CreatedResource {
    pub id: Value,
}

impl CreatedResource {
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OrderItem<'a> {
    pub product_id: &'a str,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateOrderRequest<'a> {
    pub items: Vec<OrderItem<'a>>,
    pub shipping_address: &'a ShippingAddress,
}

/// Delivery address attached to every order the harness places
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    /// Recipient
    pub recipient_name: String,
    /// Contact phone
    pub phone: String,
    /// Street address
    pub address: String,
    /// Apartment, floor, etc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_detail: Option<String>,
    /// Postal code
    pub postal_code: String,
}

impl Default for ShippingAddress {
    fn default() -> Self {
        Self {
            recipient_name: "Load Tester".into(),
            phone: "010-0000-0000".into(),
            address: "1 Benchmark Street".into(),
            address_detail: Some("Suite 100".into()),
            postal_code: "00000".into(),
        }
    }
}
