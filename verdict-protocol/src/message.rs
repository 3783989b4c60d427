//! RPC message types.

use serde::{Deserialize, Serialize};

/// One string attribute of a request, or of an obligation in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub value: String,
}

impl Attribute {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute {
            id: id.into(),
            value: value.into(),
        }
    }
}

/// Client → server: the attribute-value request to validate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// The decision verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Permit,
    Deny,
}

/// Server → client: the verdict plus any obligations (for example a
/// `redirect_to` target accompanying a deny).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub effect: Effect,
    #[serde(default)]
    pub obligations: Vec<Attribute>,
}

impl ValidateResponse {
    pub fn deny() -> Self {
        ValidateResponse {
            effect: Effect::Deny,
            obligations: Vec::new(),
        }
    }

    pub fn permit() -> Self {
        ValidateResponse {
            effect: Effect::Permit,
            obligations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_wire_names() {
        assert_eq!(serde_json::to_string(&Effect::Permit).unwrap(), "\"PERMIT\"");
        assert_eq!(serde_json::to_string(&Effect::Deny).unwrap(), "\"DENY\"");
    }

    #[test]
    fn request_serde_round_trip() {
        let req = ValidateRequest {
            attributes: vec![
                Attribute::new("customer_id", "c1"),
                Attribute::new("q", "x"),
            ],
        };
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: ValidateRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn missing_fields_default() {
        let req: ValidateRequest = serde_json::from_str("{}").unwrap();
        assert!(req.attributes.is_empty());
        let resp: ValidateResponse =
            serde_json::from_str("{\"effect\": \"DENY\"}").unwrap();
        assert_eq!(resp, ValidateResponse::deny());
    }
}
