//! Request and response bodies, shared with the OpenAPI document.
//!
//! The wire types live in [`gesture_core::protocol`] so the relay and its
//! callers serialize the same structs.

pub use gesture_core::protocol::{ChatRequest, ErrorBody};

#[cfg(test)]
mod tests {
    use crate::router::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn test_schemas_come_from_wire_types() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schemas = &doc["components"]["schemas"];
        assert_eq!(schemas["ChatRequest"]["required"], serde_json::json!(["prompt"]));
        assert_eq!(schemas["ErrorBody"]["required"], serde_json::json!(["error"]));
        assert!(schemas.get("ChatPayload").is_none());
    }
}
