//! Known event-type content validation.
//!
//! A small builtin table maps registered types to the JSON shape their
//! `content` must take. Unregistered types are accepted as opaque.

use serde_json::Value;

use trove_core::ApiError;

enum Shape {
    Number,
    Text,
    /// Content must be absent or null.
    Empty,
}

fn registered(event_type: &str) -> Option<Shape> {
    match event_type {
        "count/generic" | "mass/kg" | "money/chf" | "temperature/c" | "length/m"
        | "energy/kcal" | "ratio/percent" => Some(Shape::Number),
        "note/txt" | "note/html" | "url/web" => Some(Shape::Text),
        "activity/plain" | "picture/attached" | "file/attached" => Some(Shape::Empty),
        _ => None,
    }
}

/// Validate `content` against the table when the type is registered.
pub fn validate_content(event_type: &str, content: Option<&Value>) -> Result<(), ApiError> {
    let Some(shape) = registered(event_type) else {
        return Ok(());
    };
    let ok = match (&shape, content) {
        (Shape::Number, Some(v)) => v.is_number(),
        (Shape::Text, Some(v)) => v.is_string(),
        (Shape::Empty, Some(v)) => v.is_null(),
        (Shape::Number | Shape::Text, None) => false,
        (Shape::Empty, None) => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ApiError::invalid_parameters(format!(
            "Invalid content for event type \"{event_type}\""
        )))
    }
}
