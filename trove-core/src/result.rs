//! Bounded accumulation of method results.
//!
//! Storage hands back lazy sequences; the builder drains them into named
//! arrays under a hard size cap so one query can never balloon the process.
//! Taking the source by value keeps backpressure semantics simple: only raw,
//! un-piped sequences can reach the builder.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Default cap on any single result array.
pub const DEFAULT_ARRAY_LIMIT: usize = 100_000;

/// Accumulates the result object of one method call.
pub struct ResultBuilder {
    array_limit: usize,
    object: Map<String, Value>,
    open_concat: Vec<String>,
}

impl ResultBuilder {
    pub fn new(array_limit: usize) -> Self {
        Self {
            array_limit,
            object: Map::new(),
            open_concat: Vec::new(),
        }
    }

    /// Set a single value under `key` (e.g. `event`, `stream`).
    pub fn set(&mut self, key: &str, value: Value) {
        self.object.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.object.get(key)
    }

    /// Drain a lazy source into `result[key]`, failing the whole call when
    /// the cap is exceeded.
    pub async fn add_stream(
        &mut self,
        key: &str,
        mut source: BoxStream<'_, Result<Value, ApiError>>,
    ) -> Result<(), ApiError> {
        let mut items = Vec::new();
        while let Some(item) = source.next().await {
            items.push(item?);
            if items.len() > self.array_limit {
                return Err(ApiError::too_many_results(self.array_limit));
            }
        }
        self.object.insert(key.to_string(), Value::Array(items));
        Ok(())
    }

    /// Append a source to the concatenated array under `key`; sources are
    /// concatenated in the order they are added, until [`close_concat`].
    ///
    /// [`close_concat`]: ResultBuilder::close_concat
    pub async fn add_concat_stream(
        &mut self,
        key: &str,
        mut source: BoxStream<'_, Result<Value, ApiError>>,
    ) -> Result<(), ApiError> {
        if !self.open_concat.iter().any(|k| k == key) {
            self.open_concat.push(key.to_string());
            self.object.insert(key.to_string(), Value::Array(Vec::new()));
        }
        let len = |object: &Map<String, Value>| {
            object
                .get(key)
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0)
        };
        while let Some(item) = source.next().await {
            let item = item?;
            if len(&self.object) >= self.array_limit {
                return Err(ApiError::too_many_results(self.array_limit));
            }
            if let Some(Value::Array(items)) = self.object.get_mut(key) {
                items.push(item);
            }
        }
        Ok(())
    }

    /// Close the concatenated array under `key`; later adds start a new one.
    pub fn close_concat(&mut self, key: &str) {
        self.open_concat.retain(|k| k != key);
    }

    /// Serialize the accumulated object.
    pub fn into_value(self) -> Value {
        Value::Object(self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    fn source(values: Vec<Value>) -> BoxStream<'static, Result<Value, ApiError>> {
        stream::iter(values.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn drains_sources_under_named_keys() {
        let mut builder = ResultBuilder::new(10);
        builder
            .add_stream("events", source(vec![json!({"id": "e1"}), json!({"id": "e2"})]))
            .await
            .unwrap();
        builder.set("meta-free", json!(true));
        let v = builder.into_value();
        assert_eq!(v["events"].as_array().unwrap().len(), 2);
        assert_eq!(v["meta-free"], json!(true));
    }

    #[tokio::test]
    async fn enforces_the_array_limit() {
        let mut builder = ResultBuilder::new(2);
        let err = builder
            .add_stream("events", source(vec![json!(1), json!(2), json!(3)]))
            .await
            .unwrap_err();
        assert_eq!(err.id, crate::error::ErrorId::TooManyResults);
    }

    #[tokio::test]
    async fn source_errors_fail_the_call() {
        let mut builder = ResultBuilder::new(10);
        let failing = stream::iter(vec![
            Ok(json!(1)),
            Err(ApiError::unexpected("backend lost")),
        ])
        .boxed();
        assert!(builder.add_stream("events", failing).await.is_err());
    }

    #[tokio::test]
    async fn concat_joins_sources_in_order() {
        let mut builder = ResultBuilder::new(10);
        builder
            .add_concat_stream("events", source(vec![json!(1)]))
            .await
            .unwrap();
        builder
            .add_concat_stream("events", source(vec![json!(2), json!(3)]))
            .await
            .unwrap();
        builder.close_concat("events");
        let v = builder.into_value();
        assert_eq!(v["events"], json!([1, 2, 3]));
    }
}
