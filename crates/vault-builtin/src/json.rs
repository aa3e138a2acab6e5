//! JSON codecs: a value `Serializer` and a newline-delimited-JSON `StreamSerializer`.
//!
//! Grounded in the original implementation's `labox.builtin.serializers.json` /
//! `lakery.builtin.serializers.json` pair: one codec serializes a whole value to a single
//! JSON document, the other serializes a sequence of values as one JSON value per line
//! (`application/x-ndjson`), so a stream content never has to buffer more than one value's
//! worth of bytes at a time.

use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Buf;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use vault_core::{CoreError, SerializedData, SerializedDataStream, Serializer, StreamSerializer};

/// Serializes a whole value to one JSON document.
///
/// One instance is registered per Rust type `T` the application wants to persist as JSON —
/// the registry keys codecs by `TypeId`, so a generic `impl<T> Serializer<T>` still needs a
/// concrete instance per `T` at registration time.
pub struct JsonValueSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonValueSerializer<T> {
    pub fn new() -> Self {
        JsonValueSerializer { _marker: PhantomData }
    }
}

impl<T> Default for JsonValueSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Serializer<T> for JsonValueSerializer<T> {
    fn name(&self) -> &str {
        "vault.json.value@v1"
    }

    fn content_types(&self) -> &[&str] {
        &["application/json"]
    }

    fn serialize_data(&self, value: &T) -> Result<SerializedData, CoreError> {
        let data = serde_json::to_vec(value).map_err(|e| CoreError::SerializerContract {
            serializer_name: self.name().to_string(),
            message: format!("failed to serialize value to JSON: {e}"),
        })?;
        Ok(SerializedData {
            data,
            content_type: "application/json".to_string(),
            content_encoding: None,
            config: None,
        })
    }

    fn deserialize_data(&self, content: &SerializedData) -> Result<T, CoreError> {
        serde_json::from_slice(&content.data).map_err(|e| CoreError::SerializerContract {
            serializer_name: self.name().to_string(),
            message: format!("failed to deserialize JSON value: {e}"),
        })
    }
}

/// Serializes an async sequence of values as one-JSON-value-per-line.
pub struct JsonStreamSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStreamSerializer<T> {
    pub fn new() -> Self {
        JsonStreamSerializer { _marker: PhantomData }
    }
}

impl<T> Default for JsonStreamSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> StreamSerializer<T> for JsonStreamSerializer<T> {
    fn name(&self) -> &str {
        "vault.json.stream@v1"
    }

    fn content_types(&self) -> &[&str] {
        &["application/x-ndjson"]
    }

    fn serialize_data_stream(
        &self,
        stream: Pin<Box<dyn Stream<Item = T> + Send>>,
    ) -> Result<SerializedDataStream, CoreError> {
        let name = self.name().to_string();
        let chunks = stream.map(move |value| {
            let mut line = serde_json::to_vec(&value).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{name}: {e}"))
            })?;
            line.push(b'\n');
            Ok(bytes::Bytes::from(line))
        });
        Ok(SerializedDataStream {
            data_stream: Box::pin(chunks),
            content_type: "application/x-ndjson".to_string(),
            content_encoding: None,
            config: None,
        })
    }

    fn deserialize_data_stream(
        &self,
        _content_type: &str,
        _content_encoding: Option<&str>,
        _config: Option<&serde_json::Value>,
        data_stream: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>,
    ) -> Pin<Box<dyn Stream<Item = Result<T, CoreError>> + Send>> {
        let name = self.name().to_string();
        Box::pin(split_lines(data_stream).map(move |line_result| {
            let line = line_result.map_err(|e| CoreError::SerializerContract {
                serializer_name: name.clone(),
                message: format!("byte stream error: {e}"),
            })?;
            serde_json::from_slice(&line).map_err(|e| CoreError::SerializerContract {
                serializer_name: name.clone(),
                message: format!("invalid ndjson line: {e}"),
            })
        }))
    }
}

/// Re-chunk an arbitrary byte-chunk stream into newline-delimited records, so the stream
/// codec never has to assume chunk boundaries line up with value boundaries.
fn split_lines(
    data_stream: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>,
) -> impl Stream<Item = std::io::Result<bytes::Bytes>> + Send {
    struct State {
        inner: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>,
        buf: bytes::BytesMut,
        done: bool,
    }

    futures::stream::unfold(
        State {
            inner: data_stream,
            buf: bytes::BytesMut::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
                    let line = state.buf.split_to(pos);
                    state.buf.advance(1); // drop the newline itself
                    if line.is_empty() {
                        continue;
                    }
                    return Some((Ok(line.freeze()), state));
                }
                if state.done {
                    if state.buf.is_empty() {
                        return None;
                    }
                    let rest = std::mem::take(&mut state.buf);
                    return Some((Ok(rest.freeze()), state));
                }
                match state.inner.next().await {
                    Some(Ok(chunk)) => state.buf.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => state.done = true,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn value_serializer_round_trips() {
        let s = JsonValueSerializer::<Vec<i32>>::new();
        let serialized = s.serialize_data(&vec![1, 2, 3]).unwrap();
        assert_eq!(serialized.content_type, "application/json");
        assert_eq!(serialized.data, b"[1,2,3]");
        let back = s.deserialize_data(&serialized).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stream_serializer_round_trips_multiple_values() {
        let s = JsonStreamSerializer::<Vec<i32>>::new();
        let values = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let input = Box::pin(stream::iter(values.clone()));
        let serialized = s.serialize_data_stream(input).unwrap();

        let bytes: Vec<u8> = serialized
            .data_stream
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(bytes, b"[1,2,3]\n[4,5,6]\n".to_vec());

        let byte_stream: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>> =
            Box::pin(stream::iter(vec![Ok(bytes::Bytes::from(bytes))]));
        let out: Vec<Vec<i32>> = s
            .deserialize_data_stream("application/x-ndjson", None, None, byte_stream)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, values);
    }

    #[tokio::test]
    async fn stream_deserialize_handles_chunk_boundaries_mid_line() {
        let s = JsonStreamSerializer::<i32>::new();
        let chunks = vec![
            Ok(bytes::Bytes::from_static(b"1\n2")),
            Ok(bytes::Bytes::from_static(b"\n3\n")),
        ];
        let byte_stream: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>> =
            Box::pin(stream::iter(chunks));
        let out: Vec<i32> = s
            .deserialize_data_stream("application/x-ndjson", None, None, byte_stream)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![1, 2, 3]);
    }
}
