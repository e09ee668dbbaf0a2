// Chunked NDJSON streaming utilities
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Create a chunked response with one JSON document per line
pub fn chunked_json_stream<S, T>(stream: S) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let byte_stream = stream.map(|msg| serialize_line(&msg));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serialize a single message to a newline-terminated chunk
pub fn serialize_line<T: Serialize>(msg: &T) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(msg)?;

    let mut chunk = BytesMut::with_capacity(json.len() + 1);
    chunk.put_slice(&json);
    chunk.put_u8(b'\n');

    Ok(chunk.freeze())
}

/// Stream every new value published on a watch channel, skipping empty ones.
///
/// Watch channels keep only the latest value, so a slow client sees the most
/// recent state rather than a growing backlog.
pub fn stream_from_watch<S, T, F>(rx: watch::Receiver<S>, project: F) -> impl IntoResponse
where
    S: Clone + Send + Sync + 'static,
    T: Serialize + Send + 'static,
    F: Fn(&S) -> Option<T> + Send + 'static,
{
    let mut updates = WatchStream::from_changes(rx);
    let stream = async_stream::stream! {
        while let Some(value) = updates.next().await {
            if let Some(item) = project(&value) {
                yield item;
            }
        }
    };

    match chunked_json_stream(stream) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_line_appends_newline() {
        let chunk = serialize_line(&json!({"speed": 301.5})).expect("serializable");
        assert_eq!(&chunk[..], b"{\"speed\":301.5}\n");
    }

    #[tokio::test]
    async fn test_stream_from_watch_emits_changes() {
        let (tx, rx) = watch::channel(None::<u32>);
        let response = stream_from_watch(rx, |v: &Option<u32>| *v).into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(&b"application/x-ndjson"[..])
        );

        let mut body = response.into_body().into_data_stream();
        tx.send_replace(Some(1));
        let first = body.next().await.expect("chunk").expect("bytes");
        assert_eq!(&first[..], b"1\n");

        tx.send_replace(Some(2));
        let second = body.next().await.expect("chunk").expect("bytes");
        assert_eq!(&second[..], b"2\n");
    }
}
