//! Online store backend
//!
//! Talks to an avro-data-sets HTTP service. Writes are serialized into
//! base64 Avro container chunks and PUT one chunk at a time with a
//! throttle delay between chunks; reads GET one or more keys and accept
//! either an `avro_rows` blob or plain JSON `data` rows in response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow_array::RecordBatch;
use dal::{Backend, BackendSpec, ChunkTiming, Discovery, Error, Result};
use diagnostics::log_debug;
use serde_json::{json, Value};
use url::Url;

use crate::codec::AvroCodec;

const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_DELAY_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP seam, object-safe so tests can substitute a recording fake.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse>;
    fn put(&self, url: &str, body: &Value) -> Result<HttpResponse>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport {
                url: "(client init)".to_string(),
                message: e.to_string(),
            })?;
        Ok(HttpTransport { client })
    }

    fn response(url: &str, result: reqwest::Result<reqwest::blocking::Response>) -> Result<HttpResponse> {
        let response = result.map_err(|e| Error::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| Error::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(HttpResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        Self::response(url, self.client.get(url).send())
    }

    fn put(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        Self::response(url, self.client.put(url).json(body).send())
    }
}

pub struct OnlineBackend {
    transport: Arc<dyn Transport>,
    codec: AvroCodec,
    canonical_name: String,
    /// Column the store keys rows by, taken from the location fragment.
    key_name: String,
    key: Option<Value>,
    put_url: Url,
    get_url: Url,
    chunk_size: usize,
    delay_ms: u64,
    dtype: serde_json::Map<String, Value>,
    metadata: serde_json::Map<String, Value>,
}

impl OnlineBackend {
    pub fn create(spec: BackendSpec) -> Result<Box<dyn Backend>> {
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Box::new(Self::from_spec(spec, transport)?))
    }

    /// Construct with an explicit transport.
    pub fn from_spec(spec: BackendSpec, transport: Arc<dyn Transport>) -> Result<Self> {
        let avro_schema = spec.avro_schema.as_ref().ok_or_else(|| Error::InvalidCatalog {
            path: spec.canonical_name.clone(),
            reason: "online storage requires an inline Avro schema".to_string(),
        })?;
        let column_types = spec.column_types.as_ref().ok_or_else(|| Error::InvalidCatalog {
            path: spec.canonical_name.clone(),
            reason: "online storage requires an inline Avro schema".to_string(),
        })?;
        let codec = AvroCodec::new(avro_schema, column_types)?;

        let (base_part, key_name) =
            spec.location
                .split_once('#')
                .ok_or_else(|| Error::InvalidLocation {
                    url: spec.location.clone(),
                    reason: "missing '#<key column>' fragment".to_string(),
                })?;
        let mut base_text = if base_part.contains("://") {
            base_part.to_string()
        } else {
            format!("http://{base_part}")
        };
        if !base_text.ends_with('/') {
            base_text.push('/');
        }
        let invalid = |reason: &str| Error::InvalidLocation {
            url: spec.location.clone(),
            reason: reason.to_string(),
        };
        let base = Url::parse(&base_text).map_err(|e| invalid(&e.to_string()))?;
        let put_url = base
            .join("avro-data-sets/")
            .map_err(|e| invalid(&e.to_string()))?;
        let mut get_url = put_url.clone();
        get_url
            .path_segments_mut()
            .map_err(|()| invalid("cannot-be-a-base URL"))?
            .pop_if_empty()
            .push(&spec.canonical_name);

        Ok(OnlineBackend {
            transport,
            codec,
            canonical_name: spec.canonical_name.clone(),
            key_name: key_name.to_string(),
            key: spec.args.get("key").cloned(),
            put_url,
            get_url,
            chunk_size: spec
                .driver_metadata_u64("dal-online", "write_chunk_size")
                .map_or(DEFAULT_CHUNK_SIZE, |n| n as usize)
                .max(1),
            delay_ms: spec
                .driver_metadata_u64("dal-online", "write_delay_between_chunks_milliseconds")
                .unwrap_or(DEFAULT_DELAY_MS),
            dtype: column_types.display_map(),
            metadata: spec.metadata,
        })
    }

    fn key_query(&self) -> Result<String> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::KeyRequired(self.canonical_name.clone()))?;
        let keys = match key {
            Value::Array(items) => items.iter().map(scalar_string).collect::<Vec<_>>(),
            single => vec![scalar_string(single)],
        };
        Ok(keys.join(","))
    }
}

impl Backend for OnlineBackend {
    fn discover(&self) -> Result<Discovery> {
        Ok(Discovery {
            dtype: Some(self.dtype.clone()),
            shape: (None, Some(self.dtype.len())),
            npartitions: 1,
            metadata: self.metadata.clone(),
        })
    }

    fn read(&self) -> Result<RecordBatch> {
        let keys = self.key_query()?;
        let mut url = self.get_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidLocation {
                url: self.get_url.to_string(),
                reason: "cannot-be-a-base URL".to_string(),
            })?
            .push(&keys);
        let response = self.transport.get(url.as_str())?;
        if !(200..300).contains(&response.status) {
            return Err(Error::RemoteRead {
                url: url.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        let body: Value = serde_json::from_str(&response.body)?;
        if let Some(blob) = body.get("avro_rows").and_then(Value::as_str) {
            return self.codec.decode_base64(blob);
        }
        if let Some(rows) = body.get("data").and_then(Value::as_array) {
            return self.codec.rows_from_json(rows);
        }
        Err(Error::RemoteRead {
            url: url.to_string(),
            status: response.status,
            body: "unrecognized response body".to_string(),
        })
    }

    fn read_partition(&self, index: usize) -> Result<RecordBatch> {
        if index != 0 {
            return Err(Error::PartitionOutOfRange { index, count: 1 });
        }
        self.read()
    }

    fn read_chunked(&self) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>> {
        let rows = self.read()?;
        Ok(Box::new(std::iter::once(Ok(rows))))
    }

    /// PUT rows in near-equal chunks of at most `write_chunk_size`,
    /// sleeping between chunks. A non-2xx response aborts the remaining
    /// chunks.
    fn write(&self, rows: &RecordBatch) -> Result<Vec<ChunkTiming>> {
        let total = rows.num_rows();
        if total == 0 {
            return Ok(Vec::new());
        }
        let n_chunks = total.div_ceil(self.chunk_size);
        let base = total / n_chunks;
        let remainder = total % n_chunks;

        let mut timings = Vec::with_capacity(n_chunks);
        let mut offset = 0;
        for i in 0..n_chunks {
            let len = base + usize::from(i < remainder);
            let chunk = rows.slice(offset, len);
            offset += len;

            if i > 0 && self.delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.delay_ms));
            }

            let serialize_started = Instant::now();
            let blob = self.codec.encode_base64(&chunk)?;
            let serialize = serialize_started.elapsed();

            let body = json!({
                "data_set_name": self.canonical_name,
                "key_name": self.key_name,
                "avro_rows": blob,
            });
            let post_started = Instant::now();
            let response = self.transport.put(self.put_url.as_str(), &body)?;
            let post = post_started.elapsed();
            if !(200..300).contains(&response.status) {
                return Err(Error::RemoteWrite {
                    url: self.put_url.to_string(),
                    status: response.status,
                    body: response.body,
                });
            }
            timings.push(ChunkTiming { serialize, post });
        }
        log_debug!(
            "Wrote {total} rows in {n_chunks} chunks",
            total: total,
            n_chunks: n_chunks,
        );
        Ok(timings)
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Array, Int64Array, StringArray, TimestampMillisecondArray};
    use dal::schema::AvroSchema;
    use dal::to_column_types;
    use serde_json::json;
    use std::sync::Mutex;

    const SCHEMA: &str = r#"{"name":"user_events","type":"record","fields":[
        {"name":"userid","type":"long"},
        {"name":"action","type":["null","string"]},
        {"name":"timestamp","type":{"type":"long","logicalType":"timestamp-millis"}}
    ]}"#;

    #[derive(Default)]
    struct MockTransport {
        puts: Mutex<Vec<(String, Value)>>,
        put_statuses: Mutex<Vec<u16>>,
        get_urls: Mutex<Vec<String>>,
        get_response: Mutex<Option<HttpResponse>>,
    }

    impl MockTransport {
        fn respond_with(&self, body: String) {
            *self.get_response.lock().unwrap() = Some(HttpResponse { status: 200, body });
        }

        fn fail_put_after(&self, ok_count: usize) {
            let mut statuses = vec![200; ok_count];
            statuses.push(500);
            *self.put_statuses.lock().unwrap() = statuses;
        }
    }

    impl Transport for MockTransport {
        fn get(&self, url: &str) -> Result<HttpResponse> {
            self.get_urls.lock().unwrap().push(url.to_string());
            Ok(self
                .get_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(HttpResponse {
                    status: 404,
                    body: "not found".to_string(),
                }))
        }

        fn put(&self, url: &str, body: &Value) -> Result<HttpResponse> {
            let mut puts = self.puts.lock().unwrap();
            puts.push((url.to_string(), body.clone()));
            let index = puts.len() - 1;
            let status = self
                .put_statuses
                .lock()
                .unwrap()
                .get(index)
                .copied()
                .unwrap_or(200);
            Ok(HttpResponse {
                status,
                body: String::new(),
            })
        }
    }

    fn spec(key: Option<Value>, chunk_size: Option<u64>) -> BackendSpec {
        let avro_schema = AvroSchema::from_json(SCHEMA).unwrap();
        let column_types = to_column_types(&avro_schema).unwrap();
        let mut args = serde_json::Map::new();
        if let Some(key) = key {
            args.insert("key".to_string(), key);
        }
        let mut metadata = serde_json::Map::new();
        let mut online = serde_json::Map::new();
        if let Some(chunk_size) = chunk_size {
            online.insert("write_chunk_size".to_string(), json!(chunk_size));
        }
        online.insert(
            "write_delay_between_chunks_milliseconds".to_string(),
            json!(0),
        );
        metadata.insert("dal-online".to_string(), Value::Object(online));
        BackendSpec {
            scheme: "dal-online".to_string(),
            location: "localhost:5000/api#userid".to_string(),
            args,
            canonical_name: "entity.user.user_events".to_string(),
            storage_mode: "in_mem".to_string(),
            avro_schema: Some(avro_schema),
            column_types: Some(column_types),
            metadata,
        }
    }

    fn backend(transport: &Arc<MockTransport>, spec: BackendSpec) -> OnlineBackend {
        OnlineBackend::from_spec(spec, transport.clone() as Arc<dyn Transport>).unwrap()
    }

    fn five_rows(backend: &OnlineBackend) -> RecordBatch {
        RecordBatch::try_new(
            backend.codec.arrow_schema(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
                Arc::new(StringArray::from(vec![
                    Some("a"),
                    None,
                    Some("c"),
                    Some("d"),
                    Some("e"),
                ])),
                Arc::new(TimestampMillisecondArray::from(vec![10, 20, 30, 40, 50])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn chunk_size_one_puts_every_row_separately() {
        let transport = Arc::new(MockTransport::default());
        let b = backend(&transport, spec(None, Some(1)));
        let timings = b.write(&five_rows(&b)).unwrap();
        assert_eq!(timings.len(), 5);

        let puts = transport.puts.lock().unwrap();
        assert_eq!(puts.len(), 5);
        let (url, body) = &puts[0];
        assert_eq!(url, "http://localhost:5000/api/avro-data-sets/");
        assert_eq!(body["data_set_name"], json!("entity.user.user_events"));
        assert_eq!(body["key_name"], json!("userid"));
        assert!(body["avro_rows"].is_string());
    }

    #[test]
    fn default_chunk_size_puts_once_and_round_trips() {
        let transport = Arc::new(MockTransport::default());
        let b = backend(&transport, spec(None, None));
        let rows = five_rows(&b);
        let timings = b.write(&rows).unwrap();
        assert_eq!(timings.len(), 1);

        let puts = transport.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        let blob = puts[0].1["avro_rows"].as_str().unwrap();
        assert_eq!(b.codec.decode_base64(blob).unwrap(), rows);
    }

    #[test]
    fn failed_chunk_aborts_remaining_puts() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_put_after(2);
        let b = backend(&transport, spec(None, Some(1)));
        let err = b.write(&five_rows(&b)).unwrap_err();
        assert!(matches!(err, Error::RemoteWrite { status: 500, .. }));
        assert_eq!(transport.puts.lock().unwrap().len(), 3);
    }

    #[test]
    fn single_key_read_decodes_avro_rows() {
        let transport = Arc::new(MockTransport::default());
        let b = backend(&transport, spec(Some(json!(100)), None));
        let one = RecordBatch::try_new(
            b.codec.arrow_schema(),
            vec![
                Arc::new(Int64Array::from(vec![100])),
                Arc::new(StringArray::from(vec!["click"])),
                Arc::new(TimestampMillisecondArray::from(vec![10])),
            ],
        )
        .unwrap();
        let blob = b.codec.encode_base64(&one).unwrap();
        transport.respond_with(json!({ "avro_rows": blob }).to_string());

        let rows = b.read().unwrap();
        assert_eq!(rows, one);

        let urls = transport.get_urls.lock().unwrap();
        assert_eq!(
            urls[0],
            "http://localhost:5000/api/avro-data-sets/entity.user.user_events/100"
        );
    }

    #[test]
    fn multi_key_read_keeps_request_order_and_gaps() {
        let transport = Arc::new(MockTransport::default());
        let b = backend(&transport, spec(Some(json!([1, 2, 3])), None));
        transport.respond_with(
            json!({"data": [
                {"userid": 1, "action": "a", "timestamp": 10},
                {},
                {"userid": 3, "action": "c", "timestamp": 30},
            ]})
            .to_string(),
        );

        let rows = b.read().unwrap();
        assert_eq!(rows.num_rows(), 3);
        let userids = rows
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(userids.value(0), 1);
        assert!(userids.is_null(1));
        assert_eq!(userids.value(2), 3);

        let urls = transport.get_urls.lock().unwrap();
        assert!(urls[0].ends_with("/avro-data-sets/entity.user.user_events/1,2,3"));
    }

    #[test]
    fn read_without_key_is_rejected() {
        let transport = Arc::new(MockTransport::default());
        let b = backend(&transport, spec(None, None));
        assert!(matches!(b.read(), Err(Error::KeyRequired(_))));
    }

    #[test]
    fn error_status_surfaces_url_and_body() {
        let transport = Arc::new(MockTransport::default());
        let b = backend(&transport, spec(Some(json!(7)), None));
        let err = b.read().unwrap_err();
        assert!(matches!(err, Error::RemoteRead { status: 404, .. }));
    }

    #[test]
    fn location_without_fragment_is_rejected() {
        let transport = Arc::new(MockTransport::default()) as Arc<dyn Transport>;
        let mut bad = spec(None, None);
        bad.location = "localhost:5000/api".to_string();
        assert!(matches!(
            OnlineBackend::from_spec(bad, transport),
            Err(Error::InvalidLocation { .. })
        ));
    }

    #[test]
    fn missing_schema_is_rejected() {
        let transport = Arc::new(MockTransport::default()) as Arc<dyn Transport>;
        let mut bad = spec(None, None);
        bad.avro_schema = None;
        assert!(matches!(
            OnlineBackend::from_spec(bad, transport),
            Err(Error::InvalidCatalog { .. })
        ));
    }

    #[test]
    fn explicit_scheme_is_preserved() {
        let transport = Arc::new(MockTransport::default());
        let mut https = spec(None, Some(1000));
        https.location = "https://store.example.com/v1#userid".to_string();
        let b = backend(&transport, https);
        b.write(&five_rows(&b)).unwrap();
        let puts = transport.puts.lock().unwrap();
        assert_eq!(puts[0].0, "https://store.example.com/v1/avro-data-sets/");
    }

    #[test]
    fn discover_reports_dtypes_without_network_traffic() {
        let transport = Arc::new(MockTransport::default());
        let b = backend(&transport, spec(None, None));
        let discovery = b.discover().unwrap();
        assert_eq!(
            discovery.dtype.unwrap().get("timestamp"),
            Some(&json!("datetime64[ms]"))
        );
        assert_eq!(discovery.npartitions, 1);
        assert!(transport.get_urls.lock().unwrap().is_empty());
    }
}
