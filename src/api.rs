use std::sync::mpsc::Sender;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, instrument, trace, warn};

use crate::domain::RVError;
use crate::filters::FilterObject;
use crate::record::{Record, Value};

const API_PREFIX: [&str; 2] = ["api", "reportes"];

/// Tags a request so its response can be matched against the selection that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct TicketCounter {
    last: u64,
}

impl TicketCounter {
    pub fn next(&mut self) -> Ticket {
        self.last += 1;
        Ticket(self.last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRequest {
    #[serde(rename = "coleccion")]
    pub collection: String,
    #[serde(rename = "filtros")]
    pub filters: FilterObject,
    #[serde(rename = "limite")]
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    Collections,
    Schema { collection: String },
    DistinctValues { collection: String, field: String },
    Statistics { collection: String },
    Report(ReportRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CollectionStats {
    #[serde(rename = "total_documentos", default)]
    pub total_documents: u64,
    #[serde(rename = "campos_disponibles", default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReportData {
    #[serde(default)]
    success: Option<bool>,
    #[serde(rename = "mensaje", default)]
    pub message: Option<String>,
    #[serde(rename = "total_registros", default)]
    pub total_records: usize,
    #[serde(rename = "datos", default)]
    pub records: Vec<Record>,
}

#[derive(Debug)]
pub enum ApiResponse {
    Collections(Vec<String>),
    Schema(Vec<String>),
    DistinctValues(Vec<Value>),
    Statistics(CollectionStats),
    Report(ReportData),
}

#[derive(Debug)]
pub struct ApiEvent {
    pub ticket: Ticket,
    pub request: ApiRequest,
    pub result: Result<ApiResponse, RVError>,
}

#[derive(Deserialize)]
struct CollectionsPayload {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "colecciones", default)]
    collections: Vec<String>,
}

#[derive(Deserialize)]
struct SchemaPayload {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "campos", default)]
    fields: Vec<String>,
}

#[derive(Deserialize)]
struct DistinctValuesPayload {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "valores", default)]
    values: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    detail: serde_json::Value,
}

// The backend answers some failures with 200 and `success: false`.
fn check_success(success: Option<bool>, error: Option<String>) -> Result<(), RVError> {
    match success {
        Some(false) => Err(RVError::Backend(
            error.unwrap_or_else(|| "request was not successful".to_string()),
        )),
        _ => Ok(()),
    }
}

/// HTTP client for the report backend.
#[derive(Debug, Clone)]
pub struct ReportClient {
    client: Client,
    base: Url,
}

impl ReportClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RVError> {
        let base = Url::parse(base_url).map_err(|_| RVError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(RVError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// Builds `<base>/api/reportes/<segments..>` with every segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, RVError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RVError::InvalidUrl(self.base.to_string()))?;
            path.pop_if_empty().extend(API_PREFIX).extend(segments);
        }
        Ok(url)
    }

    #[instrument(skip(self))]
    pub async fn collections(&self) -> Result<Vec<String>, RVError> {
        let payload: CollectionsPayload = self.get_json(self.endpoint(&["colecciones"])?).await?;
        check_success(payload.success, payload.error)?;
        Ok(payload.collections)
    }

    #[instrument(skip(self))]
    pub async fn schema(&self, collection: &str) -> Result<Vec<String>, RVError> {
        let payload: SchemaPayload = self
            .get_json(self.endpoint(&["esquema", collection])?)
            .await?;
        check_success(payload.success, payload.error)?;
        Ok(payload.fields)
    }

    #[instrument(skip(self))]
    pub async fn distinct_values(&self, collection: &str, field: &str) -> Result<Vec<Value>, RVError> {
        let payload: DistinctValuesPayload = self
            .get_json(self.endpoint(&["valores-unicos", collection, field])?)
            .await?;
        check_success(payload.success, payload.error)?;
        Ok(payload.values)
    }

    #[instrument(skip(self))]
    pub async fn statistics(&self, collection: &str) -> Result<CollectionStats, RVError> {
        self.get_json(self.endpoint(&["estadisticas", collection])?)
            .await
    }

    #[instrument(skip(self, request), fields(collection = %request.collection, limit = request.limit))]
    pub async fn generate_report(&self, request: &ReportRequest) -> Result<ReportData, RVError> {
        let url = self.endpoint(&["generar"])?;
        trace!("POST {url}");
        let response = self.client.post(url).json(request).send().await?;
        let data: ReportData = Self::read_json(response).await?;
        check_success(data.success, data.message.clone())?;
        debug!(
            "Report returned {} of {} records",
            data.records.len(),
            data.total_records
        );
        Ok(data)
    }

    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, RVError> {
        match request {
            ApiRequest::Collections => self.collections().await.map(ApiResponse::Collections),
            ApiRequest::Schema { collection } => {
                self.schema(collection).await.map(ApiResponse::Schema)
            }
            ApiRequest::DistinctValues { collection, field } => self
                .distinct_values(collection, field)
                .await
                .map(ApiResponse::DistinctValues),
            ApiRequest::Statistics { collection } => self
                .statistics(collection)
                .await
                .map(ApiResponse::Statistics),
            ApiRequest::Report(report) => self
                .generate_report(report)
                .await
                .map(ApiResponse::Report),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RVError> {
        trace!("GET {url}");
        let response = self.client.get(url).send().await?;
        Self::read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RVError> {
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(RVError::Backend(Self::describe_failure(status, &body)));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn describe_failure(status: StatusCode, body: &[u8]) -> String {
        match serde_json::from_slice::<ErrorPayload>(body) {
            Ok(ErrorPayload {
                detail: serde_json::Value::String(detail),
            }) => format!("{status}: {detail}"),
            Ok(ErrorPayload { detail }) => format!("{status}: {detail}"),
            Err(_) => status.to_string(),
        }
    }
}

/// Sends backend requests without blocking the caller. Responses arrive later as
/// `ApiEvent`s carrying the same ticket.
pub trait Dispatch {
    fn dispatch(&self, ticket: Ticket, request: ApiRequest);
}

/// Runs requests as tasks on a tokio runtime and posts the results into a channel
/// that the controller drains between frames.
pub struct Backend {
    client: ReportClient,
    runtime: Handle,
    events: Sender<ApiEvent>,
}

impl Backend {
    pub fn new(client: ReportClient, runtime: Handle, events: Sender<ApiEvent>) -> Self {
        Self {
            client,
            runtime,
            events,
        }
    }
}

impl Dispatch for Backend {
    fn dispatch(&self, ticket: Ticket, request: ApiRequest) {
        let client = self.client.clone();
        let events = self.events.clone();
        trace!("Dispatching {ticket:?}: {request:?}");
        self.runtime.spawn(async move {
            let result = client.execute(&request).await;
            if let Err(e) = &result {
                warn!("Request {ticket:?} failed: {e}");
            }
            if events.send(ApiEvent { ticket, request, result }).is_err() {
                debug!("Receiver dropped, discarding response for {ticket:?}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Serves one canned response per accepted connection and returns the raw requests.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 16 * 1024];
                let mut request = Vec::new();
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if n == 0 || request_complete(&request) {
                        break;
                    }
                }
                seen.push(String::from_utf8_lossy(&request).to_string());
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + length
    }

    fn client(base: &str) -> ReportClient {
        ReportClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn endpoint_encodes_segments() {
        let c = client("http://localhost:8000/");
        let url = c.endpoint(&["valores-unicos", "steam games", "Genre/Sub"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/reportes/valores-unicos/steam%20games/Genre%2FSub"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            ReportClient::new("not a url", Duration::from_secs(1)),
            Err(RVError::InvalidUrl(_))
        ));
    }

    #[test]
    fn ticket_counter_is_monotonic() {
        let mut counter = TicketCounter::default();
        let a = counter.next();
        let b = counter.next();
        assert!(b > a);
    }

    #[test]
    fn report_request_uses_backend_field_names() {
        let request = ReportRequest {
            collection: "games".into(),
            filters: FilterObject::parse(r#"{"Year": 2019}"#).unwrap(),
            limit: 100,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"coleccion":"games","filtros":{"Year":2019},"limite":100}"#
        );
    }

    #[tokio::test]
    async fn fetches_collections_and_schema() {
        let (base, server) = serve(vec![
            (200, r#"{"colecciones": ["games", "reviews"]}"#),
            (200, r#"{"success": true, "campos": ["Genre", "Title"]}"#),
        ])
        .await;
        let c = client(&base);
        assert_eq!(c.collections().await.unwrap(), vec!["games", "reviews"]);
        assert_eq!(c.schema("games").await.unwrap(), vec!["Genre", "Title"]);

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("GET /api/reportes/colecciones "));
        assert!(seen[1].starts_with("GET /api/reportes/esquema/games "));
    }

    #[tokio::test]
    async fn unsuccessful_payload_is_an_error() {
        let (base, _server) = serve(vec![(
            200,
            r#"{"success": false, "valores": [], "error": "no such field"}"#,
        )])
        .await;
        let err = client(&base).distinct_values("games", "Nope").await.unwrap_err();
        assert!(matches!(err, RVError::Backend(msg) if msg == "no such field"));
    }

    #[tokio::test]
    async fn server_error_carries_detail() {
        let (base, _server) = serve(vec![(500, r#"{"detail": "database offline"}"#)]).await;
        let request = ReportRequest {
            collection: "games".into(),
            filters: FilterObject::default(),
            limit: 10,
        };
        let err = client(&base).generate_report(&request).await.unwrap_err();
        assert!(matches!(err, RVError::Backend(msg) if msg.contains("database offline")));
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let (base, _server) = serve(vec![(200, "not json")]).await;
        let err = client(&base).collections().await.unwrap_err();
        assert!(matches!(err, RVError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn generates_report_with_posted_filters() {
        let (base, server) = serve(vec![(
            200,
            r#"{"success": true, "mensaje": "ok", "total_registros": 2,
                "datos": [{"Title": "A", "Score": 7}, {"Title": "B", "Score": null}]}"#,
        )])
        .await;
        let request = ReportRequest {
            collection: "games".into(),
            filters: FilterObject::parse(r#"{"Genre": "RPG"}"#).unwrap(),
            limit: 50,
        };
        let data = client(&base).generate_report(&request).await.unwrap();
        assert_eq!(data.total_records, 2);
        assert_eq!(data.records.len(), 2);
        assert_eq!(data.records[1].get("Score"), Some(&Value::Null));

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("POST /api/reportes/generar "));
        assert!(seen[0].ends_with(r#"{"coleccion":"games","filtros":{"Genre":"RPG"},"limite":50}"#));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn backend_posts_tagged_events() {
        let (base, _server) = serve(vec![(200, r#"{"valores": ["Action", null, 3]}"#)]).await;
        let (tx, rx) = mpsc::channel();
        let backend = Backend::new(client(&base), Handle::current(), tx);
        let mut tickets = TicketCounter::default();
        let ticket = tickets.next();
        backend.dispatch(
            ticket,
            ApiRequest::DistinctValues {
                collection: "games".into(),
                field: "Genre".into(),
            },
        );

        let event = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.ticket, ticket);
        match event.result {
            Ok(ApiResponse::DistinctValues(values)) => {
                assert_eq!(values, vec![Value::Text("Action".into()), Value::Null, Value::Number(3.0)]);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
