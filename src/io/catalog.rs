//! Route catalog - where tours come from
//!
//! Every source returns the same JSON document: a list of routes, each with
//! its ordered points. `HttpCatalog` walks an ordered endpoint list and uses
//! the first endpoint that answers with a parsable list; a route missing from
//! that list is `NotFound` (later endpoints are not consulted).

use crate::domain::error::CatalogError;
use crate::domain::types::{Route, RouteId};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn fetch_route(&self, route_id: &RouteId) -> Result<Route, CatalogError>;
}

/// Pick `route_id` out of a catalog listing
pub fn find_route(routes: Vec<Route>, route_id: &RouteId) -> Result<Route, CatalogError> {
    routes
        .into_iter()
        .find(|r| &r.id == route_id)
        .ok_or_else(|| CatalogError::NotFound(route_id.clone()))
}

pub struct HttpCatalog {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl HttpCatalog {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }

    async fn fetch_list(&self, endpoint: &str) -> Result<Vec<Route>, String> {
        let response = self.client.get(endpoint).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        response.json::<Vec<Route>>().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn fetch_route(&self, route_id: &RouteId) -> Result<Route, CatalogError> {
        let mut last_error = String::from("no catalog endpoints configured");

        for endpoint in &self.endpoints {
            match self.fetch_list(endpoint).await {
                Ok(routes) => {
                    info!(endpoint = %endpoint, routes = %routes.len(), "catalog_fetched");
                    return find_route(routes, route_id);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "catalog_endpoint_failed");
                    last_error = format!("{endpoint}: {e}");
                }
            }
        }

        Err(CatalogError::Unavailable(last_error))
    }
}

/// Catalog read from a JSON file on disk
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn fetch_route(&self, route_id: &RouteId) -> Result<Route, CatalogError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CatalogError::Unavailable(format!("{}: {e}", self.path.display())))?;
        let routes: Vec<Route> = serde_json::from_str(&contents)
            .map_err(|e| CatalogError::Unavailable(format!("{}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), routes = %routes.len(), "catalog_file_loaded");
        find_route(routes, route_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ROUTES_JSON: &str = r#"[
        {"id": "a", "name": "A", "points": [{"id": "p1", "name": "One", "coordinates": [11.0, 48.0]}]},
        {"id": "b", "name": "B", "points": []}
    ]"#;

    /// Serve every request with `status` and `body`. Returns the endpoint URL
    /// and a counter of requests served.
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/routes"), hits)
    }

    /// An endpoint nobody listens on
    async fn refused_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/routes")
    }

    #[tokio::test]
    async fn test_http_catalog_falls_back_to_next_endpoint() {
        let (broken, broken_hits) = serve("500 Internal Server Error", "oops").await;
        let (healthy, healthy_hits) = serve("200 OK", ROUTES_JSON).await;

        let catalog = HttpCatalog::new(vec![broken, healthy], Duration::from_secs(5)).unwrap();
        let route = catalog.fetch_route(&RouteId("a".into())).await.unwrap();

        assert_eq!(route.name, "A");
        assert_eq!(broken_hits.load(Ordering::SeqCst), 1);
        assert_eq!(healthy_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_catalog_skips_refused_endpoint() {
        let (healthy, _) = serve("200 OK", ROUTES_JSON).await;

        let catalog = HttpCatalog::new(vec![refused_endpoint().await, healthy], Duration::from_secs(5)).unwrap();
        let route = catalog.fetch_route(&RouteId("b".into())).await.unwrap();
        assert_eq!(route.id.0, "b");
    }

    #[tokio::test]
    async fn test_http_catalog_missing_route_stops_at_first_list() {
        let (first, first_hits) = serve("200 OK", r#"[{"id": "other", "name": "Other", "points": []}]"#).await;
        let (second, second_hits) = serve("200 OK", ROUTES_JSON).await;

        let catalog = HttpCatalog::new(vec![first, second], Duration::from_secs(5)).unwrap();
        let err = catalog.fetch_route(&RouteId("a".into())).await.unwrap_err();

        assert!(matches!(err, CatalogError::NotFound(id) if id.0 == "a"));
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_http_catalog_all_endpoints_failing() {
        let refused = refused_endpoint().await;
        let (broken, _) = serve("503 Service Unavailable", "").await;
        let (garbled, _) = serve("200 OK", "not json").await;

        let catalog = HttpCatalog::new(vec![refused, broken, garbled.clone()], Duration::from_secs(5)).unwrap();
        let err = catalog.fetch_route(&RouteId("a".into())).await.unwrap_err();

        match err {
            CatalogError::Unavailable(message) => assert!(message.starts_with(&garbled), "got {message}"),
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_catalog_finds_route() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ROUTES_JSON.as_bytes()).unwrap();

        let catalog = FileCatalog::new(file.path());
        let route = catalog.fetch_route(&RouteId("a".into())).await.unwrap();
        assert_eq!(route.points.len(), 1);
        assert_eq!(route.points[0].coordinates.lat, 48.0);
    }

    #[tokio::test]
    async fn test_file_catalog_missing_route() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ROUTES_JSON.as_bytes()).unwrap();

        let catalog = FileCatalog::new(file.path());
        let err = catalog.fetch_route(&RouteId("zzz".into())).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(id) if id.0 == "zzz"));
    }

    #[tokio::test]
    async fn test_file_catalog_unreadable() {
        let catalog = FileCatalog::new("/nonexistent/routes.json");
        let err = catalog.fetch_route(&RouteId("a".into())).await.unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_http_catalog_without_endpoints_is_unavailable() {
        let catalog = HttpCatalog::new(Vec::new(), Duration::from_secs(1)).unwrap();
        let err = catalog.fetch_route(&RouteId("a".into())).await.unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable(_)));
    }
}
