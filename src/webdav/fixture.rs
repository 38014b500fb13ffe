//! In-process WebDAV server for tests.

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::response::Response;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Directory children as `(href, is_dir, size)`, keyed by the raw request path.
pub(crate) type Dirs = Arc<HashMap<String, Vec<(String, bool, u64)>>>;

/// Directory layout used to build a [`FakeDav`].
pub(crate) type Tree = Vec<(&'static str, Vec<(&'static str, bool, u64)>)>;

/// Serves PROPFIND listings from `dirs` and GET bodies from `files`.
/// Both maps are keyed by the raw, still percent-encoded request path.
#[derive(Clone, Default)]
pub(crate) struct FakeDav {
    pub dirs: Dirs,
    pub files: Arc<HashMap<String, Vec<u8>>>,
    pub propfinds: Arc<AtomicUsize>,
    pub fail_path: Option<String>,
}

pub(crate) fn tree(entries: Tree) -> Dirs {
    Arc::new(
        entries
            .into_iter()
            .map(|(dir, children)| {
                (
                    dir.to_string(),
                    children
                        .into_iter()
                        .map(|(h, d, s)| (h.to_string(), d, s))
                        .collect(),
                )
            })
            .collect(),
    )
}

pub(crate) fn files(entries: Vec<(&'static str, &'static [u8])>) -> Arc<HashMap<String, Vec<u8>>> {
    Arc::new(
        entries
            .into_iter()
            .map(|(path, body)| (path.to_string(), body.to_vec()))
            .collect(),
    )
}

fn multistatus_xml(dir: &str, children: &[(String, bool, u64)]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">"#);
    xml.push_str(&format!(
        "<d:response><d:href>{}</d:href><d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response>",
        dir
    ));
    for (href, is_dir, size) in children {
        let kind = if *is_dir { "<d:collection/>" } else { "" };
        xml.push_str(&format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop><d:getcontentlength>{}</d:getcontentlength><d:resourcetype>{}</d:resourcetype></d:prop></d:propstat></d:response>",
            href, size, kind
        ));
    }
    xml.push_str("</d:multistatus>");
    xml
}

fn status(code: StatusCode) -> Response {
    Response::builder()
        .status(code)
        .body(Body::empty())
        .unwrap()
}

/// Start the server on an ephemeral port and return its base URL.
pub(crate) async fn serve(dav: FakeDav) -> String {
    let app = Router::new().fallback(move |req: Request| {
        let dav = dav.clone();
        async move {
            let path = req.uri().path().to_string();
            let authorized = req
                .headers()
                .get(header::AUTHORIZATION)
                .is_some_and(|v| v.as_bytes().starts_with(b"Basic "));
            if !authorized {
                return status(StatusCode::UNAUTHORIZED);
            }
            if dav.fail_path.as_deref() == Some(path.as_str()) {
                return status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            if req.method().as_str() == "PROPFIND" {
                assert_eq!(req.headers().get("Depth").unwrap(), "1");
                dav.propfinds.fetch_add(1, Ordering::SeqCst);
                let Some(children) = dav.dirs.get(&path) else {
                    return status(StatusCode::NOT_FOUND);
                };
                return Response::builder()
                    .status(207)
                    .header(header::CONTENT_TYPE, "application/xml")
                    .body(Body::from(multistatus_xml(&path, children)))
                    .unwrap();
            }
            match dav.files.get(&path) {
                Some(data) => Response::builder()
                    .header(header::CONTENT_TYPE, "application/epub+zip")
                    .body(Body::from(data.clone()))
                    .unwrap(),
                None => status(StatusCode::NOT_FOUND),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
