//! End-to-end tests for the upload → detect → respond lifecycle, driven
//! through the router with a mock detector.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::Value;
use std::{
    io::Cursor,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tempfile::TempDir;
use tower::util::ServiceExt;
use yolo_upload::{
    bounding_box::BoundingBox,
    config::AnnotationConfig,
    detection_service::DetectionService,
    detector::{Detector, DetectorError},
    image_ops::Annotator,
    labels::{ClassLabels, ColorLabel},
    server::{create_router, SharedState},
    store::LastResultSlot,
    telemetry::Metrics,
};

const BOUNDARY: &str = "yolo-upload-test-boundary";

/// Two boxes on the first call, a single dog on every later call.
struct SequenceDetector {
    calls: AtomicUsize,
}

impl Detector for SequenceDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Ok(vec![
                BoundingBox {
                    class_id: 0,
                    confidence: 0.95,
                    x1: 20.,
                    y1: 20.,
                    x2: 80.,
                    y2: 100.,
                },
                BoundingBox {
                    class_id: 1,
                    confidence: 0.88,
                    x1: 100.,
                    y1: 30.,
                    x2: 150.,
                    y2: 90.,
                },
            ])
        } else {
            Ok(vec![BoundingBox {
                class_id: 2,
                confidence: 0.7,
                x1: 10.,
                y1: 10.,
                x2: 40.,
                y2: 40.,
            }])
        }
    }
}

struct BrokenDetector;

impl Detector for BrokenDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Err(DetectorError::Inference("session crashed".to_string()))
    }
}

/// Reports the same boxes for every image.
struct FixedDetector(Vec<BoundingBox>);

impl Detector for FixedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.0.clone())
    }
}

struct TestApp {
    router: Router,
    output_path: PathBuf,
    _dir: TempDir,
}

fn labels() -> ClassLabels {
    let label = |name: &str, color: [u8; 3]| ColorLabel {
        label: name.to_string(),
        color,
    };
    ClassLabels::new(vec![
        label("person", [255, 0, 0]),
        label("bicycle", [0, 255, 0]),
        label("dog", [0, 0, 255]),
    ])
}

fn setup_with(detector: Arc<dyn Detector>, max_upload_bytes: usize) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("result.jpg");

    let detection_service = DetectionService::new(
        detector,
        labels(),
        Annotator::new(&AnnotationConfig::default()).unwrap(),
        Arc::new(LastResultSlot::new()),
        output_path.clone(),
    );
    let state = SharedState {
        detection_service: Arc::new(detection_service),
        metrics: Arc::new(Metrics::new().unwrap()),
    };

    TestApp {
        router: create_router(state, max_upload_bytes),
        output_path,
        _dir: dir,
    }
}

fn setup() -> TestApp {
    let detector = SequenceDetector {
        calls: AtomicUsize::new(0),
    };
    setup_with(Arc::new(detector), 10 * 1024 * 1024)
}

fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([0, 0, 0]));
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, format).unwrap();
    cursor.into_inner()
}

fn multipart_request(field: &str, data: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/files/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, body.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_upload_returns_annotated_image_matching_result() {
    let app = setup();

    let upload = image_bytes(200, 120, ImageFormat::Png);
    let (status, content_type, body) = send(&app.router, multipart_request("file", &upload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/jpeg"));
    assert!(!body.is_empty());
    assert_eq!(std::fs::read(&app.output_path).unwrap(), body);

    let annotated = image::load_from_memory(&body).unwrap().to_rgb8();
    assert_eq!(annotated.dimensions(), (200, 120));
    let edge = annotated.get_pixel(20, 60);
    assert!(edge[0] > 128 && edge[1] < 100, "box edge pixel {:?}", edge);
    let inside = annotated.get_pixel(50, 60);
    assert!(inside[0] < 64, "box interior pixel {:?}", inside);

    let (status, json) = send_json(&app.router, get("/result/")).await;
    assert_eq!(status, StatusCode::OK);

    let detections = json.as_array().unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0]["name"], "person");
    assert_eq!(detections[0]["class"], 0);
    assert_eq!(detections[0]["box"]["x1"], 20.0);
    assert_eq!(detections[1]["name"], "bicycle");
    assert!(detections[1]["confidence"].as_f64().unwrap() > 0.87);
}

#[tokio::test]
async fn test_jpeg_upload_is_accepted() {
    let app = setup();

    let upload = image_bytes(64, 64, ImageFormat::Jpeg);
    let (status, _, _) = send(&app.router, multipart_request("file", &upload)).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_non_image_upload_is_a_client_error() {
    let app = setup();

    let garbage: Vec<u8> = (0..512u32).map(|i| (i * 31 % 251) as u8).collect();
    let (status, json) = send_json(&app.router, multipart_request("file", &garbage)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["detail"].as_str().unwrap().contains("Invalid image"));
    assert!(!app.output_path.exists());

    let (status, _) = send_json(&app.router, get("/result/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_result_before_any_upload_is_not_found() {
    let app = setup();

    let (status, json) = send_json(&app.router, get("/result/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["detail"].as_str().unwrap().contains("no detection result"));

    let (status, _) = send_json(&app.router, get("/result/summary/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_second_upload_replaces_first_result() {
    let app = setup();
    let upload = image_bytes(64, 48, ImageFormat::Png);

    let (status, _, _) = send(&app.router, multipart_request("file", &upload)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, second_body) = send(&app.router, multipart_request("file", &upload)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send_json(&app.router, get("/result/")).await;
    let detections = json.as_array().unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0]["name"], "dog");
    assert_eq!(std::fs::read(&app.output_path).unwrap(), second_body);

    let (status, summary) = send_json(&app.router, get("/result/summary/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["event_type"], "photo-count");
    assert_eq!(summary["summary"]["dog"], 1);
    assert!(summary["summary"].get("person").is_none());
}

#[tokio::test]
async fn test_missing_file_field_is_bad_request() {
    let app = setup();

    let upload = image_bytes(8, 8, ImageFormat::Png);
    let (status, json) = send_json(&app.router, multipart_request("alarm", &upload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["detail"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn test_upload_over_body_limit_is_rejected() {
    let detector = SequenceDetector {
        calls: AtomicUsize::new(0),
    };
    let app = setup_with(Arc::new(detector), 1024);

    let (status, _, _) = send(&app.router, multipart_request("file", &vec![0u8; 8192])).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_inference_failure_is_a_server_error() {
    let app = setup_with(Arc::new(BrokenDetector), 10 * 1024 * 1024);

    let upload = image_bytes(16, 16, ImageFormat::Png);
    let (status, json) = send_json(&app.router, multipart_request("file", &upload)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["detail"].as_str().unwrap().contains("session crashed"));
}

#[tokio::test]
async fn test_static_routes() {
    let app = setup();

    let (status, json) = send_json(&app.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["Hello"], "World");

    let (status, json) = send_json(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Available");

    let (status, _, _) = send(&app.router, get("/files/")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_metrics_count_upload_outcomes() {
    let app = setup();

    let upload = image_bytes(16, 16, ImageFormat::Png);
    send(&app.router, multipart_request("file", &upload)).await;
    send(&app.router, multipart_request("file", b"nope")).await;

    let (status, _, body) = send(&app.router, get("/metrics")).await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("yolo_upload_uploads_total{outcome=\"success\"} 1"));
    assert!(text.contains("yolo_upload_uploads_total{outcome=\"invalid_image\"} 1"));
    assert!(text.contains("yolo_upload_detections_total 2"));
}

#[tokio::test]
async fn test_non_multipart_upload_is_a_json_client_error() {
    let app = setup();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/files/")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(image_bytes(16, 16, ImageFormat::Png)))
        .unwrap();
    let (status, content_type, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["detail"].as_str().unwrap().contains("multipart"));
    assert!(!app.output_path.exists());

    let (_, _, body) = send(&app.router, get("/metrics")).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("yolo_upload_uploads_total{outcome=\"invalid_request\"} 1"));
}

#[tokio::test]
async fn test_reported_boxes_are_the_drawn_boxes() {
    let bbox = |x1: f32, x2: f32| BoundingBox {
        class_id: 1,
        confidence: 0.6,
        x1,
        y1: 10.,
        x2,
        y2: 30.,
    };
    let detector = FixedDetector(vec![bbox(10.2, 10.4), bbox(100., 120.)]);
    let app = setup_with(Arc::new(detector), 10 * 1024 * 1024);

    let upload = image_bytes(64, 64, ImageFormat::Png);
    let (status, _, body) = send(&app.router, multipart_request("file", &upload)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send_json(&app.router, get("/result/")).await;
    let detections = json.as_array().unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0]["name"], "bicycle");

    let annotated = image::load_from_memory(&body).unwrap().to_rgb8();
    let line = annotated.get_pixel(10, 20);
    assert!(line[1] > 60, "box pixel {:?}", line);
    let background = annotated.get_pixel(40, 20);
    assert!(background.0.iter().all(|&c| c < 30), "background pixel {:?}", background);
}
