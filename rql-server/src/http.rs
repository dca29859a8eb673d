use std::convert::Infallible;
use std::sync::Arc;

use hyper::body::HttpBody;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;

use rql::model::LinearNetworkFactory;
use rql::prelude::{Result, RqlError};
use rql::protocol::{FormFields, SetupRequest, StepReply, StepRequest, WireReply, FIELD_SCREEN};
use rql::session::SessionController;

pub type Controller = SessionController<LinearNetworkFactory>;

const MAX_SETUP_BYTES: usize = 16 * 1024;
const MAX_STEP_BYTES: u64 = 8 * 1024 * 1024;
const MAX_SCREEN_BYTES: u64 = 4 * 1024 * 1024;
const MAX_TEXT_FIELD_BYTES: u64 = 1024;

#[derive(Serialize)]
struct Hello {
    hello: &'static str,
}

/// Single resource `/`: `GET` is a health check, `POST` carries a setup (url-encoded form)
/// or a step (multipart form with a `screen` file).
pub async fn handle_request(controller: Arc<Controller>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/") => json_response(StatusCode::OK, &Hello { hello: "world" }),
        (Method::POST, "/") => match post(controller, req).await {
            Ok(reply) => json_response(StatusCode::OK, &reply),
            Err(e) => {
                let status = status_of(&e);
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    log::error!("{}", e);
                } else {
                    log::warn!("Rejected request: {}", e);
                }
                json_response(status, &WireReply::error(&e))
            }
        },
        _ => {
            let mut response = Response::new(Body::from("not found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };
    Ok(response)
}

async fn post(controller: Arc<Controller>, req: Request<Body>) -> Result<WireReply> {
    let content_type = req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let (fields, screen) = read_multipart(&content_type, req.into_body()).await?;
        let request = StepRequest::from_fields(&fields, screen)?;
        match run_blocking(move || controller.step(request)).await {
            Err(RqlError::SessionNotBound(_)) => Ok(WireReply::from(StepReply::Stopped)),
            reply => reply.map(WireReply::from),
        }
    } else {
        let body = read_limited(req.into_body(), MAX_SETUP_BYTES).await?;
        let request = SetupRequest::from_fields(&parse_form(&body)?)?;
        let reply = run_blocking(move || controller.setup(&request)).await?;
        Ok(WireReply::from(&reply))
    }
}

/// Inference and weight loading block; keep them off the reactor threads
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await
        .map_err(|e| RqlError::UnavailableBackend(format!("worker failed: {}", e)))?
}

async fn read_limited(mut body: Body, limit: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| RqlError::protocol(format!("unreadable body: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(RqlError::protocol(format!("request body exceeds {} bytes", limit)));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn parse_form(body: &[u8]) -> Result<FormFields> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .map(FormFields::new)
        .map_err(|e| RqlError::protocol(format!("malformed form: {}", e)))
}

async fn read_multipart(content_type: &str, body: Body) -> Result<(FormFields, Option<Vec<u8>>)> {
    let malformed = |e: multer::Error| RqlError::protocol(format!("malformed multipart body: {}", e));

    let boundary = multer::parse_boundary(content_type).map_err(malformed)?;
    let constraints = multer::Constraints::new().size_limit(
        multer::SizeLimit::new()
            .whole_stream(MAX_STEP_BYTES)
            .per_field(MAX_TEXT_FIELD_BYTES)
            .for_field(FIELD_SCREEN, MAX_SCREEN_BYTES),
    );
    let mut multipart = multer::Multipart::with_constraints(body, boundary, constraints);
    let mut fields = FormFields::default();
    let mut screen = None;
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FIELD_SCREEN {
            screen = Some(field.bytes().await.map_err(malformed)?.to_vec());
        } else {
            let value = field.text().await.map_err(malformed)?;
            fields.push(&name, value);
        }
    }
    Ok((fields, screen))
}

pub fn status_of(error: &RqlError) -> StatusCode {
    match error {
        RqlError::InsufficientHistory { .. } => StatusCode::CONFLICT,
        RqlError::UnavailableBackend(_)
        | RqlError::NetworkOutput { .. }
        | RqlError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RqlError::Protocol(_)
        | RqlError::SessionNotBound(_)
        | RqlError::FrameDimension { .. }
        | RqlError::FrameCodec(_) => StatusCode::BAD_REQUEST,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            log::error!("failed to serialize reply: {}", e);
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use rstest::rstest;

    use rql::model::{CheckpointTable, InputDims};
    use rql::prelude::GrayFrame;
    use rql::protocol::FrameEncoding;
    use rql::session::SessionSettings;

    use super::*;

    const SIZE: u32 = 8;
    const BOUNDARY: &str = "rql-test-boundary";

    #[ctor::ctor]
    fn init() {
        rql::log::init_test_logging();
    }

    fn controller() -> Arc<Controller> {
        let settings = SessionSettings { frame_width: SIZE, frame_height: SIZE, random_seed: Some(1), ..Default::default() };
        let dims = InputDims { history_length: settings.history_length, height: SIZE as usize, width: SIZE as usize };
        Arc::new(SessionController::new(LinearNetworkFactory::new(dims, Some(2)), CheckpointTable::empty(), settings))
    }

    fn setup_request(body: &str) -> Request<Body> {
        Request::post("/")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn step_request(text_fields: &[(&str, &str)], screen: Option<&[u8]>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in text_fields {
            body.extend_from_slice(format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            ).as_bytes());
        }
        if let Some(screen) = screen {
            body.extend_from_slice(format!(
                "--{}\r\nContent-Disposition: form-data; name=\"screen\"; filename=\"capture.png\"\r\nContent-Type: image/png\r\n\r\n",
                BOUNDARY
            ).as_bytes());
            body.extend_from_slice(screen);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::post("/")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    fn screen(size: u32) -> Vec<u8> {
        FrameEncoding::Png.encode(&GrayFrame::from_pixel(size, size, Luma([90]))).unwrap().0
    }

    async fn call(controller: &Arc<Controller>, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = handle_request(Arc::clone(controller), req).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn setup(controller: &Arc<Controller>) -> String {
        let (status, reply) = call(controller, setup_request("inputCount=4&gameName=catcher")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["reply"], "ok");
        reply["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_check() {
        let req = Request::get("/").body(Body::empty()).unwrap();
        let (status, reply) = call(&controller(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, serde_json::json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn test_setup_then_step_returns_action() {
        let controller = controller();
        let id = setup(&controller).await;

        let fields = [("sessionId", id.as_str()), ("reward", "0"), ("isTerminal", "False")];
        let (status, reply) = call(&controller, step_request(&fields, Some(&screen(SIZE)))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(reply["action"].as_u64().unwrap() < 4);
    }

    #[tokio::test]
    async fn test_terminal_step_is_acknowledged() {
        let controller = controller();
        let id = setup(&controller).await;

        let fields = [("sessionId", id.as_str()), ("reward", "1"), ("isTerminal", "True")];
        let (status, reply) = call(&controller, step_request(&fields, Some(&screen(SIZE)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, serde_json::json!({"reply": "ok"}));
    }

    #[tokio::test]
    async fn test_step_without_session_is_stopped() {
        let fields = [("reward", "0"), ("isTerminal", "False")];
        let (status, reply) = call(&controller(), step_request(&fields, Some(&screen(SIZE)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, serde_json::json!({"reply": "stopped"}));
    }

    #[rstest]
    #[case::missing_input_count("gameName=catcher")]
    #[case::invalid_input_count("inputCount=many&gameName=catcher")]
    #[case::zero_actions("inputCount=0&gameName=catcher")]
    #[case::missing_game_name("inputCount=4")]
    #[tokio::test]
    async fn test_invalid_setup_is_rejected(#[case] body: &str) {
        let (status, reply) = call(&controller(), setup_request(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["reply"], "error");
        assert!(reply["error"].is_string());
    }

    #[tokio::test]
    async fn test_step_with_wrong_frame_size_is_rejected() {
        let controller = controller();
        let id = setup(&controller).await;

        let fields = [("sessionId", id.as_str()), ("reward", "0"), ("isTerminal", "False")];
        let (status, reply) = call(&controller, step_request(&fields, Some(&screen(SIZE * 2)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["reply"], "error");
    }

    #[tokio::test]
    async fn test_step_without_screen_is_rejected() {
        let controller = controller();
        let id = setup(&controller).await;

        let fields = [("sessionId", id.as_str()), ("reward", "0")];
        let (status, _) = call(&controller, step_request(&fields, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_setup_body_is_rejected() {
        let body = format!("inputCount=4&gameName={}", "x".repeat(MAX_SETUP_BYTES));
        let (status, reply) = call(&controller(), setup_request(&body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["reply"], "error");
    }

    #[tokio::test]
    async fn test_oversized_screen_is_rejected() {
        let controller = controller();
        let id = setup(&controller).await;

        let screen = vec![0u8; MAX_SCREEN_BYTES as usize + 1];
        let fields = [("sessionId", id.as_str()), ("reward", "0")];
        let (status, reply) = call(&controller, step_request(&fields, Some(&screen))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["reply"], "error");
    }

    #[rstest]
    #[case(RqlError::InsufficientHistory { available: 1, required: 4 }, StatusCode::CONFLICT)]
    #[case(RqlError::UnavailableBackend("gone".to_string()), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(RqlError::NetworkOutput { expected: 4, actual: 3 }, StatusCode::SERVICE_UNAVAILABLE)]
    #[case(RqlError::protocol("bad"), StatusCode::BAD_REQUEST)]
    fn test_status_of(#[case] error: RqlError, #[case] expected: StatusCode) {
        assert_eq!(status_of(&error), expected);
    }
}
