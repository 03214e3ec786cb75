use std::io::{Cursor, Read};
use std::path::PathBuf;

use anyhow::Result;
use log::{error, info};
use multipart::server::Multipart;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::error::PredictError;
use crate::model::{Engine, Prediction};
use crate::preprocess;

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub model: PathBuf,
}

/// Load the model and serve until killed. A model that cannot be loaded is
/// fatal: the error propagates out before the socket is even bound.
pub fn run(options: &ServeOptions) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    info!("loading model from {}", options.model.display());
    let engine = Engine::load(&options.model)?;
    info!("model loaded");

    let server = Server::http((options.host.as_str(), options.port)).map_err(|e| {
        anyhow::anyhow!("failed to bind {}:{}: {}", options.host, options.port, e)
    })?;
    info!("listening on {}:{}", options.host, options.port);

    serve(&server, &engine);
    Ok(())
}

/// Answer requests sequentially until the server handle shuts down.
pub fn serve(server: &Server, engine: &Engine) {
    for request in server.incoming_requests() {
        match (request.method(), request.url()) {
            (Method::Get, "/health") => {
                let response = with_cors(Response::from_string("ok"));
                let _ = request.respond(response);
            }
            (Method::Post, "/predict") => handle_predict(request, engine),
            (Method::Options, _) => {
                let response = with_cors(Response::from_string("").with_status_code(204))
                    .with_header(
                        "Access-Control-Allow-Methods: GET, POST, OPTIONS"
                            .parse::<Header>()
                            .unwrap(),
                    )
                    .with_header(
                        "Access-Control-Allow-Headers: Content-Type"
                            .parse::<Header>()
                            .unwrap(),
                    );
                let _ = request.respond(response);
            }
            _ => {
                let response = with_cors(Response::from_string("not found").with_status_code(404));
                let _ = request.respond(response);
            }
        }
    }
}

fn handle_predict(mut request: Request, engine: &Engine) {
    let (status, body) = match predict_request(&mut request, engine) {
        Ok(Prediction { digit, confidence }) => {
            (200, serde_json::json!({"digit": digit, "confidence": confidence}))
        }
        Err(err) => {
            let status = err.status_code();
            if status >= 500 {
                error!("prediction failed: {err}");
            }
            (status, serde_json::json!({"error": err.to_string()}))
        }
    };

    let response = with_cors(
        Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header("Content-Type: application/json".parse::<Header>().unwrap()),
    );
    let _ = request.respond(response);
}

/// The whole pipeline for one request: extract the upload, preprocess,
/// infer. Validation failures short-circuit before any inference runs.
fn predict_request(request: &mut Request, engine: &Engine) -> Result<Prediction, PredictError> {
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string());

    let mut body = Vec::new();
    request
        .as_reader()
        .read_to_end(&mut body)
        .map_err(PredictError::Malformed)?;

    let image_bytes = read_image_field(content_type.as_deref(), &body)?;
    let input = preprocess::prepare(&image_bytes)?;
    Ok(engine.predict(&input)?)
}

/// Pull the `image` file field out of a multipart body.
fn read_image_field(content_type: Option<&str>, body: &[u8]) -> Result<Vec<u8>, PredictError> {
    let boundary = content_type
        .and_then(parse_boundary)
        .ok_or(PredictError::MissingImage)?;

    let mut form = Multipart::with_body(Cursor::new(body), boundary);
    while let Some(mut field) = form.read_entry().map_err(PredictError::Malformed)? {
        if &*field.headers.name != "image" {
            continue;
        }
        if field.headers.filename.as_deref().unwrap_or("").is_empty() {
            return Err(PredictError::EmptyFilename);
        }
        let mut bytes = Vec::new();
        field
            .data
            .read_to_end(&mut bytes)
            .map_err(PredictError::Malformed)?;
        return Ok(bytes);
    }

    Err(PredictError::MissingImage)
}

fn parse_boundary(content_type: &str) -> Option<String> {
    let (kind, params) = content_type.split_once(';')?;
    if !kind.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .split(';')
        .find_map(|param| param.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
}

fn with_cors<R: Read>(response: Response<R>) -> Response<R> {
    response.with_header("Access-Control-Allow-Origin: *".parse::<Header>().unwrap())
}

#[cfg(test)]
mod tests {
    use super::{parse_boundary, read_image_field};
    use crate::error::PredictError;

    fn form_body(field: &str, disposition_tail: &str, bytes: &[u8]) -> (String, Vec<u8>) {
        let boundary = "test-boundary-1234";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"{disposition_tail}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={boundary}"),
            body,
        )
    }

    #[test]
    fn test_parse_boundary() {
        assert_eq!(
            parse_boundary("multipart/form-data; boundary=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            parse_boundary("multipart/form-data; boundary=\"quoted\"").as_deref(),
            Some("quoted")
        );
        assert_eq!(parse_boundary("application/json"), None);
        assert_eq!(parse_boundary("multipart/form-data"), None);
    }

    #[test]
    fn test_read_image_field_round_trips() {
        let payload = b"\x89PNG fake bytes";
        let (content_type, body) =
            form_body("image", "; filename=\"digit.png\"", payload);
        let bytes = read_image_field(Some(&content_type), &body).unwrap();
        assert_eq!(bytes, payload);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let (content_type, body) = form_body("file", "; filename=\"digit.png\"", b"bytes");
        let err = read_image_field(Some(&content_type), &body).unwrap_err();
        assert!(matches!(err, PredictError::MissingImage));
    }

    #[test]
    fn test_empty_filename_is_rejected() {
        let (content_type, body) = form_body("image", "; filename=\"\"", b"bytes");
        let err = read_image_field(Some(&content_type), &body).unwrap_err();
        assert!(matches!(err, PredictError::EmptyFilename));
    }

    #[test]
    fn test_non_multipart_content_type_is_rejected() {
        let err = read_image_field(Some("application/json"), b"{}").unwrap_err();
        assert!(matches!(err, PredictError::MissingImage));

        let err = read_image_field(None, b"raw bytes").unwrap_err();
        assert!(matches!(err, PredictError::MissingImage));
    }
}
