use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};

const BOUNDARY: &str = "----digitd-multipart-boundary";

/// Probe a running server's health endpoint.
pub fn status(host: &str, port: u16) -> Result<()> {
    let url = format!("http://{host}:{port}/health");
    match agent(Duration::from_secs(5)).get(&url).call() {
        Ok(_) => eprintln!("digitd: running on {host}:{port}"),
        Err(_) => eprintln!("digitd: not responding on {host}:{port}"),
    }
    Ok(())
}

/// Upload an image file to a running server and print the prediction.
pub fn predict(host: &str, port: u16, image: &Path) -> Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let filename = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let (content_type, body) = multipart_request(&filename, &bytes);
    let url = format!("http://{host}:{port}/predict");

    let response = agent(Duration::from_secs(30))
        .post(&url)
        .header("Content-Type", &content_type)
        .send(&body[..])?;

    let text: String = response.into_body().read_to_string()?;
    let v: serde_json::Value = serde_json::from_str(&text)?;
    if let Some(error) = v["error"].as_str() {
        bail!("server error: {error}");
    }

    println!("digit: {}  confidence: {:.4}", v["digit"], v["confidence"]);
    Ok(())
}

/// Build a multipart/form-data request carrying one `image` file field.
/// Returns the content type (boundary included) and the encoded body.
pub fn multipart_request(filename: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    let _ = write!(
        body,
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    body.extend_from_slice(bytes);
    let _ = write!(body, "\r\n--{BOUNDARY}--\r\n");

    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_connect(Some(Duration::from_secs(2)))
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .new_agent()
}
