use std::io::Read;
use std::time::Duration;

use rand::RngCore;
use zeroize::Zeroize;

use super::response::parse_prediction;
use super::{Classification, Classifier};
use crate::error::ClassifyError;

pub const DEFAULT_ENDPOINT: &str = "https://ashutoh12-retinopathy-backend.hf.space/predict";

/// Multipart field the service reads the image from.
const FIELD_NAME: &str = "file";
const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

/// Classifier backed by the remote HTTP endpoint.
///
/// One `POST` per call, no retry. Transport and server failures surface as
/// `ClassifyError` and are left to the caller's policy.
pub struct HttpClassifier {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpClassifier {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            endpoint: endpoint.to_string(),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Classifier for HttpClassifier {
    fn classify_image(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<Classification, ClassifyError> {
        let boundary = multipart_boundary();
        let mut body = multipart_body(&boundary, FIELD_NAME, filename, content_type, bytes);
        let sent = self
            .agent
            .post(&self.endpoint)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .set("Accept", "application/json")
            .send_bytes(&body);
        body.zeroize();

        let response = match sent {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => return Err(ClassifyError::Status { status }),
            Err(err) => return Err(ClassifyError::Transport(err.to_string())),
        };
        let mut raw = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut raw)
            .map_err(|e| ClassifyError::Transport(format!("read response: {}", e)))?;
        parse_prediction(&raw)
    }
}

fn multipart_boundary() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("----retina-live-{}", suffix)
}

/// Encode a single-file `multipart/form-data` body.
fn multipart_body(
    boundary: &str,
    field: &str,
    filename: &str,
    content_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let filename: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\r' || c == '\n' { '_' } else { c })
        .collect();
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_has_single_file_part() {
        let body = multipart_body("XYZ", "file", "frame.jpg", "image/jpeg", b"\xFF\xD8jpeg");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\n"));
        assert!(text.contains("name=\"file\"; filename=\"frame.jpg\""));
        assert!(text.contains("Content-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with("\r\n--XYZ--\r\n"));
        assert_eq!(text.matches("--XYZ").count(), 2);
    }

    #[test]
    fn filename_cannot_break_the_header() {
        let body = multipart_body("B", "file", "a\"b\r\n.png", "image/png", b"");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("filename=\"a_b__.png\""));
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(multipart_boundary(), multipart_boundary());
    }
}
