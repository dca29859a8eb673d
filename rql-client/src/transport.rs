use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;

use rql::prelude::{Result, RqlError};
use rql::protocol::{FrameEncoding, SetupReply, SetupRequest, StepReply, StepRequest, WireReply, FIELD_SCREEN};
use rql::remote_loop::PlayTransport;

#[derive(Clone, Debug)]
pub struct TransportSettings {
    pub server_url: String,
    /// Per request
    pub timeout: Duration,
    /// Additional attempts for a step request failing with a timeout or connection error
    pub retries: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000/".to_string(),
            timeout: Duration::from_secs(10),
            retries: 2,
        }
    }
}

/// Blocking HTTP client side of the play protocol
pub struct HttpTransport {
    client: Client,
    settings: TransportSettings,
    frame_encoding: FrameEncoding,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings, frame_encoding: FrameEncoding) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| RqlError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings, frame_encoding })
    }

    fn step_form(&self, request: &StepRequest) -> Result<Form> {
        let screen = Part::bytes(request.screen.0.clone())
            .file_name(self.frame_encoding.file_name())
            .mime_str(self.frame_encoding.mime_type())
            .map_err(|e| RqlError::protocol(format!("invalid screen part: {}", e)))?;
        let form = request.to_text_fields().into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));
        Ok(form.part(FIELD_SCREEN, screen))
    }

    /// Sends the request built by `build`, repeating it on timeouts and connection failures
    fn send(&self, retries: u32, build: impl Fn() -> Result<RequestBuilder>) -> Result<Response> {
        let mut attempt = 0;
        loop {
            match build()?.send() {
                Ok(response) => return Ok(response),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < retries => {
                    attempt += 1;
                    log::warn!("Request failed ({}), retry {} of {}", e, attempt, retries);
                }
                Err(e) => return Err(RqlError::Unavailable(e.to_string())),
            }
        }
    }
}

fn read_reply(response: Response) -> Result<WireReply> {
    let status = response.status();
    let reply: WireReply = response.json()
        .map_err(|e| RqlError::protocol(format!("malformed reply (status {}): {}", status, e)))?;
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(RqlError::UnavailableBackend(reply.error.unwrap_or_else(|| status.to_string())));
    }
    Ok(reply)
}

impl PlayTransport for HttpTransport {
    fn setup(&mut self, request: &SetupRequest) -> Result<SetupReply> {
        let fields = request.to_fields();
        let response = self.send(0, || Ok(self.client.post(&self.settings.server_url).form(&fields)))?;
        SetupReply::try_from(read_reply(response)?)
    }

    fn step(&mut self, request: &StepRequest) -> Result<StepReply> {
        let response = self.send(self.settings.retries, || {
            Ok(self.client.post(&self.settings.server_url).multipart(self.step_form(request)?))
        })?;
        StepReply::try_from(read_reply(response)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use rql::protocol::{EncodedFrame, SessionId};

    use super::*;

    /// Answers a single request with `status` and `body`, returns the received request head and body
    fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                request.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut payload = vec![0; content_length];
            reader.read_exact(&mut payload).unwrap();
            request.push_str(&String::from_utf8_lossy(&payload));

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status, body.len(), body
            );
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            request
        });
        (url, handle)
    }

    fn transport(url: String) -> HttpTransport {
        let settings = TransportSettings { server_url: url, timeout: Duration::from_secs(2), retries: 1 };
        HttpTransport::new(settings, FrameEncoding::Png).unwrap()
    }

    fn step_request() -> StepRequest {
        StepRequest {
            session_id: Some(SessionId::from("abc")),
            screen: EncodedFrame(vec![1, 2, 3]),
            reward: 0.0,
            terminal: false,
            step_index: Some(0),
        }
    }

    #[test]
    fn test_setup_sends_form_and_reads_session() {
        let (url, server) = serve_once("200 OK", r#"{"reply":"ok","sessionId":"s-1"}"#);
        let reply = transport(url)
            .setup(&SetupRequest { action_count: 4, game_name: "catcher".to_string() })
            .unwrap();
        assert_eq!(reply.session_id, SessionId::from("s-1"));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST / "));
        assert!(request.contains("inputCount=4&gameName=catcher"));
    }

    #[test]
    fn test_setup_rejection_is_protocol_error() {
        let (url, server) = serve_once("400 Bad Request", r#"{"reply":"error","error":"missing field"}"#);
        let result = transport(url).setup(&SetupRequest { action_count: 4, game_name: "x".to_string() });
        assert!(matches!(result, Err(RqlError::Protocol(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_unavailable_backend() {
        let (url, server) = serve_once("503 Service Unavailable", r#"{"reply":"error","error":"no weights"}"#);
        let result = transport(url).setup(&SetupRequest { action_count: 4, game_name: "x".to_string() });
        assert!(matches!(result, Err(RqlError::UnavailableBackend(reason)) if reason == "no weights"));
        server.join().unwrap();
    }

    #[test]
    fn test_step_to_unreachable_server_is_unavailable() {
        let url = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}/", listener.local_addr().unwrap())
        };
        let result = transport(url).step(&step_request());
        assert!(matches!(result, Err(RqlError::Unavailable(_))));
    }
}
