use async_trait::async_trait;
use nongbox_core::{NongService, ProgressCallback, Transport, TransportError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Initialize tracing for tests with proper test output handling
#[allow(dead_code)]
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true)
        .try_init();
}

/// Transport serving canned responses from a URL map. Unknown URLs fail with
/// a network error, so a test never reaches outside its own fixtures.
pub struct MockTransport {
    responses: Mutex<HashMap<String, Result<Vec<u8>, TransportError>>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            responses: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_ok(&self, url: &str, bytes: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(bytes));
    }

    pub fn set_status(&self, url: &str, code: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(TransportError::Status(code)));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        url: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<u8>, TransportError> {
        let canned = self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(TransportError::Network(format!(
                    "no canned response for {url}"
                )))
            });
        let bytes = canned?;
        if let Some(cb) = &progress {
            let total = bytes.len() as u64;
            cb(total / 2, total);
            cb(total, total);
        }
        Ok(bytes)
    }
}

/// Let spawned transfer tasks finish and fold their results into the service.
///
/// The mock transport never blocks, so a handful of yields is enough for
/// every spawned fetch to complete on the test runtime.
#[allow(dead_code)]
pub async fn settle(service: &mut NongService) {
    for _ in 0..20 {
        tokio::task::yield_now().await;
        service.poll_transfers();
    }
}
