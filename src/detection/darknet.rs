use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::detection::types::{BoundingBox, Detection};
use crate::detection::worker::Detector;
use crate::error::DetectorError;

const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// One detection as the server sends it: `[label, confidence, [cx, cy, w, h]]`.
#[derive(Debug, Deserialize)]
struct WireDetection(String, f32, [f32; 4]);

impl From<WireDetection> for Detection {
    fn from(WireDetection(label, confidence, [cx, cy, w, h]): WireDetection) -> Self {
        Detection::new(label, confidence, BoundingBox::new(cx, cy, w, h))
    }
}

/// Client for a darknet detection server. Frames in both directions are a little-endian
/// `u32` length followed by the payload: JPEG out, JSON detections back.
pub struct DarknetClient {
    endpoint: String,
    connection: Option<BufReader<TcpStream>>,
}

impl DarknetClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connection: None,
        }
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>, DetectorError> {
        let stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| DetectorError::Connect(e, self.endpoint.clone()))?;
        stream.set_nodelay(true)?;
        info!(endpoint = %self.endpoint, "Connected to detection server");
        Ok(BufReader::new(stream))
    }

    /// The connection is held outside `self` for the exchange and only put back once the
    /// reply was read in full, so a dropped round trip never leaves a reply pending on it.
    async fn round_trip(&mut self, jpeg: &Bytes) -> Result<Vec<Detection>, DetectorError> {
        let length =
            u32::try_from(jpeg.len()).map_err(|_| DetectorError::FrameTooLarge(jpeg.len()))?;
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.connect().await?,
        };
        write_frame(connection.get_mut(), length, jpeg).await?;
        let payload = read_frame(&mut connection).await?;
        self.connection = Some(connection);
        parse_detections(&payload)
    }
}

async fn write_frame(
    stream: &mut TcpStream,
    length: u32,
    payload: &[u8],
) -> Result<(), DetectorError> {
    stream.write_all(&length.to_le_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, DetectorError> {
    let mut length_buffer = [0u8; 4];
    reader.read_exact(&mut length_buffer).await?;
    let length = u32::from_le_bytes(length_buffer) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(DetectorError::FrameTooLarge(length));
    }
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

fn parse_detections(payload: &[u8]) -> Result<Vec<Detection>, DetectorError> {
    let wire: Vec<WireDetection> = serde_json::from_slice(payload)?;
    Ok(wire.into_iter().map(Detection::from).collect())
}

#[async_trait]
impl Detector for DarknetClient {
    async fn detect(&mut self, jpeg: &Bytes) -> Result<Vec<Detection>, DetectorError> {
        let result = self.round_trip(jpeg).await;
        match &result {
            Ok(detections) => debug!(count = detections.len(), "Received detections"),
            Err(e) => {
                warn!("Dropping detector connection: {}", e);
                self.connection = None;
            }
        }
        result
    }

    fn reset(&mut self) {
        if self.connection.take().is_some() {
            debug!(endpoint = %self.endpoint, "Detector connection reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{DetectionRequest, DetectorMessage};
    use crate::detection::worker::spawn_detector;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// Answers every request with a detection labelled with the request body, holding
    /// replies to `slow` back for a while.
    async fn echo_server(listener: TcpListener) {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                while let Ok(request) = read_frame(&mut socket).await {
                    let label = String::from_utf8_lossy(&request).into_owned();
                    if label == "slow" {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                    }
                    let reply = format!(r#"[["{}", 0.9, [0.5, 0.5, 0.1, 0.1]]]"#, label);
                    if write_frame(&mut socket, reply.len() as u32, reply.as_bytes())
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            });
        }
    }

    fn request(body: &'static [u8]) -> DetectionRequest {
        DetectionRequest {
            id: Uuid::new_v4(),
            jpeg: Bytes::from_static(body),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn parses_wire_detections() {
        let detections =
            parse_detections(br#"[["bird", 0.93, [0.5, 0.4, 0.1, 0.2]], ["cat", 0.5, [0, 0, 1, 1]]]"#)
                .unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "bird");
        assert_eq!(detections[0].rect, BoundingBox::new(0.5, 0.4, 0.1, 0.2));
        assert!(parse_detections(b"{}").is_err());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut data: &[u8] = &u32::MAX.to_le_bytes();
        assert!(matches!(
            read_frame(&mut data).await,
            Err(DetectorError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn round_trip_against_a_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_frame(&mut socket).await.unwrap();
            assert_eq!(request, b"jpeg-bytes");
            let reply = br#"[["person", 0.97, [0.2, 0.3, 0.1, 0.4]]]"#;
            write_frame(&mut socket, reply.len() as u32, reply).await.unwrap();
        });

        let mut client = DarknetClient::new(address.to_string());
        let detections = client.detect(&Bytes::from_static(b"jpeg-bytes")).await.unwrap();
        assert_eq!(detections[0].label, "person");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_reply_is_not_read_by_the_next_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(echo_server(listener));

        let (mut channels, task) = spawn_detector(DarknetClient::new(address.to_string()), 4);
        let abandoned = request(b"slow");
        channels.requests.send(DetectorMessage::Detect(abandoned.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        abandoned.cancel.cancel();

        let live = request(b"fast");
        channels.requests.send(DetectorMessage::Detect(live.clone())).await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(2), channels.results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.id, live.id);
        assert_eq!(response.detections[0].label, "fast");

        channels.requests.send(DetectorMessage::Halt).await.unwrap();
        task.join(Duration::from_secs(1)).await;
        server.abort();
    }

    #[tokio::test]
    async fn dropped_round_trip_leaves_no_connection_behind() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(echo_server(listener));

        let mut client = DarknetClient::new(address.to_string());
        let slow = Bytes::from_static(b"slow");
        let abandoned = tokio::time::timeout(Duration::from_millis(50), client.detect(&slow)).await;
        assert!(abandoned.is_err());
        assert!(client.connection.is_none());

        let detections = client.detect(&Bytes::from_static(b"fast")).await.unwrap();
        assert_eq!(detections[0].label, "fast");
        assert!(client.connection.is_some());
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_server_reports_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let mut client = DarknetClient::new(address.to_string());
        assert!(matches!(
            client.detect(&Bytes::from_static(b"x")).await,
            Err(DetectorError::Connect(..))
        ));
    }
}
