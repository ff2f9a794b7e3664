//! Motion-JPEG decoding over HTTP, raw TCP or a local file.
//!
//! MJPEG sources are a sequence of complete JPEG images, optionally wrapped
//! in a `multipart/x-mixed-replace` body. When a part header carries a
//! `Content-Length` the image is cut at exactly that many bytes; otherwise it
//! is cut at the EOI matching its SOI, so embedded thumbnails stay inside.

use super::decoder::{DecoderFactory, FrameDecoder, Image};
use crate::error::StreamFault;
use image::ImageFormat;
use std::fs::File;
use std::io::{BufReader, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Largest single image accepted before the stream is considered corrupt.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// Bytes kept ahead of an image so its part header survives split reads.
const MAX_PART_HEADER: usize = 1024;

/// Boxed byte source behind a decoder.
pub type ByteSource = Box<dyn Read + Send>;

/// Cuts JPEG images out of a byte stream and decodes them.
pub struct MjpegDecoder<R> {
    reader: R,
    pending: Vec<u8>,
}

impl<R: Read> MjpegDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    /// Next complete JPEG image, or `None` at end of stream.
    pub fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>, StreamFault> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(jpeg) = self.take_jpeg() {
                return Ok(Some(jpeg));
            }
            if self.pending.len() > MAX_FRAME_BYTES {
                return Err(StreamFault::Decode(format!(
                    "no complete image within {} bytes",
                    MAX_FRAME_BYTES
                )));
            }

            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn take_jpeg(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find_marker(&self.pending, SOI, 0) else {
            // The tail may hold a part header or half a marker.
            let cut = self.pending.len().saturating_sub(MAX_PART_HEADER);
            self.pending.drain(..cut);
            return None;
        };

        let declared = content_length(&self.pending[..start])
            .filter(|&len| len >= SOI.len() + EOI.len() && len <= MAX_FRAME_BYTES);
        let end = match declared {
            Some(len) if self.pending.len() < start + len => return None,
            Some(len) if self.pending[start + len - EOI.len()..start + len] == EOI => start + len,
            // Length disagrees with the image; trust the markers.
            _ => find_image_end(&self.pending, start + SOI.len())?,
        };

        let jpeg = self.pending[start..end].to_vec();
        self.pending.drain(..end);
        Some(jpeg)
    }
}

/// Value of the last `Content-Length` header in a multipart preamble.
fn content_length(preamble: &[u8]) -> Option<usize> {
    const NAME: &[u8] = b"content-length:";
    let lower = preamble.to_ascii_lowercase();
    let at = lower.windows(NAME.len()).rposition(|w| w == NAME)? + NAME.len();
    let value = &preamble[at..];
    let end = value
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(value.len());
    std::str::from_utf8(&value[..end]).ok()?.trim().parse().ok()
}

/// End of the image whose SOI precedes `from`, skipping nested SOI/EOI pairs.
fn find_image_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == 0xFF {
            match buf[i + 1] {
                0xD8 => {
                    depth += 1;
                    i += 2;
                    continue;
                }
                0xD9 => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + EOI.len());
                    }
                    i += 2;
                    continue;
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

impl<R: Read> FrameDecoder for MjpegDecoder<R> {
    fn next_frame(&mut self) -> Result<Option<Image>, StreamFault> {
        let Some(jpeg) = self.next_jpeg()? else {
            return Ok(None);
        };
        let image = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| StreamFault::Decode(e.to_string()))?;
        Ok(Some(image.to_rgb8()))
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// Opens MJPEG sources by URL scheme.
///
/// * `http://` / `https://` - streamed with a blocking HTTP client
/// * `tcp://host:port` - raw MJPEG over TCP (e.g. `libcamera-vid --listen`)
/// * anything else - a local file path
#[derive(Debug, Clone, Default)]
pub struct MjpegFactory {
    client: Option<reqwest::blocking::Client>,
}

impl MjpegFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_http(&mut self, url: &str, timeout: Duration) -> Result<ByteSource, StreamFault> {
        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                // The blocking client applies this per body read, not to the
                // whole endless response.
                let client = reqwest::blocking::Client::builder()
                    .connect_timeout(timeout)
                    .timeout(timeout)
                    .build()
                    .map_err(|e| StreamFault::open(url, e))?;
                self.client = Some(client.clone());
                client
            }
        };

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamFault::open(url, e))?;
        Ok(Box::new(response))
    }

    fn open_tcp(url: &str, address: &str, timeout: Duration) -> Result<ByteSource, StreamFault> {
        let addr = address
            .to_socket_addrs()
            .map_err(|e| StreamFault::open(url, e))?
            .next()
            .ok_or_else(|| StreamFault::open(url, "address did not resolve"))?;

        let stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| StreamFault::open(url, e))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| StreamFault::open(url, e))?;
        Ok(Box::new(stream))
    }

    fn open_file(path: &str) -> Result<ByteSource, StreamFault> {
        let file = File::open(path).map_err(|e| StreamFault::open(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

impl DecoderFactory for MjpegFactory {
    type Decoder = MjpegDecoder<ByteSource>;

    fn open(&mut self, url: &str, timeout: Duration) -> Result<Self::Decoder, StreamFault> {
        debug!("Opening MJPEG source {}", url);
        let source = if url.starts_with("http://") || url.starts_with("https://") {
            self.open_http(url, timeout)?
        } else if let Some(address) = url.strip_prefix("tcp://") {
            Self::open_tcp(url, address, timeout)?
        } else {
            Self::open_file(url)?
        };
        info!("MJPEG source {} open", url);
        Ok(MjpegDecoder::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encoded_jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = Image::from_pixel(width, height, image::Rgb([200, 40, 40]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
        bytes.into_inner()
    }

    /// Reads at most `step` bytes per call to exercise marker straddling.
    struct Trickle {
        data: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.step);
            self.data.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_splits_multipart_body() {
        let jpeg = encoded_jpeg(16, 8);
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }

        let mut decoder = MjpegDecoder::new(Cursor::new(body));
        assert_eq!(decoder.next_jpeg().unwrap().unwrap(), jpeg);
        assert_eq!(decoder.next_jpeg().unwrap().unwrap(), jpeg);
        assert!(decoder.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_markers_straddling_reads() {
        let jpeg = encoded_jpeg(8, 8);
        let mut body = vec![0x00, 0xFF];
        body.extend_from_slice(&jpeg);

        let mut decoder = MjpegDecoder::new(Trickle {
            data: Cursor::new(body),
            step: 1,
        });
        assert_eq!(decoder.next_jpeg().unwrap().unwrap(), jpeg);
    }

    /// JPEG with an embedded thumbnail, as cameras write into EXIF.
    fn jpeg_with_thumbnail() -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x08];
        jpeg.extend_from_slice(&[0xFF, 0xD8, 0x11, 0x22, 0xFF, 0xD9]);
        jpeg.extend_from_slice(&[0x33, 0x44, 0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn test_content_length_keeps_nested_image() {
        let jpeg = jpeg_with_thumbnail();
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n");
            body.extend_from_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }

        let mut decoder = MjpegDecoder::new(Trickle {
            data: Cursor::new(body),
            step: 5,
        });
        assert_eq!(decoder.next_jpeg().unwrap().unwrap(), jpeg);
        assert_eq!(decoder.next_jpeg().unwrap().unwrap(), jpeg);
        assert!(decoder.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_nested_markers_without_length() {
        let jpeg = jpeg_with_thumbnail();
        let mut body = jpeg.clone();
        body.extend_from_slice(&jpeg);

        let mut decoder = MjpegDecoder::new(Cursor::new(body));
        assert_eq!(decoder.next_jpeg().unwrap().unwrap(), jpeg);
        assert_eq!(decoder.next_jpeg().unwrap().unwrap(), jpeg);
        assert!(decoder.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_content_length_parsing() {
        assert_eq!(content_length(b"--frame\r\ncontent-LENGTH:  42 \r\n\r\n"), Some(42));
        assert_eq!(content_length(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"), None);
        assert_eq!(content_length(b"Content-Length: nope\r\n"), None);
    }

    #[test]
    fn test_decodes_frames() {
        let mut decoder = MjpegDecoder::new(Cursor::new(encoded_jpeg(20, 10)));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (20, 10));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_image_is_decode_fault() {
        let body = vec![0xFF, 0xD8, 0x00, 0x01, 0x02, 0xFF, 0xD9];
        let mut decoder = MjpegDecoder::new(Cursor::new(body));
        assert!(matches!(decoder.next_frame(), Err(StreamFault::Decode(_))));
    }

    /// Answers one request with a multipart header, then goes silent.
    fn stalling_http_server() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            use std::io::Write;
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request);
            let _ = socket.write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n\
                  --frame\r\nContent-Type: image/jpeg\r\n\r\n",
            );
            let _ = socket.flush();
            std::thread::sleep(Duration::from_secs(10));
            drop(listener);
        });
        format!("http://{}/stream", addr)
    }

    #[test]
    fn test_stalled_http_body_is_io_fault() {
        let url = stalling_http_server();
        let mut decoder = MjpegFactory::new()
            .open(&url, Duration::from_millis(200))
            .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(decoder.next_frame().map(|frame| frame.is_some()));
        });
        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("stalled read never returned");
        assert!(matches!(result, Err(StreamFault::Io(_))));
    }

    #[test]
    fn test_missing_file_is_open_fault() {
        let mut factory = MjpegFactory::new();
        let result = factory.open("/nonexistent/stream.mjpeg", Duration::from_millis(10));
        assert!(matches!(result, Err(StreamFault::Open { .. })));
    }
}
