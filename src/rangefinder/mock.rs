//! Scripted stand-ins for the rangefinder hardware.
//!
//! Each double is a cheap handle over shared state, so a test can keep a
//! clone for inspection after moving the original into a link or session.

use super::codec::{self, FRAME_LEN, HEADER};
use super::hal::{Delay, PowerLine, SerialChannel};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Build a well-formed response frame for `raw` decimeters.
pub fn response_frame(command: u8, status: u8, raw: u16) -> [u8; FRAME_LEN] {
    let [hi, lo] = raw.to_be_bytes();
    let mut frame = [HEADER[0], HEADER[1], command, status, 0x00, hi, lo, 0];
    frame[7] = frame[2].wrapping_add(codec::checksum(&frame[4..7]));
    frame
}

#[derive(Debug, Default)]
struct SerialScript {
    replies: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    reads: usize,
    cleared: usize,
    fail_writes: bool,
}

/// A serial channel that answers reads from a queue of scripted replies.
///
/// Each `read_full` call consumes one queued reply (an empty reply behaves
/// like a read timeout). An exhausted queue also times out. Every queued
/// byte counts as already received, and clearing the input buffer leaves
/// the queue alone, since scripted replies stand for answers still to come.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSerial {
    inner: Arc<Mutex<SerialScript>>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, SerialScript> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes for the next read.
    pub fn push_reply(&self, bytes: impl Into<Vec<u8>>) -> &Self {
        self.script().replies.push_back(bytes.into());
        self
    }

    /// Queue a read that times out with nothing received.
    pub fn push_silence(&self) -> &Self {
        self.push_reply(Vec::new())
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self) {
        self.script().fail_writes = true;
    }

    /// Frames written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.script().written.clone()
    }

    /// Command codes written so far.
    pub fn commands(&self) -> Vec<u8> {
        self.script()
            .written
            .iter()
            .filter_map(|frame| frame.get(2).copied())
            .collect()
    }

    /// Number of read attempts so far.
    pub fn read_count(&self) -> usize {
        self.script().reads
    }

    /// Number of I/O operations of any kind so far.
    pub fn io_count(&self) -> usize {
        let script = self.script();
        script.reads + script.written.len()
    }

    /// Number of input-buffer clears so far.
    pub fn clear_count(&self) -> usize {
        self.script().cleared
    }

    /// Replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.script().replies.len()
    }
}

impl SerialChannel for ScriptedSerial {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut script = self.script();
        if script.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        script.written.push(bytes.to_vec());
        Ok(())
    }

    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.script();
        script.reads += 1;

        let Some(mut reply) = script.replies.pop_front() else {
            return Ok(0);
        };

        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        if reply.len() > n {
            reply.drain(..n);
            script.replies.push_front(reply);
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.script().cleared += 1;
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.script().replies.iter().map(Vec::len).sum())
    }
}

/// A power line that records every level it is driven to.
#[derive(Debug, Clone, Default)]
pub struct MockPowerLine {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl MockPowerLine {
    pub fn new() -> Self {
        Self::default()
    }

    fn levels(&self) -> MutexGuard<'_, Vec<bool>> {
        self.levels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the line was last driven high.
    pub fn is_high(&self) -> bool {
        self.levels().last().copied().unwrap_or(false)
    }

    /// Every level driven so far, oldest first.
    pub fn history(&self) -> Vec<bool> {
        self.levels().clone()
    }
}

impl PowerLine for MockPowerLine {
    fn drive_high(&mut self) {
        self.levels().push(true);
    }

    fn drive_low(&mut self) {
        self.levels().push(false);
    }
}

/// A delay that records requested durations instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    requested: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations requested so far.
    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_serial_splits_long_replies() {
        let serial = ScriptedSerial::new();
        serial.push_reply(vec![1, 2, 3, 4, 5]);

        let mut channel = serial.clone();
        let mut buf = [0u8; 3];
        assert_eq!(channel.read_full(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(channel.read_full(&mut buf).unwrap(), 2);
        assert_eq!(channel.read_full(&mut buf).unwrap(), 0);
        assert_eq!(serial.read_count(), 3);
    }

    #[test]
    fn test_scripted_serial_reports_queued_bytes() {
        let serial = ScriptedSerial::new();
        serial.push_reply(vec![1, 2, 3]).push_silence().push_reply(vec![4]);

        let mut channel = serial.clone();
        assert_eq!(channel.bytes_available().unwrap(), 4);
        channel.clear_input().unwrap();
        assert_eq!(channel.bytes_available().unwrap(), 4);
        assert_eq!(serial.clear_count(), 1);
    }

    #[test]
    fn test_response_frame_decodes() {
        let frame = codec::decode_response(&response_frame(0x88, 0x01, 350)).unwrap();
        assert_eq!(frame.distance_raw(), 350);
    }
}
