//! Scripted decoder factory for exercising stream recovery without a network.

use super::decoder::{DecoderFactory, FrameDecoder, Image};
use crate::error::StreamFault;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One scripted decoder outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Deliver a frame
    Frame,
    /// Fail with a decode fault
    Fault,
    /// End the stream
    End,
}

#[derive(Debug)]
struct SourceScript {
    online: bool,
    steps: VecDeque<Step>,
    endless: bool,
    size: (u32, u32),
}

#[derive(Debug, Default)]
struct FactoryScript {
    sources: HashMap<String, SourceScript>,
    opens: Vec<String>,
    live: usize,
    max_live: usize,
}

/// A [`DecoderFactory`] whose sources behave as scripted per URL.
///
/// Unknown URLs fail to open. Steps are shared across sessions of the same
/// URL, so a reconnect continues where the previous session stopped.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    inner: Arc<Mutex<FactoryScript>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, FactoryScript> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A source that opens and delivers `width` x `height` frames forever.
    pub fn online(&self, url: &str, width: u32, height: u32) -> &Self {
        self.scripted(url, &[], true, (width, height))
    }

    /// A source that refuses to open until [`set_online`](Self::set_online),
    /// then delivers 1 x 1 frames forever.
    pub fn offline(&self, url: &str) -> &Self {
        self.script().sources.insert(
            url.to_string(),
            SourceScript {
                online: false,
                steps: VecDeque::new(),
                endless: true,
                size: (1, 1),
            },
        );
        self
    }

    /// A source that plays `steps`, then either delivers frames forever
    /// (`endless`) or ends.
    pub fn scripted(&self, url: &str, steps: &[Step], endless: bool, size: (u32, u32)) -> &Self {
        self.script().sources.insert(
            url.to_string(),
            SourceScript {
                online: true,
                steps: steps.iter().copied().collect(),
                endless,
                size,
            },
        );
        self
    }

    /// Take a source on- or offline.
    pub fn set_online(&self, url: &str, online: bool) {
        if let Some(source) = self.script().sources.get_mut(url) {
            source.online = online;
        }
    }

    /// Every open attempt so far, in order.
    pub fn opens(&self) -> Vec<String> {
        self.script().opens.clone()
    }

    /// Open attempts for `url`.
    pub fn open_count(&self, url: &str) -> usize {
        self.script().opens.iter().filter(|u| *u == url).count()
    }

    /// Decoders currently alive.
    pub fn live_decoders(&self) -> usize {
        self.script().live
    }

    /// Most decoders ever alive at once.
    pub fn max_live_decoders(&self) -> usize {
        self.script().max_live
    }
}

impl DecoderFactory for ScriptedFactory {
    type Decoder = ScriptedDecoder;

    fn open(&mut self, url: &str, _timeout: Duration) -> Result<ScriptedDecoder, StreamFault> {
        let mut script = self.script();
        script.opens.push(url.to_string());

        match script.sources.get(url) {
            Some(source) if source.online => {}
            _ => return Err(StreamFault::open(url, "scripted offline")),
        }

        script.live += 1;
        script.max_live = script.max_live.max(script.live);
        Ok(ScriptedDecoder {
            url: url.to_string(),
            factory: self.clone(),
        })
    }
}

/// Decoder handed out by [`ScriptedFactory`].
#[derive(Debug)]
pub struct ScriptedDecoder {
    url: String,
    factory: ScriptedFactory,
}

impl FrameDecoder for ScriptedDecoder {
    fn next_frame(&mut self) -> Result<Option<Image>, StreamFault> {
        let mut script = self.factory.script();
        let Some(source) = script.sources.get_mut(&self.url) else {
            return Ok(None);
        };

        let step = match source.steps.pop_front() {
            Some(step) => step,
            None if source.endless && source.online => Step::Frame,
            None => Step::End,
        };

        match step {
            Step::Frame => Ok(Some(Image::new(source.size.0, source.size.1))),
            Step::Fault => Err(StreamFault::Decode("scripted fault".to_string())),
            Step::End => Ok(None),
        }
    }
}

impl Drop for ScriptedDecoder {
    fn drop(&mut self) {
        let mut script = self.factory.script();
        script.live = script.live.saturating_sub(1);
    }
}
