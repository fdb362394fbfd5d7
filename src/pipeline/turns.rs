use tokio::time::{Duration, Instant};

/// Interim transcripts shorter than this are ignored for barge-in; they are
/// usually recognizer noise, not the caller talking over us.
const BARGE_IN_MIN_CHARS: usize = 3;

/// Signal produced by an interim recognition result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    None,
    /// The caller is audibly speaking; stop any in-progress spoken output.
    BargeIn,
}

/// Turn-boundary detection for streaming transcription.
///
/// Final results accumulate into the current utterance and (re)arm a short
/// silence deadline; interim results cancel it because the caller is still
/// talking. When the deadline passes with no new final, the accumulated text
/// is the finished turn. The deadline is the sole turn-boundary signal in
/// streaming mode.
pub struct TurnDetector {
    utterance: String,
    silence: Duration,
    deadline: Option<Instant>,
}

impl TurnDetector {
    pub fn new(silence_ms: u64) -> Self {
        Self {
            utterance: String::new(),
            silence: Duration::from_millis(silence_ms),
            deadline: None,
        }
    }

    /// A final recognition result: append and restart the silence window.
    pub fn on_final(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.utterance.push_str(trimmed);
        self.utterance.push(' ');
        self.deadline = Some(Instant::now() + self.silence);
    }

    /// An interim recognition result: the caller is mid-word, so the silence
    /// window is cancelled. Non-trivial interims also report a barge-in.
    pub fn on_interim(&mut self, text: &str) -> TurnSignal {
        self.deadline = None;
        if text.trim().len() > BARGE_IN_MIN_CHARS {
            TurnSignal::BargeIn
        } else {
            TurnSignal::None
        }
    }

    /// The instant at which the current utterance should be emitted, if a
    /// silence window is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Emit the utterance if the silence window has elapsed at `now`.
    /// At most one emission per armed window; the accumulator resets.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                if self.utterance.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.utterance))
                }
            }
            _ => None,
        }
    }
}
