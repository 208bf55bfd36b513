use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Sink for rendered utterances. Speech synthesis itself is an external
/// collaborator; the default sink logs the sentence.
pub trait Speaker: Send + 'static {
    fn say(&mut self, utterance: &str);
}

pub struct LogSpeaker;

impl Speaker for LogSpeaker {
    fn say(&mut self, utterance: &str) {
        info!("Respond: '{utterance}'");
    }
}

/// Collects utterances for inspection, in tests.
#[derive(Clone, Default)]
pub struct CollectSpeaker {
    pub utterances: Arc<Mutex<Vec<String>>>,
}

impl Speaker for CollectSpeaker {
    fn say(&mut self, utterance: &str) {
        self.utterances.lock().unwrap().push(utterance.to_string());
    }
}

#[derive(Debug)]
struct VoiceState {
    atc: String,
    call_sign: String,
    phrases: Vec<String>,
}

/// Readback phrases staged during command handling, flushed as one sentence
/// through a single synthesis worker. Enqueueing never blocks.
#[derive(Clone)]
pub struct Voice {
    state: Arc<Mutex<VoiceState>>,
    tx: mpsc::UnboundedSender<String>,
}

impl Voice {
    /// Start the synthesis worker on its own blocking thread and return
    /// the staging handle.
    pub fn new(atc: &str, call_sign: &str, speaker: impl Speaker) -> Voice {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::task::spawn_blocking(move || {
            let mut speaker = speaker;
            while let Some(utterance) = rx.blocking_recv() {
                speaker.say(&utterance);
            }
        });
        Voice {
            state: Arc::new(Mutex::new(VoiceState {
                atc: atc.to_string(),
                call_sign: call_sign.to_string(),
                phrases: Vec::new(),
            })),
            tx,
        }
    }

    /// Stage a phrase for the next readback.
    pub fn stage(&self, phrase: impl Into<String>) {
        self.state.lock().unwrap().phrases.push(phrase.into());
    }

    /// Replace the station the readback addresses.
    pub fn set_atc(&self, station: &str) {
        self.state.lock().unwrap().atc = station.to_string();
    }

    /// Stage one phrase and flush immediately.
    pub fn say(&self, phrase: &str) {
        self.stage(phrase);
        self.speak();
    }

    /// Flush the staged phrases as one sentence.
    pub fn speak(&self) {
        self.flush(false);
    }

    /// Flush with the station call-up, even with nothing staged.
    pub fn speak_full(&self) {
        self.flush(true);
    }

    fn flush(&self, full: bool) {
        let sentence = {
            let mut state = self.state.lock().unwrap();
            let sentence = compose(&state, full);
            state.phrases.clear();
            sentence
        };
        if let Some(sentence) = sentence {
            if self.tx.send(sentence).is_err() {
                warn!("voice worker is gone");
            }
        }
    }

    /// The sentence the staged phrases would produce, without flushing.
    pub(crate) fn pending_sentence(&self, full: bool) -> Option<String> {
        compose(&self.state.lock().unwrap(), full)
    }
}

fn compose(state: &VoiceState, full: bool) -> Option<String> {
    if state.phrases.is_empty() && !full {
        return None;
    }
    let mut sentence = String::new();
    if full {
        sentence.push_str(&capitalize(&state.atc));
        sentence.push_str(", ");
    }
    if !state.phrases.is_empty() {
        sentence.push_str(&state.phrases.join(", "));
        sentence.push_str(", ");
    }
    sentence.push_str(&capitalize(&state.call_sign));
    sentence.push('.');
    Some(capitalize(&sentence))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn nothing_staged_means_nothing_spoken() {
        let voice = Voice::new("manching tower", "cityairbus1234", LogSpeaker);
        assert_eq!(voice.pending_sentence(false), None);
    }

    #[tokio::test]
    async fn staged_phrases_join_with_the_call_sign() {
        let voice = Voice::new("manching tower", "cityairbus1234", LogSpeaker);
        voice.stage("climb flight level 50");
        voice.stage("ready for departure");
        assert_eq!(
            voice.pending_sentence(false).as_deref(),
            Some(
                "Climb flight level 50, ready for departure, \
                 Cityairbus1234."
            )
        );
    }

    #[tokio::test]
    async fn full_readback_addresses_the_station() {
        let voice = Voice::new("manching tower", "cityairbus1234", LogSpeaker);
        assert_eq!(
            voice.pending_sentence(true).as_deref(),
            Some("Manching tower, Cityairbus1234.")
        );
        voice.set_atc("munich arrival");
        assert_eq!(
            voice.pending_sentence(true).as_deref(),
            Some("Munich arrival, Cityairbus1234.")
        );
    }

    #[tokio::test]
    async fn flush_clears_the_staged_phrases() {
        let speaker = CollectSpeaker::default();
        let utterances = speaker.utterances.clone();
        let voice = Voice::new("manching tower", "cityairbus1234", speaker);
        voice.say("say again");
        assert_eq!(voice.pending_sentence(false), None);
        for _ in 0..100 {
            if !utterances.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            utterances.lock().unwrap().as_slice(),
            ["Say again, Cityairbus1234."]
        );
    }
}
