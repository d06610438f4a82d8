//! Chat output clean-up and streaming reconciliation.
//!
//! Raw model output may start with an echo of the prompt and may run on into
//! a hallucinated next turn. [`post_process`] removes both. When streaming,
//! [`StreamReconciler`] re-applies the same transform to the whole
//! accumulated buffer after every fragment and only emits the new suffix.

use super::TextStream;
use futures_util::StreamExt;

/// Markers that open a new conversation turn.
const TURN_MARKERS: [&str; 4] = ["\nuser:", "\nsystem:", "\nUser:", "\nSystem:"];

/// Strip an echoed prompt, cut at the first turn marker, then drop leading
/// newlines.
pub fn post_process(prompt: &str, generated: &str) -> String {
    let body = generated.strip_prefix(prompt).unwrap_or(generated);
    let cut = earliest_marker(body).unwrap_or(body.len());
    body[..cut].trim_start_matches('\n').to_owned()
}

fn earliest_marker(text: &str) -> Option<usize> {
    TURN_MARKERS.iter().filter_map(|m| text.find(m)).min()
}

/// Start of the longest suffix of `text` that could still grow into a turn
/// marker, or `text.len()` when there is none.
fn pending_marker_start(text: &str) -> usize {
    let mut start = text.len();
    for marker in TURN_MARKERS {
        for k in (1..marker.len()).rev() {
            if text.ends_with(&marker[..k]) {
                start = start.min(text.len() - k);
                break;
            }
        }
    }
    start
}

/// Turns raw fragments into post-processed increments.
///
/// Keeps two buffers: the raw text seen so far and the processed text already
/// emitted. Text that a later fragment could still remove (an unfinished echo
/// of the prompt, a partial turn marker) is held back until it is settled, so
/// every emission extends the previous ones and the concatenation of all
/// emissions equals [`post_process`] of the complete raw output.
#[derive(Debug)]
pub struct StreamReconciler {
    prompt: String,
    raw: String,
    emitted: String,
}

impl StreamReconciler {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            raw: String::new(),
            emitted: String::new(),
        }
    }

    /// Feed one raw fragment; returns the newly settled text, if any.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.raw.push_str(fragment);
        let settled = self.settled();
        self.emit(settled)
    }

    /// End of the raw stream: release everything still held back.
    pub fn finish(&mut self) -> Option<String> {
        let processed = post_process(&self.prompt, &self.raw);
        self.emit(processed)
    }

    /// Everything emitted so far.
    pub fn emitted(&self) -> &str {
        &self.emitted
    }

    fn settled(&self) -> String {
        let raw = self.raw.as_str();
        // Cannot tell yet whether the model is echoing the prompt.
        if raw.len() < self.prompt.len() && self.prompt.starts_with(raw) {
            return String::new();
        }
        let body = raw.strip_prefix(self.prompt.as_str()).unwrap_or(raw);
        let cut = earliest_marker(body).unwrap_or_else(|| pending_marker_start(body));
        body[..cut].trim_start_matches('\n').to_owned()
    }

    fn emit(&mut self, processed: String) -> Option<String> {
        if processed.len() <= self.emitted.len() || !processed.starts_with(&self.emitted) {
            return None;
        }
        let delta = processed[self.emitted.len()..].to_owned();
        self.emitted = processed;
        Some(delta)
    }
}

/// Wrap a raw fragment stream so it yields post-processed increments.
///
/// The first backend failure is forwarded and ends the stream.
pub fn reconcile(prompt: String, raw: TextStream) -> TextStream {
    let stream = async_stream::stream! {
        let mut raw = raw;
        let mut reconciler = StreamReconciler::new(prompt);
        while let Some(fragment) = raw.next().await {
            match fragment {
                Ok(fragment) => {
                    if let Some(delta) = reconciler.push(&fragment) {
                        yield Ok(delta);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Some(delta) = reconciler.finish() {
            yield Ok(delta);
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::GatewayError;
    use crate::llm::collect_stream;

    const PROMPT: &str = "system: Be brief.\nuser: hi\nassistant:";

    fn reconcile_fragments(prompt: &str, fragments: &[&str]) -> Vec<String> {
        let mut reconciler = StreamReconciler::new(prompt);
        let mut out: Vec<String> = fragments
            .iter()
            .filter_map(|f| reconciler.push(f))
            .collect();
        out.extend(reconciler.finish());
        out
    }

    #[test]
    fn strips_echoed_prompt() {
        let raw = format!("{PROMPT} Hello there.");
        assert_eq!(post_process(PROMPT, &raw), " Hello there.");
    }

    #[test]
    fn cuts_at_earliest_turn_marker() {
        let raw = "Sure.\nSystem: reset\nuser: again";
        assert_eq!(post_process(PROMPT, raw), "Sure.");
    }

    #[test]
    fn strips_leading_newlines_after_cut() {
        assert_eq!(post_process(PROMPT, "\n\nHi!\nUser: more"), "Hi!");
    }

    #[test]
    fn echo_then_new_turn_leaves_only_the_answer() {
        let raw = format!("{PROMPT}\nGood, thanks.\nuser: and you?");
        let processed = post_process(PROMPT, &raw);
        assert_eq!(processed, "Good, thanks.");
        assert!(!processed.contains("user:"));
    }

    #[test]
    fn text_without_echo_or_marker_is_unchanged() {
        assert_eq!(post_process(PROMPT, "plain answer"), "plain answer");
    }

    #[test]
    fn pending_marker_start_finds_partial_markers() {
        assert_eq!(pending_marker_start("abc\nus"), 3);
        assert_eq!(pending_marker_start("abc\n"), 3);
        assert_eq!(pending_marker_start("abc\nSy"), 3);
        assert_eq!(pending_marker_start("abc"), 3);
        assert_eq!(pending_marker_start("abc\nuser"), 3);
        assert_eq!(pending_marker_start("abc\nx"), 5);
    }

    #[test]
    fn reconciler_emits_increments_for_delta_fragments() {
        let out = reconcile_fragments(PROMPT, &["Hel", "lo", " world"]);
        assert_eq!(out.concat(), "Hello world");
        assert_eq!(out[0], "Hel");
    }

    #[test]
    fn reconciler_holds_back_unsettled_echo() {
        let mut reconciler = StreamReconciler::new(PROMPT);
        assert_eq!(reconciler.push("system: Be"), None);
        assert_eq!(reconciler.push(" brief.\nuser: hi\nassistant:"), None);
        assert_eq!(reconciler.push(" Yo"), Some(" Yo".to_owned()));
        assert_eq!(reconciler.finish(), None);
        assert_eq!(reconciler.emitted(), " Yo");
    }

    #[test]
    fn reconciler_never_emits_text_a_marker_later_removes() {
        let out = reconcile_fragments(PROMPT, &["Done.", "\n", "us", "er: next turn"]);
        assert_eq!(out, vec!["Done.".to_owned()]);
    }

    #[test]
    fn reconciler_releases_held_tail_at_end() {
        let out = reconcile_fragments(PROMPT, &["Line one", "\nUs"]);
        assert_eq!(out.concat(), "Line one\nUs");
    }

    #[test]
    fn reconciled_concat_matches_post_process_for_every_split() {
        let samples = [
            format!("{PROMPT}\nGood, thanks.\nuser: and you?"),
            "\n\nAnswer with\nnewlines\nSystem: injected".to_owned(),
            "system: Be brief.\nuser: bye".to_owned(),
            "héllo wörld\nUs".to_owned(),
            String::new(),
        ];
        for raw in &samples {
            let expected = post_process(PROMPT, raw);
            let boundaries: Vec<usize> = (0..=raw.len()).filter(|&i| raw.is_char_boundary(i)).collect();
            for &a in &boundaries {
                for &b in boundaries.iter().filter(|&&b| b >= a) {
                    let out = reconcile_fragments(PROMPT, &[&raw[..a], &raw[a..b], &raw[b..]]);
                    assert_eq!(out.concat(), expected, "raw={raw:?} split=({a},{b})");
                }
            }
        }
    }

    #[test]
    fn char_by_char_stream_matches_post_process() {
        let raw = format!("{PROMPT} Fine.\nuser: hi again");
        let chars: Vec<String> = raw.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(reconcile_fragments(PROMPT, &refs).concat(), " Fine.");
    }

    #[tokio::test]
    async fn reconcile_stream_forwards_backend_failure() {
        let raw: TextStream = Box::pin(futures_util::stream::iter(vec![
            Ok("partial".to_owned()),
            Err(GatewayError::backend("RuntimeError", "device lost")),
        ]));
        let mut stream = reconcile(PROMPT.to_owned(), raw);
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn reconcile_stream_concat_matches_post_process() {
        let raw_text = format!("{PROMPT} All good.\nSystem: nope");
        let pieces: Vec<Result<String, GatewayError>> = raw_text
            .as_bytes()
            .chunks(5)
            .map(|c| Ok(String::from_utf8(c.to_vec()).unwrap()))
            .collect();
        let raw: TextStream = Box::pin(futures_util::stream::iter(pieces));
        let text = collect_stream(reconcile(PROMPT.to_owned(), raw)).await.unwrap();
        assert_eq!(text, post_process(PROMPT, &raw_text));
    }
}
