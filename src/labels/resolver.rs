//! Ways of naming a label the catalog has never seen.

use crate::collector::types::RawLabel;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;
use tracing::warn;

/// Supplies a class name for an unknown raw label.
///
/// `None` (or an empty name) means the raw label's string form is used.
pub trait LabelResolver: Send + Sync {
    fn ask(&self, raw: &RawLabel) -> Option<String>;
}

/// Never asks; every new label is named after itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoResolver;

impl LabelResolver for AutoResolver {
    fn ask(&self, _raw: &RawLabel) -> Option<String> {
        None
    }
}

/// Asks on a terminal: the question goes to `output`, the answer is one line of `input`.
pub struct PromptResolver<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> PromptResolver<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }
}

impl PromptResolver<BufReader<std::io::Stdin>, std::io::Stderr> {
    /// Prompt on stderr, read from stdin.
    pub fn terminal() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<R, W> LabelResolver for PromptResolver<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn ask(&self, raw: &RawLabel) -> Option<String> {
        let mut guard = self.io.lock().unwrap_or_else(|e| e.into_inner());
        let (input, output) = &mut *guard;

        if let Err(e) = write!(output, "Class name for new label {raw} (empty keeps {raw}): ")
            .and_then(|_| output.flush())
        {
            warn!(error = %e, "could not write label prompt");
            return None;
        }

        let mut answer = String::new();
        match input.read_line(&mut answer) {
            Ok(_) => Some(answer.trim().to_string()).filter(|a| !a.is_empty()),
            Err(e) => {
                warn!(error = %e, "could not read label answer");
                None
            }
        }
    }
}

/// A pending question for the thread that owns the [`ChannelResolver`]'s receiver.
#[derive(Debug)]
pub struct LabelRequest {
    pub raw: RawLabel,
    reply: Sender<Option<String>>,
}

impl LabelRequest {
    /// Answer the question. The asking side is unblocked either way.
    pub fn answer(self, class_name: Option<String>) {
        // The asker may have gone away; nothing to do then
        let _ = self.reply.send(class_name);
    }
}

/// Forwards questions to another thread and blocks until it answers.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    requests: Sender<LabelRequest>,
}

impl ChannelResolver {
    /// Build the resolver and the receiving end the owning thread serves.
    pub fn channel() -> (Self, Receiver<LabelRequest>) {
        let (requests, receiver) = crossbeam_channel::unbounded();
        (Self { requests }, receiver)
    }
}

impl LabelResolver for ChannelResolver {
    fn ask(&self, raw: &RawLabel) -> Option<String> {
        let (reply, answer) = bounded(1);
        let request = LabelRequest {
            raw: raw.clone(),
            reply,
        };
        if self.requests.send(request).is_err() {
            warn!(label = %raw, "label resolver thread is gone");
            return None;
        }
        answer.recv().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_auto_resolver_never_names() {
        assert_eq!(AutoResolver.ask(&RawLabel::Int(3)), None);
    }

    #[test]
    fn test_prompt_resolver_reads_one_line() {
        let resolver = PromptResolver::new(Cursor::new("espresso\n\n"), Vec::new());
        assert_eq!(resolver.ask(&RawLabel::Int(1)), Some("espresso".into()));
        assert_eq!(resolver.ask(&RawLabel::Int(2)), None);

        let guard = resolver.io.lock().unwrap();
        let prompt = String::from_utf8(guard.1.clone()).unwrap();
        assert!(prompt.contains("new label 1"));
    }

    #[test]
    fn test_channel_resolver_round_trip() {
        let (resolver, requests) = ChannelResolver::channel();
        let server = std::thread::spawn(move || {
            let request = requests.recv().unwrap();
            let name = format!("class-{}", request.raw);
            request.answer(Some(name));
        });

        assert_eq!(resolver.ask(&RawLabel::Int(9)), Some("class-9".into()));
        server.join().unwrap();
    }

    #[test]
    fn test_channel_resolver_without_server() {
        let (resolver, requests) = ChannelResolver::channel();
        drop(requests);
        assert_eq!(resolver.ask(&RawLabel::Int(9)), None);
    }
}
