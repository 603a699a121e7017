//! Canned Answers
//!
//! Deterministic responses for known inputs. When a question matches, the
//! backend is skipped and the stored answer is streamed line by line with a
//! fixed pause between chunks, through the same delivery and commit path as a
//! real generation.

use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::backend::ChunkStream;

/// Default pause between canned chunks
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(50);

const HELLO_WORLD_HTML: &str = "Here is a minimal HTML \"Hello, World!\" page:\n\
\n\
```html\n\
<!DOCTYPE html>\n\
<html lang=\"en\">\n\
<head>\n\
    <meta charset=\"UTF-8\">\n\
    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
    <title>Hello World</title>\n\
</head>\n\
<body>\n\
    <h1>Hello, World!</h1>\n\
</body>\n\
</html>\n\
```\n\
\n\
### What each part does\n\
1. `<!DOCTYPE html>`: declares an HTML5 document\n\
2. `<html lang=\"en\">`: the root element, with the page language\n\
3. `<head>`: document metadata\n\
4. `<meta charset=\"UTF-8\">`: character encoding\n\
5. `<meta name=\"viewport\">`: correct scaling on mobile devices\n\
6. `<title>`: the browser tab title\n\
7. `<body>`: the visible content\n\
8. `<h1>`: a top-level heading\n\
\n\
Save this as a `.html` file and open it in a browser to see the result.";

/// One canned answer and the keywords that trigger it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CannedAnswer {
    keywords: Vec<String>,
    answer: String,
}

impl CannedAnswer {
    /// Answer triggered when every keyword appears (case-insensitive)
    pub fn new<I, S>(keywords: I, answer: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
            answer: answer.into(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        !self.keywords.is_empty() && self.keywords.iter().all(|k| lowered.contains(k.as_str()))
    }

    /// The stored answer
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }
}

/// Lookup table of canned answers
#[derive(Clone, Debug)]
pub struct FallbackResponder {
    entries: Vec<CannedAnswer>,
    chunk_delay: Duration,
}

impl Default for FallbackResponder {
    fn default() -> Self {
        Self::builtin(DEFAULT_CHUNK_DELAY)
    }
}

impl FallbackResponder {
    /// Empty responder; nothing matches
    #[must_use]
    pub fn empty(chunk_delay: Duration) -> Self {
        Self {
            entries: Vec::new(),
            chunk_delay,
        }
    }

    /// Responder with the built-in answers
    #[must_use]
    pub fn builtin(chunk_delay: Duration) -> Self {
        Self::empty(chunk_delay).with_answer(CannedAnswer::new(
            ["html", "helloworld"],
            HELLO_WORLD_HTML,
        ))
    }

    /// Add an answer; earlier entries win on overlap
    #[must_use]
    pub fn with_answer(mut self, answer: CannedAnswer) -> Self {
        self.entries.push(answer);
        self
    }

    /// Pause between chunks
    #[must_use]
    pub fn chunk_delay(&self) -> Duration {
        self.chunk_delay
    }

    /// Canned answer for `question`, if any
    #[must_use]
    pub fn lookup(&self, question: &str) -> Option<&str> {
        let lowered = question.to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.matches(&lowered))
            .map(CannedAnswer::answer)
    }

    /// Stream `answer` as line chunks, pausing between them
    #[must_use]
    pub fn stream(&self, answer: &str) -> ChunkStream {
        let chunks = split_lines(answer);
        let delay = self.chunk_delay;

        stream::unfold(
            (chunks.into_iter(), true),
            move |(mut chunks, first)| async move {
                let chunk = chunks.next()?;
                if !first {
                    tokio::time::sleep(delay).await;
                }
                Some((Ok(chunk), (chunks, false)))
            },
        )
        .boxed()
    }
}

/// Split `text` after each newline, keeping the newline on its chunk
#[must_use]
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_split_lines_keeps_newlines() {
        assert_eq!(split_lines("a\nb\n\nc"), vec!["a\n", "b\n", "\n", "c"]);
        assert_eq!(split_lines("one line"), vec!["one line"]);
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("a\nb\n\nc").concat(), "a\nb\n\nc");
    }

    #[test]
    fn test_lookup_needs_every_keyword() {
        let responder = FallbackResponder::default();
        assert!(responder.lookup("Show me an HTML HelloWorld").is_some());
        assert!(responder.lookup("show me html").is_none());
        assert!(responder.lookup("helloworld in rust").is_none());
    }

    #[test]
    fn test_empty_responder_never_matches() {
        let responder = FallbackResponder::empty(DEFAULT_CHUNK_DELAY);
        assert!(responder.lookup("html helloworld").is_none());
    }

    #[test]
    fn test_custom_answer() {
        let responder = FallbackResponder::empty(DEFAULT_CHUNK_DELAY)
            .with_answer(CannedAnswer::new(["PING"], "pong"));
        assert_eq!(responder.lookup("ping?"), Some("pong"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_paces_chunks() {
        let responder = FallbackResponder::empty(Duration::from_millis(50));
        let start = Instant::now();

        let chunks: Vec<String> = responder
            .stream("one\ntwo\nthree")
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["one\n", "two\n", "three"]);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}
