//! Keyword dispatcher: the first registered keyword found in the text wins.

use tracing::debug;

use crate::channel::Envelope;

/// What a handler sees of an inbound message.
pub struct Request<'a> {
    pub envelope: &'a Envelope,
    /// Every registered keyword, in registration order.
    pub keywords: &'a [String],
}

pub type Handler = Box<dyn Fn(&Request<'_>) -> Option<String> + Send + Sync>;

/// Ordered keyword registry, built once at startup.
#[derive(Default)]
pub struct Dispatcher {
    keywords: Vec<String>,
    handlers: Vec<Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a keyword. Registering a keyword again replaces its handler but
    /// keeps its original position.
    pub fn register<F>(mut self, keyword: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request<'_>) -> Option<String> + Send + Sync + 'static,
    {
        let keyword = keyword.into();
        match self.keywords.iter().position(|k| *k == keyword) {
            Some(i) => self.handlers[i] = Box::new(handler),
            None => {
                self.keywords.push(keyword);
                self.handlers.push(Box::new(handler));
            }
        }
        self
    }

    #[cfg(test)]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Runs the handler of the first keyword occurring anywhere in `text`.
    /// Returns `None` when nothing matches or the handler has nothing to say.
    pub fn dispatch(&self, text: &str, envelope: &Envelope) -> Option<String> {
        let (keyword, handler) = self
            .keywords
            .iter()
            .zip(&self.handlers)
            .find(|(k, _)| text.contains(k.as_str()))?;

        debug!("Keyword '{}' matched message from {}", keyword, envelope.from_user);
        handler(&Request {
            envelope,
            keywords: &self.keywords,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(content: &str) -> Envelope {
        Envelope {
            to_user: "corp".into(),
            from_user: "alice".into(),
            msg_type: "text".into(),
            content: content.into(),
        }
    }

    fn dispatch(d: &Dispatcher, text: &str) -> Option<String> {
        d.dispatch(text, &envelope(text))
    }

    #[test]
    fn test_first_registered_keyword_wins() {
        let d = Dispatcher::new()
            .register("A", |_| Some("handler A".into()))
            .register("B", |_| Some("handler B".into()));

        assert_eq!(dispatch(&d, "xx B yy A"), Some("handler A".into()));
        assert_eq!(dispatch(&d, "only B"), Some("handler B".into()));
    }

    #[test]
    fn test_no_match_is_silent() {
        let d = Dispatcher::new().register("今天", |_| Some("today".into()));
        assert_eq!(dispatch(&d, "明天呢"), None);
        assert_eq!(dispatch(&d, ""), None);
    }

    #[test]
    fn test_substring_match_anywhere() {
        // known false positive: any text containing the keyword triggers it
        let d = Dispatcher::new().register("今天", |_| Some("today".into()));
        assert_eq!(dispatch(&d, "我今天不想上课"), Some("today".into()));
    }

    #[test]
    fn test_handler_may_decline() {
        let d = Dispatcher::new()
            .register("A", |_| None)
            .register("AB", |_| Some("never reached".into()));
        // first match wins even when its handler declines
        assert_eq!(dispatch(&d, "AB"), None);
    }

    #[test]
    fn test_reregister_keeps_position() {
        let d = Dispatcher::new()
            .register("A", |_| Some("old".into()))
            .register("B", |_| Some("b".into()))
            .register("A", |_| Some("new".into()));

        assert_eq!(d.keywords(), ["A".to_string(), "B".to_string()]);
        assert_eq!(dispatch(&d, "A B"), Some("new".into()));
    }

    #[test]
    fn test_request_carries_envelope_and_keywords() {
        let d = Dispatcher::new()
            .register("hi", |req| Some(format!("{} {}", req.envelope.from_user, req.keywords.len())))
            .register("x", |_| None);
        assert_eq!(dispatch(&d, "hi"), Some("alice 2".into()));
    }
}
