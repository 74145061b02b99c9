//! XML envelopes exchanged on the callback URL.

use std::fmt;

use serde::Deserialize;

/// Errors raised while reading an envelope.
#[derive(Debug)]
pub enum EnvelopeError {
    Utf8(std::str::Utf8Error),
    Markup(quick_xml::DeError),
    MissingField(&'static str),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8(e) => write!(f, "envelope is not valid UTF-8: {e}"),
            Self::Markup(e) => write!(f, "malformed envelope: {e}"),
            Self::MissingField(name) => write!(f, "envelope is missing <{name}>"),
        }
    }
}

impl std::error::Error for EnvelopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Utf8(e) => Some(e),
            Self::Markup(e) => Some(e),
            Self::MissingField(_) => None,
        }
    }
}

/// A decrypted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to_user: String,
    pub from_user: String,
    pub msg_type: String,
    /// Empty when the message carries no `<Content>`.
    pub content: String,
}

impl Envelope {
    pub fn is_text(&self) -> bool {
        self.msg_type == "text"
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "ToUserName")]
    to_user: Option<String>,
    #[serde(rename = "FromUserName")]
    from_user: Option<String>,
    #[serde(rename = "MsgType")]
    msg_type: Option<String>,
    #[serde(rename = "Content")]
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawEncrypted {
    #[serde(rename = "Encrypt")]
    encrypt: Option<String>,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, EnvelopeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EnvelopeError::MissingField(name)),
    }
}

/// Parses a decrypted message envelope.
pub fn parse(xml: &[u8]) -> Result<Envelope, EnvelopeError> {
    let text = std::str::from_utf8(xml).map_err(EnvelopeError::Utf8)?;
    let raw: RawEnvelope = quick_xml::de::from_str(text).map_err(EnvelopeError::Markup)?;

    Ok(Envelope {
        to_user: required(raw.to_user, "ToUserName")?,
        from_user: required(raw.from_user, "FromUserName")?,
        msg_type: required(raw.msg_type, "MsgType")?,
        content: raw.content.unwrap_or_default(),
    })
}

/// Extracts the base64 `<Encrypt>` payload from a POST body.
pub fn encrypted_payload(xml: &[u8]) -> Result<String, EnvelopeError> {
    let text = std::str::from_utf8(xml).map_err(EnvelopeError::Utf8)?;
    let raw: RawEncrypted = quick_xml::de::from_str(text).map_err(EnvelopeError::Markup)?;
    required(raw.encrypt, "Encrypt").map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_MESSAGE: &str = r#"<xml>
        <ToUserName><![CDATA[ww1234567890]]></ToUserName>
        <FromUserName><![CDATA[JiYuan]]></FromUserName>
        <CreateTime>1348831860</CreateTime>
        <MsgType><![CDATA[text]]></MsgType>
        <Content><![CDATA[今天有什么课]]></Content>
        <MsgId>1234567890123456</MsgId>
        <AgentID>1000002</AgentID>
    </xml>"#;

    #[test]
    fn test_parse_text_message() {
        let env = parse(TEXT_MESSAGE.as_bytes()).unwrap();
        assert_eq!(env.to_user, "ww1234567890");
        assert_eq!(env.from_user, "JiYuan");
        assert_eq!(env.msg_type, "text");
        assert_eq!(env.content, "今天有什么课");
        assert!(env.is_text());
    }

    #[test]
    fn test_missing_content_is_empty() {
        let xml = "<xml><ToUserName>corp</ToUserName><FromUserName>u</FromUserName>\
                   <MsgType>event</MsgType><Event>enter_agent</Event></xml>";
        let env = parse(xml.as_bytes()).unwrap();
        assert_eq!(env.content, "");
        assert!(!env.is_text());
    }

    #[test]
    fn test_missing_mandatory_field() {
        let xml = "<xml><ToUserName>corp</ToUserName><MsgType>text</MsgType></xml>";
        assert!(matches!(
            parse(xml.as_bytes()),
            Err(EnvelopeError::MissingField("FromUserName"))
        ));
    }

    #[test]
    fn test_unparsable_markup() {
        assert!(matches!(
            parse(b"<xml><ToUserName>corp</FromUserName>"),
            Err(EnvelopeError::Markup(_))
        ));
        assert!(matches!(parse(&[0xff, 0xfe]), Err(EnvelopeError::Utf8(_))));
    }

    #[test]
    fn test_encrypted_payload() {
        let xml = "<xml><ToUserName><![CDATA[corp]]></ToUserName>\
                   <Encrypt><![CDATA[ abc+/== ]]></Encrypt><AgentID><![CDATA[1000002]]></AgentID></xml>";
        assert_eq!(encrypted_payload(xml.as_bytes()).unwrap(), "abc+/==");

        let missing = "<xml><ToUserName>corp</ToUserName></xml>";
        assert!(matches!(
            encrypted_payload(missing.as_bytes()),
            Err(EnvelopeError::MissingField("Encrypt"))
        ));
    }
}
