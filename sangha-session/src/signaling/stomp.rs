use sangha_core::SessionError;

/// A single STOMP 1.2 frame as carried in one WebSocket text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn connect(host: &str, token: Option<&str>) -> Self {
        let frame = Self::new("CONNECT")
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", "0,0");
        match token {
            Some(token) => frame.with_header("Authorization", format!("Bearer {}", token)),
            None => frame,
        }
    }

    pub fn subscribe(destination: &str, id: &str) -> Self {
        Self::new("SUBSCRIBE")
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new("SEND")
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Self::new("DISCONNECT")
    }

    /// First value of `name`; STOMP gives the first occurrence precedence.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> String {
        let escape = self.uses_header_escaping();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let text = text.trim_start_matches(['\r', '\n']);
        let text = match text.find('\0') {
            Some(end) => &text[..end],
            None => text,
        };

        let (head, body) = split_head(text)
            .ok_or_else(|| SessionError::DecodeError("STOMP frame without header block".into()))?;

        let mut lines = head.lines();
        let command = lines
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SessionError::DecodeError("STOMP frame without command".into()))?
            .to_owned();

        let mut frame = Self::new(command);
        let escape = frame.uses_header_escaping();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(SessionError::DecodeError(format!(
                    "malformed STOMP header line: {}",
                    line
                )));
            };
            if escape {
                frame.headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                frame.headers.push((name.to_owned(), value.to_owned()));
            }
        }
        frame.body = body.to_owned();
        Ok(frame)
    }

    // CONNECT and CONNECTED frames carry their headers verbatim.
    fn uses_header_escaping(&self) -> bool {
        self.command != "CONNECT" && self.command != "CONNECTED"
    }
}

fn split_head(text: &str) -> Option<(&str, &str)> {
    if let Some(pos) = text.find("\r\n\r\n") {
        let lf = text.find("\n\n");
        if lf.is_none_or(|lf| pos < lf) {
            return Some((&text[..pos], &text[pos + 4..]));
        }
    }
    if let Some(pos) = text.find("\n\n") {
        return Some((&text[..pos], &text[pos + 2..]));
    }
    // A frame with headers but no body may end right after the last header.
    text.ends_with('\n').then_some((text, ""))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, SessionError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(SessionError::DecodeError(format!(
                    "invalid STOMP header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
