//! Incremental server-sent events decoding.

/// Splits a byte stream into SSE events and yields their `data` payloads.
///
/// Bytes may arrive in arbitrary pieces; events are only emitted once their
/// terminating blank line has been seen. Both `\n\n` and `\r\n\r\n`
/// delimiters are accepted.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet part of a complete event.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed bytes and return the data payload of every completed event.
    ///
    /// Events without a `data:` field are skipped. Invalid UTF-8 inside an
    /// event is replaced rather than rejected.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(event) = self.drain_next_event() {
            if let Some(data) = extract_data(&String::from_utf8_lossy(&event)) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        extract_data(&String::from_utf8_lossy(&rest))
    }

    fn drain_next_event(&mut self) -> Option<Vec<u8>> {
        let (pos, delim_len) = find_event_boundary(&self.buffer)?;
        let event = self.buffer[..pos].to_vec();
        self.buffer.drain(..pos + delim_len);
        Some(event)
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

/// Join the `data:` lines of one event. Multiple lines are joined with `\n`.
fn extract_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);

        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }

    data
}
