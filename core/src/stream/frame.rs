use crate::record::BroadcastMessage;

/// One `text/event-stream` frame: `data: <json>\n\n`.
pub fn encode_frame(msg: &BroadcastMessage) -> Result<String, serde_json::Error> {
    let json = msg.to_json()?;
    Ok(format!("data: {json}\n\n"))
}

/// Incremental decoder for the client side. Feed it response chunks as they
/// arrive; it yields the `data` payload of every complete event.
///
/// Comment lines (`:`) and fields other than `data` are ignored. Multiple
/// `data` lines in one event are joined with `\n`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_event_end(&self.buf) {
            let raw: Vec<u8> = self.buf.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&raw[..pos]);
            if let Some(data) = event_data(&text) {
                events.push(data);
            }
        }
        events
    }

    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
}

fn find_event_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn event_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in event.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data
}
