//! Renders `Envelope`s to SSE wire frames. A reconnecting subscriber resumes
//! from `Envelope::sse_event_name()`; the stream always ends with a
//! synthetic `[DONE]` frame so clients know to stop reading.

use webforge_types::Envelope;

/// One `event: <name>\ndata: <json>\n\n` frame.
pub fn render_frame(envelope: &Envelope) -> String {
    let data = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", envelope.sse_event_name(), data)
}

/// The terminal sentinel frame every SSE stream in this system ends with.
pub fn done_frame() -> &'static str {
    "data: [DONE]\n\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use webforge_types::Event;

    #[test]
    fn render_frame_uses_task_event_name_for_task_started() {
        let envelope = Envelope::new(
            "sess-1",
            Event::TaskStarted {
                task_id: "page-home".to_string(),
                title: "Generate Home".to_string(),
            },
        );
        let frame = render_frame(&envelope);
        assert!(frame.starts_with("event: task\n"));
        assert!(frame.contains("page-home"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn done_frame_is_the_sentinel() {
        assert_eq!(done_frame(), "data: [DONE]\n\n");
    }
}
