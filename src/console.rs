use crate::record::RecordStatus;
use crate::worker::WorkerEvent;

/// Turns worker events into terminal text for the most recent request.
#[derive(Debug, Default)]
pub struct Console {
    current: Option<u64>,
    in_flight: bool,
    /// Output so far did not end with a newline.
    mid_line: bool,
}

impl Console {
    /// Follows `request` from now on; events of older requests are dropped.
    pub fn begin(&mut self, request: u64) {
        self.current = Some(request);
        self.in_flight = true;
    }

    /// True when the followed request reached a terminal record.
    pub fn is_idle(&self) -> bool {
        !self.in_flight
    }

    pub fn render(&mut self, event: &WorkerEvent) -> Option<String> {
        if Some(event.request()) != self.current {
            return None;
        }

        match event {
            WorkerEvent::Stopped { .. } => Some(self.line("[system] generation stopped.")),
            WorkerEvent::Output { record, .. } => match record.status {
                RecordStatus::Pending => {
                    if record.content.is_empty() {
                        return None;
                    }
                    self.mid_line = !record.content.ends_with('\n');
                    Some(record.content.clone())
                }
                RecordStatus::Done => {
                    self.in_flight = false;
                    let mut text = record.content.clone();
                    if !text.is_empty() || self.mid_line {
                        text.push('\n');
                    }
                    self.mid_line = false;
                    Some(text)
                }
                RecordStatus::Error => {
                    self.in_flight = false;
                    Some(self.line(&format!("[error] {}", record.content)))
                }
                RecordStatus::Stopped => {
                    self.in_flight = false;
                    Some(self.line(&format!("[stopped] {}", record.content)))
                }
            },
        }
    }

    /// `text` on a line of its own.
    fn line(&mut self, text: &str) -> String {
        let prefix = if self.mid_line { "\n" } else { "" };
        self.mid_line = false;
        format!("{prefix}{text}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Failure, OutputRecord};

    fn output(request: u64, record: OutputRecord) -> WorkerEvent {
        WorkerEvent::Output { request, record }
    }

    #[test]
    fn test_streamed_tokens_then_done() {
        let mut console = Console::default();
        console.begin(1);
        assert!(!console.is_idle());

        assert_eq!(
            console.render(&output(1, OutputRecord::pending("Hel"))),
            Some("Hel".to_string())
        );
        assert_eq!(
            console.render(&output(1, OutputRecord::pending("lo"))),
            Some("lo".to_string())
        );
        assert_eq!(
            console.render(&output(1, OutputRecord::done(""))),
            Some("\n".to_string())
        );
        assert!(console.is_idle());
    }

    #[test]
    fn test_empty_pending_is_skipped() {
        let mut console = Console::default();
        console.begin(1);
        assert_eq!(console.render(&output(1, OutputRecord::pending(""))), None);
    }

    #[test]
    fn test_error_starts_on_new_line() {
        let mut console = Console::default();
        console.begin(3);
        console.render(&output(3, OutputRecord::pending("partial")));

        let text = console
            .render(&output(3, Failure::Api("Insufficient Balance".to_string()).into()))
            .unwrap();
        assert_eq!(text, "\n[error] Insufficient Balance\n");
        assert!(console.is_idle());
    }

    #[test]
    fn test_stop_renders_record_and_notification() {
        let mut console = Console::default();
        console.begin(2);

        let stopped = console
            .render(&output(2, Failure::UserStopped.into()))
            .unwrap();
        assert_eq!(stopped, "[stopped] Generation stopped by user.\n");

        let notice = console.render(&WorkerEvent::Stopped { request: 2 }).unwrap();
        assert_eq!(notice, "[system] generation stopped.\n");
    }

    #[test]
    fn test_older_requests_are_not_rendered() {
        let mut console = Console::default();
        console.begin(1);
        console.begin(2);

        assert_eq!(console.render(&output(1, OutputRecord::pending("old"))), None);
        assert_eq!(
            console.render(&output(2, OutputRecord::pending("new"))),
            Some("new".to_string())
        );
    }

    #[test]
    fn test_nothing_rendered_before_first_request() {
        let mut console = Console::default();
        assert!(console.is_idle());
        assert_eq!(console.render(&output(1, OutputRecord::pending("x"))), None);
    }
}
