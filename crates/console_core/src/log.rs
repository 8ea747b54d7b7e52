//! Human-auditable command log.
//!
//! Every command exchange is appended as a timestamped line; transform sends
//! additionally record the matrix rounded to two decimals. Sinks implement
//! [`CommandLog`]; the session never knows whether lines go to a file, a
//! terminal, or a test buffer.

use geometry::RigidTransform;
use shared::domain::{CommandId, Peer};

pub trait CommandLog: Send {
    /// Begins a new session block in the log.
    fn session_banner(&mut self, title: &str);

    /// Records an outbound exchange, timestamped with the command identifier.
    fn sent(&mut self, id: &CommandId, event: &str, peer: Peer);

    /// Records an inbound or locally observed event verbatim.
    fn note(&mut self, line: &str);

    /// Records a transform matrix under the preceding entry.
    fn matrix(&mut self, matrix: &RigidTransform);
}

/// The canonical `HH:MM:SS:ffffff -- <event> to <peer>` line format.
pub fn sent_line(id: &CommandId, event: &str, peer: Peer) -> String {
    format!("{} -- {} to {}", id.log_timestamp(), event, peer.as_str())
}

/// One matrix row per line, values rounded to two decimals.
pub fn matrix_lines(matrix: &RigidTransform) -> Vec<String> {
    matrix
        .rows()
        .iter()
        .map(|row| {
            format!(
                "[{:.2}, {:.2}, {:.2}, {:.2}]",
                row[0], row[1], row[2], row[3]
            )
        })
        .collect()
}

/// In-memory sink, used by tests and as a rolling tail for operator review.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Vec<String>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl CommandLog for MemoryLog {
    fn session_banner(&mut self, title: &str) {
        self.lines.push(format!("----- {title} -----"));
    }

    fn sent(&mut self, id: &CommandId, event: &str, peer: Peer) {
        self.lines.push(sent_line(id, event, peer));
    }

    fn note(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn matrix(&mut self, matrix: &RigidTransform) {
        self.lines.extend(matrix_lines(matrix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::CommandPrefix;

    #[test]
    fn sent_line_uses_command_id_timestamp() {
        let id = CommandId::parse("CMD_140359000007").unwrap();
        let line = sent_line(&id, "Sending STRING( CMD_140359000007, START_UP )", Peer::Robot);
        assert_eq!(
            line,
            "14:03:59:000007 -- Sending STRING( CMD_140359000007, START_UP ) to ROBOT"
        );
    }

    #[test]
    fn matrix_lines_round_to_two_decimals() {
        let mut m = RigidTransform::identity();
        m.set_translation([1.23456, -2.0, 0.005]);
        let lines = matrix_lines(&m);
        assert_eq!(lines[0], "[1.00, 0.00, 0.00, 1.23]");
        assert_eq!(lines[2], "[0.00, 0.00, 1.00, 0.01]");
        assert_eq!(lines[3], "[0.00, 0.00, 0.00, 1.00]");
    }

    #[test]
    fn memory_log_appends_in_order() {
        let mut log = MemoryLog::new();
        log.session_banner("session");
        let id = CommandId::now(CommandPrefix::Cmd);
        log.sent(&id, "Sending STRING( x, STOP )", Peer::Robot);
        log.note("Received ACK message from Robot");
        assert_eq!(log.lines().len(), 3);
        assert!(log.lines()[0].starts_with("-----"));
    }
}
