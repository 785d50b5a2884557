// In-place console status line
// Rewrites a single stdout line with carriage returns so long-running copies
// can report progress without scrolling.

use std::io::Write;

/// Single-line status printer. Remembers the length of the previous message
/// so shorter updates blank out the leftovers.
#[derive(Debug, Default)]
pub struct StatusLine {
    last_len: usize,
}

impl StatusLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the current console line with `message`.
    pub fn update(&mut self, message: &str) {
        let mut line = message.to_string();
        if line.len() < self.last_len {
            line.push_str(&" ".repeat(self.last_len - line.len()));
        }

        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{}\r", line);
        let _ = stdout.flush();

        self.last_len = message.len();
    }

    /// Ends the status line, moving the cursor to the next line.
    pub fn finish(&mut self) {
        if self.last_len > 0 {
            println!();
            self.last_len = 0;
        }
    }
}
