/// Bounded capture of a subprocess's combined stdout/stderr.
///
/// Keeps only the newest `cap` characters so a chatty child cannot grow
/// memory without bound. Trimming drops whole leading characters, never
/// splitting a UTF-8 sequence.
#[derive(Debug)]
pub struct OutputRing {
    cap: usize,
    buf: String,
}

impl OutputRing {
    pub fn new(cap: usize) -> Self {
        Self { cap, buf: String::new() }
    }

    /// Append one line of output, restoring the newline the reader stripped.
    pub fn push_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
        self.trim_front();
    }

    pub fn contents(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn trim_front(&mut self) {
        let total = self.buf.chars().count();
        if total <= self.cap {
            return;
        }
        let excess = total - self.cap;
        let cut = self
            .buf
            .char_indices()
            .nth(excess)
            .map(|(idx, _)| idx)
            .unwrap_or(self.buf.len());
        self.buf.drain(..cut);
    }
}
