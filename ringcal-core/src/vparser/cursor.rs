//! Byte cursor shared by the parser state machines.

/// A window over the input: `[previous, current, next, next + 1]`.
///
/// Bytes outside of the input read as `0`; use [`Cursor::at_end`] to tell a
/// real NUL from the end of the stream.
pub type Window = [u8; 4];

/// Walks the raw input and accumulates the bytes of the token being parsed.
///
/// The machines never index the input directly. They look at the window and
/// either `push` bytes into the token buffer or `skip` them, which is how
/// line folds and escape characters disappear from the parsed values.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
    buffer: Vec<u8>,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor {
            data,
            position: 0,
            buffer: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn at_end(&self) -> bool {
        self.position >= self.data.len()
    }

    fn byte(&self, index: Option<usize>) -> u8 {
        index
            .and_then(|i| self.data.get(i).copied())
            .unwrap_or(0)
    }

    pub fn window(&self) -> Window {
        let p = self.position;
        [
            self.byte(p.checked_sub(1)),
            self.byte(Some(p)),
            self.byte(Some(p + 1)),
            self.byte(Some(p + 2)),
        ]
    }

    /// Copy `count` bytes into the token buffer.
    pub fn push(&mut self, count: usize) {
        let end = (self.position + count).min(self.data.len());
        self.buffer.extend_from_slice(&self.data[self.position..end]);
        self.position = end;
    }

    /// Drop `count` bytes.
    pub fn skip(&mut self, count: usize) {
        self.position = (self.position + count).min(self.data.len());
    }

    /// Take the current token.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Forget the current token and move to the start of the next logical
    /// line (folded continuation lines are part of the current one).
    pub fn skip_line(&mut self) {
        self.buffer.clear();
        while !self.at_end() {
            let [_, current, next, after] = self.window();
            match line_break(current, next, after) {
                LineBreak::Fold(width) => self.skip(width),
                LineBreak::End(width) => {
                    self.skip(width);
                    return;
                }
                LineBreak::None => self.skip(1),
            }
        }
    }
}

/// How the bytes at the cursor terminate (or continue) a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineBreak {
    /// Not a line break.
    None,
    /// A line break followed by a space or tab: the logical line continues.
    /// Carries the number of bytes to drop, whitespace included.
    Fold(usize),
    /// The logical line ends. Carries the size of the line terminator.
    End(usize),
}

fn is_fold_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Classify the line break starting at `current`.
///
/// Handles CRLF, LF and lone CR terminators.
pub(crate) fn line_break(current: u8, next: u8, after: u8) -> LineBreak {
    match (current, next) {
        (b'\r', b'\n') if is_fold_space(after) => LineBreak::Fold(3),
        (b'\r', b'\n') => LineBreak::End(2),
        (b'\n', n) | (b'\r', n) if is_fold_space(n) => LineBreak::Fold(2),
        (b'\n', _) | (b'\r', _) => LineBreak::End(1),
        _ => LineBreak::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_pads_outside_input() {
        let mut cursor = Cursor::new(b"AB");
        assert_eq!(cursor.window(), [0, b'A', b'B', 0]);
        cursor.skip(1);
        assert_eq!(cursor.window(), [b'A', b'B', 0, 0]);
        cursor.skip(5);
        assert!(cursor.at_end());
    }

    #[test]
    fn test_push_and_skip_build_token() {
        let mut cursor = Cursor::new(b"A\\BC");
        cursor.push(1);
        cursor.skip(1);
        cursor.push(2);
        assert_eq!(cursor.flush(), b"ABC".to_vec());
        assert!(cursor.flush().is_empty());
    }

    #[test]
    fn test_line_break_variants() {
        assert_eq!(line_break(b'\r', b'\n', b' '), LineBreak::Fold(3));
        assert_eq!(line_break(b'\r', b'\n', b'X'), LineBreak::End(2));
        assert_eq!(line_break(b'\n', b'\t', b'X'), LineBreak::Fold(2));
        assert_eq!(line_break(b'\n', b'X', 0), LineBreak::End(1));
        assert_eq!(line_break(b'\r', b'X', 0), LineBreak::End(1));
        assert_eq!(line_break(b'X', b'\n', 0), LineBreak::None);
    }

    #[test]
    fn test_skip_line_follows_folds() {
        let mut cursor = Cursor::new(b"BROKEN;\r\n  still\r\nNEXT:1");
        cursor.push(3);
        cursor.skip_line();
        assert_eq!(cursor.window()[1], b'N');
        assert!(cursor.flush().is_empty());
    }
}
