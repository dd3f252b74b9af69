//! Backing file access.
//!
//! Two ways to write a calendar file: append new events in place, just
//! before the closing `END:VCALENDAR`, or rebuild the whole file.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{CalError, CalResult};
use crate::ics::CALENDAR_FOOTER;

const FOOTER_MARKER: &[u8] = b"END:VCALENDAR";

/// How much of the end of the file is searched for the footer.
const TAIL_WINDOW: u64 = 64 * 1024;

/// Read the whole file. A missing file is `None`.
pub fn read(path: &Path) -> CalResult<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Offset of the last `END:VCALENDAR` that starts a line.
fn find_footer(tail: &[u8], tail_start: u64) -> Option<u64> {
    let mut end = tail.len();
    while end >= FOOTER_MARKER.len() {
        let found = tail[..end]
            .windows(FOOTER_MARKER.len())
            .rposition(|window| window.eq_ignore_ascii_case(FOOTER_MARKER))?;
        let at_line_start = match found {
            0 => tail_start == 0,
            i => matches!(tail[i - 1], b'\n' | b'\r'),
        };
        if at_line_start {
            return Some(tail_start + found as u64);
        }
        end = found + FOOTER_MARKER.len() - 1;
    }
    None
}

/// Insert `chunk` before the calendar footer and rewrite the footer.
///
/// Everything before the old footer is left untouched.
pub fn append_events(path: &Path, chunk: &str) -> CalResult<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();

    let tail_start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(tail_start))?;
    let mut tail = Vec::with_capacity((len - tail_start) as usize);
    file.read_to_end(&mut tail)?;

    let offset = find_footer(&tail, tail_start).ok_or_else(|| {
        CalError::CorruptFile(format!("{}: no END:VCALENDAR line", path.display()))
    })?;

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(chunk.as_bytes())?;
    file.write_all(CALENDAR_FOOTER.as_bytes())?;
    let new_len = offset + chunk.len() as u64 + CALENDAR_FOOTER.len() as u64;
    file.set_len(new_len)?;
    file.sync_data()?;
    Ok(())
}

/// Replace the file with `contents` (written to a temporary file first).
pub fn rebuild(path: &Path, contents: &str) -> CalResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("ics.tmp");
    std::fs::write(&temp, contents)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EMPTY: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n";

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(read(&dir.path().join("none.ics")).unwrap().is_none());
    }

    #[test]
    fn test_append_is_byte_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ics");
        rebuild(&path, EMPTY).unwrap();

        append_events(&path, "BEGIN:VEVENT\r\nUID:1\r\nEND:VEVENT\r\n").unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            after,
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:1\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
        );
    }

    #[test]
    fn test_append_ignores_marker_inside_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ics");
        let content =
            "BEGIN:VCALENDAR\nX-NOTE:END:VCALENDAR\nEND:VCALENDAR\nX-NOTE:xEND:VCALENDAR\n";
        std::fs::write(&path, content).unwrap();

        append_events(&path, "UID:2\r\n").unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            after,
            "BEGIN:VCALENDAR\nX-NOTE:END:VCALENDAR\nUID:2\r\nEND:VCALENDAR\r\n"
        );
    }

    #[test]
    fn test_append_without_footer_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ics");
        std::fs::write(&path, "BEGIN:VCALENDAR\r\nVERSION:2.0\r\n").unwrap();
        assert!(matches!(
            append_events(&path, "UID:1\r\n"),
            Err(CalError::CorruptFile(_))
        ));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\n"
        );
    }

    #[test]
    fn test_rebuild_creates_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iCal").join("acc.ics");
        rebuild(&path, EMPTY).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), EMPTY);
        assert!(!path.with_extension("ics.tmp").exists());
    }
}
