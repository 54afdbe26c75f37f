//! Print job
//!
//! Loads a G-code file into an ordered sequence of command lines and tracks
//! how far the device has acknowledged them. Comments (everything after a
//! `;`) and blank lines never reach the queue.

use printkit_core::Result;
use std::fs;
use std::path::Path;

/// An in-progress print job
#[derive(Debug, Clone)]
pub struct PrintJob {
    file_name: String,
    commands: Vec<String>,
    acked: usize,
}

impl PrintJob {
    /// Load a job from a G-code file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_lines(file_name, content.lines()))
    }

    /// Build a job from pre-read command lines
    pub fn from_lines<'a>(
        file_name: impl Into<String>,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let commands = lines
            .into_iter()
            .filter_map(|line| {
                let code = line
                    .split_once(';')
                    .map(|(before, _comment)| before)
                    .unwrap_or(line)
                    .trim();
                if code.is_empty() {
                    None
                } else {
                    Some(code.to_string())
                }
            })
            .collect();

        Self {
            file_name: file_name.into(),
            commands,
            acked: 0,
        }
    }

    /// Name of the file this job was loaded from
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The ordered command lines of the job
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Total number of commands in the job
    pub fn total(&self) -> usize {
        self.commands.len()
    }

    /// Number of commands the device has acknowledged
    pub fn acknowledged(&self) -> usize {
        self.acked
    }

    /// Record one acknowledged command and return the new progress
    pub fn acknowledge(&mut self) -> f32 {
        self.acked = (self.acked + 1).min(self.commands.len());
        self.percent_complete()
    }

    /// True once every command has been acknowledged
    pub fn is_complete(&self) -> bool {
        self.acked >= self.commands.len()
    }

    /// Progress of the job, 0–100
    pub fn percent_complete(&self) -> f32 {
        if self.commands.is_empty() {
            100.0
        } else {
            self.acked as f32 / self.commands.len() as f32 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn strips_comments_and_blank_lines() {
        let job = PrintJob::from_lines(
            "test.gcode",
            [
                "; generated by a slicer",
                "G28 ; home first",
                "",
                "G1 X10 Y10",
                "   ",
                "M104 S200",
            ],
        );
        assert_eq!(job.commands(), ["G28", "G1 X10 Y10", "M104 S200"]);
        assert_eq!(job.total(), 3);
    }

    #[test]
    fn tracks_progress() {
        let mut job = PrintJob::from_lines("test.gcode", ["G28", "G1 X10", "G1 X20", "M84"]);
        assert_eq!(job.percent_complete(), 0.0);
        assert_eq!(job.acknowledge(), 25.0);
        job.acknowledge();
        job.acknowledge();
        assert!(!job.is_complete());
        assert_eq!(job.acknowledge(), 100.0);
        assert!(job.is_complete());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "; header").unwrap();
        writeln!(file, "G28").unwrap();
        writeln!(file, "G1 X5 ; move").unwrap();
        file.flush().unwrap();

        let job = PrintJob::from_file(file.path()).unwrap();
        assert_eq!(job.commands(), ["G28", "G1 X5"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(PrintJob::from_file("/nonexistent/path.gcode").is_err());
    }
}
