//! Camera capture subprocess.
//!
//! The camera is driven by a GStreamer pipeline that writes a motion-JPEG
//! elementary stream to its stdout. The child is killed when the
//! `CaptureProcess` handle is dropped.

use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{anyhow, Context, Result};

use crate::codec::DEFAULT_QUALITY;

pub const DEFAULT_PROGRAM: &str = "gst-launch-1.0";

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    pub program: String,
    pub device: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            device: "/dev/video0".to_string(),
            fps: 15,
            width: 320,
            height: 240,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl CaptureConfig {
    /// Arguments for `program`, one pipeline token per element.
    pub fn pipeline_args(&self) -> Vec<String> {
        vec![
            "-q".to_string(),
            "v4l2src".to_string(),
            format!("device={}", self.device),
            "!".to_string(),
            format!(
                "video/x-raw,framerate={}/1,width={},height={}",
                self.fps, self.width, self.height
            ),
            "!".to_string(),
            "jpegenc".to_string(),
            format!("quality={}", self.quality),
            "!".to_string(),
            "fdsink".to_string(),
            "fd=1".to_string(),
        ]
    }
}

pub struct CaptureProcess {
    child: Child,
}

impl CaptureProcess {
    /// Start the pipeline; returns the handle and the child's MJPEG stdout.
    pub fn spawn(config: &CaptureConfig) -> Result<(Self, ChildStdout)> {
        let args = config.pipeline_args();
        log::info!("starting capture: {} {}", config.program, args.join(" "));
        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn capture pipeline '{}'", config.program))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                return Err(anyhow!("capture pipeline stdout unavailable"));
            }
        };
        Ok((Self { child }, stdout))
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for CaptureProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            log::debug!("stopping capture pipeline (pid {})", self.child.id());
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_matches_camera_defaults() {
        let args = CaptureConfig::default().pipeline_args().join(" ");
        assert_eq!(
            args,
            "-q v4l2src device=/dev/video0 ! video/x-raw,framerate=15/1,width=320,height=240 \
             ! jpegenc quality=50 ! fdsink fd=1"
        );
    }

    #[test]
    fn missing_program_fails_to_start() {
        let config = CaptureConfig {
            program: "/nonexistent/gst-launch".to_string(),
            ..CaptureConfig::default()
        };
        assert!(CaptureProcess::spawn(&config).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn child_stdout_is_readable() {
        use std::io::Read;

        // `echo` ignores the pipeline arguments and prints them back.
        let config = CaptureConfig {
            program: "echo".to_string(),
            ..CaptureConfig::default()
        };
        let (process, mut stdout) = CaptureProcess::spawn(&config).unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).unwrap();
        assert!(out.contains("jpegenc quality=50"));
        drop(process);
    }
}
