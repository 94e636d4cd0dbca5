use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::EncodingConfig;
use crate::database::KeepSegment;
use crate::error::PipelineError;

const LOUDNORM: &str = "loudnorm=I=-23:LRA=7:TP=-2";

/// Media cut/encode collaborator.
pub trait Encoder: Send + Sync {
    /// Concatenate `keeps` from `input` into `output`. An empty keep list
    /// is a failure.
    fn cut(
        &self,
        input: &Path,
        keeps: &[KeepSegment],
        output: &Path,
        encoding: &EncodingConfig,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// Duration of `input` in seconds.
    fn probe_duration(&self, input: &Path)
        -> impl Future<Output = Result<f64, PipelineError>> + Send;
}

/// File extension for a target codec.
pub fn output_extension(codec: &str) -> &str {
    match codec {
        "aac" => "m4a",
        "opus" => "opus",
        "vorbis" => "ogg",
        "" => "mp3",
        other => other,
    }
}

fn encoder_name(codec: &str) -> &str {
    match codec {
        "mp3" => "libmp3lame",
        "opus" => "libopus",
        "vorbis" => "libvorbis",
        other => other,
    }
}

/// `-filter_complex` graph trimming every keep segment and concatenating
/// them into `[outa]`.
pub fn build_filter_graph(keeps: &[KeepSegment], normalize_loudness: bool) -> String {
    let mut parts: Vec<String> = keeps
        .iter()
        .enumerate()
        .map(|(i, k)| {
            format!(
                "[0:a]atrim=start={:.3}:end={:.3},asetpts=PTS-STARTPTS[s{}]",
                k.start, k.end, i
            )
        })
        .collect();

    let inputs: String = (0..keeps.len()).map(|i| format!("[s{}]", i)).collect();
    if normalize_loudness {
        parts.push(format!(
            "{}concat=n={}:v=0:a=1[concat_out];[concat_out]{}[outa]",
            inputs,
            keeps.len(),
            LOUDNORM
        ));
    } else {
        parts.push(format!("{}concat=n={}:v=0:a=1[outa]", inputs, keeps.len()));
    }
    parts.join(";")
}

/// Full ffmpeg argument list (without the program name).
pub fn build_cut_args(
    input: &Path,
    keeps: &[KeepSegment],
    output: &Path,
    encoding: &EncodingConfig,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        build_filter_graph(keeps, encoding.normalize_loudness),
        "-map".to_string(),
        "[outa]".to_string(),
        "-c:a".to_string(),
        encoder_name(&encoding.codec).to_string(),
    ];

    // "v4" means VBR quality 4 for mp3
    match encoding.bitrate.strip_prefix('v') {
        Some(quality) if encoding.codec == "mp3" && quality.parse::<u8>().is_ok() => {
            args.push("-q:a".to_string());
            args.push(quality.to_string());
        }
        _ => {
            args.push("-b:a".to_string());
            args.push(encoding.bitrate.clone());
        }
    }

    args.push(output.to_string_lossy().to_string());
    args
}

/// Cuts with the `ffmpeg` binary and probes with `ffprobe`.
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            timeout,
        }
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<std::process::Output, String> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to spawn {:?}: {}", program, e))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| format!("Failed to wait for {:?}: {}", program, e)),
            Err(_) => Err(format!(
                "{:?} timed out after {}s",
                program,
                self.timeout.as_secs()
            )),
        }
    }
}

impl Encoder for FfmpegEncoder {
    async fn cut(
        &self,
        input: &Path,
        keeps: &[KeepSegment],
        output: &Path,
        encoding: &EncodingConfig,
    ) -> Result<(), PipelineError> {
        if keeps.is_empty() {
            return Err(PipelineError::EncodeFailure(
                "No segments to keep".to_string(),
            ));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Encoded to a partial file, renamed into place on success
        let extension = output
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| output_extension(&encoding.codec).to_string());
        let partial = output.with_extension(format!("partial.{}", extension));

        let args = build_cut_args(input, keeps, &partial, encoding);
        log::info!(
            "Encoding {} keep segments from {:?} to {:?}",
            keeps.len(),
            input,
            output
        );
        log::debug!("ffmpeg {}", args.join(" "));

        let result = self.run(&self.ffmpeg_path, &args).await;
        let output_result = match result {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
                Err(PipelineError::EncodeFailure(format!(
                    "ffmpeg exited with {}: {}",
                    out.status, tail
                )))
            }
            Err(e) => Err(PipelineError::EncodeFailure(e)),
        };

        if let Err(e) = output_result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, output).await?;
        Ok(())
    }

    async fn probe_duration(&self, input: &Path) -> Result<f64, PipelineError> {
        let args: Vec<String> = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            input.to_string_lossy().to_string(),
        ];
        let unknown = |reason: String| {
            PipelineError::UnknownDuration(format!("{:?}: {}", input, reason))
        };

        let out = self.run(&self.ffprobe_path, &args).await.map_err(unknown)?;
        if !out.status.success() {
            return Err(unknown(format!("ffprobe exited with {}", out.status)));
        }
        parse_probe_output(&String::from_utf8_lossy(&out.stdout))
            .ok_or_else(|| unknown("no duration in ffprobe output".to_string()))
    }
}

fn parse_probe_output(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .find_map(|line| line.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keeps() -> Vec<KeepSegment> {
        vec![KeepSegment::new(0.0, 10.0), KeepSegment::new(25.5, 100.0)]
    }

    #[test]
    fn test_filter_graph() {
        assert_eq!(
            build_filter_graph(&keeps(), false),
            "[0:a]atrim=start=0.000:end=10.000,asetpts=PTS-STARTPTS[s0];\
             [0:a]atrim=start=25.500:end=100.000,asetpts=PTS-STARTPTS[s1];\
             [s0][s1]concat=n=2:v=0:a=1[outa]"
        );
        let normalized = build_filter_graph(&keeps(), true);
        assert!(normalized.ends_with(
            "[s0][s1]concat=n=2:v=0:a=1[concat_out];[concat_out]loudnorm=I=-23:LRA=7:TP=-2[outa]"
        ));
    }

    #[test]
    fn test_vbr_mp3_uses_quality() {
        let args = build_cut_args(
            Path::new("in.mp3"),
            &keeps(),
            Path::new("out.mp3"),
            &EncodingConfig::default(),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:a libmp3lame -q:a 4 out.mp3"));
        assert!(!joined.contains("-b:a"));
    }

    #[test]
    fn test_constant_bitrate() {
        let encoding = EncodingConfig {
            codec: "aac".to_string(),
            bitrate: "96k".to_string(),
            normalize_loudness: false,
        };
        let args = build_cut_args(Path::new("in.mp3"), &keeps(), Path::new("out.m4a"), &encoding);
        assert!(args.join(" ").contains("-c:a aac -b:a 96k out.m4a"));
        assert_eq!(output_extension("aac"), "m4a");
        assert_eq!(output_extension("mp3"), "mp3");
    }

    #[test]
    fn test_parse_probe_output() {
        assert_eq!(parse_probe_output("1834.213000\n"), Some(1834.213));
        assert_eq!(parse_probe_output("N/A\n"), None);
        assert_eq!(parse_probe_output(""), None);
    }

    #[tokio::test]
    async fn test_empty_keeps_fail_without_running() {
        let encoder = FfmpegEncoder::new(Duration::from_secs(1));
        let result = encoder
            .cut(
                Path::new("missing.mp3"),
                &[],
                Path::new("out.mp3"),
                &EncodingConfig::default(),
            )
            .await;
        assert!(matches!(result, Err(PipelineError::EncodeFailure(_))));
    }
}
