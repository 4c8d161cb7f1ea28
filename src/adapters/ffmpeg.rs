use async_trait::async_trait;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::TranscodeConfig;
use crate::ports::engine::{EngineError, EngineRequest, TranscodeEngine, SEGMENT_TEMPLATE};

/// Runs `ffmpeg` as a child process producing an HLS VOD rendition.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    settings: TranscodeConfig,
}

impl FfmpegEngine {
    pub fn new(settings: TranscodeConfig) -> Self {
        Self { settings }
    }

    /// Full argument list for one request.
    pub fn args(&self, request: &EngineRequest) -> Vec<OsString> {
        let s = &self.settings;
        let segment = s.segment_seconds.to_string();

        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(request.source.clone().into_os_string());

        let encode = vec![
            String::from("-c:v"),
            s.video_codec.clone(),
            String::from("-profile:v"),
            s.profile.clone(),
            String::from("-level"),
            s.level.clone(),
            String::from("-preset"),
            s.preset.clone(),
            String::from("-crf"),
            s.crf.to_string(),
            String::from("-vf"),
            format!("scale=-2:{}", s.target_height),
            // Every segment must open on a keyframe for players to start anywhere.
            String::from("-force_key_frames"),
            format!("expr:gte(t,n_forced*{})", segment),
            String::from("-c:a"),
            s.audio_codec.clone(),
            String::from("-b:a"),
            s.audio_bitrate.clone(),
        ];
        let hls = vec![
            String::from("-f"),
            String::from("hls"),
            String::from("-start_number"),
            String::from("0"),
            String::from("-hls_time"),
            segment,
            String::from("-hls_list_size"),
            String::from("0"),
            String::from("-hls_playlist_type"),
            String::from("vod"),
            String::from("-hls_segment_type"),
            String::from("mpegts"),
            String::from("-hls_flags"),
            String::from("independent_segments"),
            String::from("-hls_segment_filename"),
        ];
        args.extend(encode.into_iter().chain(hls).map(OsString::from));

        args.push(request.output_dir.join(SEGMENT_TEMPLATE).into_os_string());
        args.push(request.manifest_path().into_os_string());
        args
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn transcode(
        &self,
        request: &EngineRequest,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut command = Command::new(&self.settings.ffmpeg_bin);
        command
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(video_id = %request.video_id, ?command, "spawning ffmpeg");
        let child = command.spawn().map_err(EngineError::Spawn)?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::Exited {
                status: output.status.to_string(),
                diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}
