//! Playable audio resources and stream probing.

use std::fmt;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_OPUS,
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_VORBIS, CodecType,
};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::MaterializeError;
use crate::media::{MediaStream, ProcessControl};
use crate::track::Track;

/// Bytes buffered from the head of a stream before deciding its format.
pub const PROBE_HEAD_BYTES: usize = 16 * 1024;

const CODEC_NAMES: &[(CodecType, &str)] = &[
    (CODEC_TYPE_OPUS, "opus"),
    (CODEC_TYPE_VORBIS, "vorbis"),
    (CODEC_TYPE_AAC, "aac"),
    (CODEC_TYPE_MP3, "mp3"),
    (CODEC_TYPE_FLAC, "flac"),
    (CODEC_TYPE_ALAC, "alac"),
    (CODEC_TYPE_PCM_S16LE, "pcm_s16le"),
    (CODEC_TYPE_PCM_S24LE, "pcm_s24le"),
    (CODEC_TYPE_PCM_F32LE, "pcm_f32le"),
];

/// Container recognised from the stream head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    WebM,
    Matroska,
    Ogg,
    Mp4,
    Mp3,
    Flac,
    Wav,
    Aiff,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::WebM => "webm",
            Container::Matroska => "mkv",
            Container::Ogg => "ogg",
            Container::Mp4 => "m4a",
            Container::Mp3 => "mp3",
            Container::Flac => "flac",
            Container::Wav => "wav",
            Container::Aiff => "aiff",
        }
    }

    fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"OggS") {
            return Some(Container::Ogg);
        }
        if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            let doc_type = &head[..head.len().min(64)];
            if doc_type.windows(4).any(|w| w == b"webm") {
                return Some(Container::WebM);
            }
            return Some(Container::Matroska);
        }
        if head.starts_with(b"fLaC") {
            return Some(Container::Flac);
        }
        if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WAVE" {
            return Some(Container::Wav);
        }
        if head.len() >= 12 && &head[0..4] == b"FORM" && matches!(&head[8..12], b"AIFF" | b"AIFC")
        {
            return Some(Container::Aiff);
        }
        if head.len() >= 8 && &head[4..8] == b"ftyp" {
            return Some(Container::Mp4);
        }
        if head.starts_with(b"ID3") || (head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE0 == 0xE0)
        {
            return Some(Container::Mp3);
        }
        None
    }
}

/// Detected stream format. `codec` is `None` when the container was recognised
/// but the codec could not be read from the buffered head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub container: Container,
    pub codec: Option<&'static str>,
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.codec {
            Some(codec) => write!(f, "{}/{}", self.container.extension(), codec),
            None => f.write_str(self.container.extension()),
        }
    }
}

/// Read up to [`PROBE_HEAD_BYTES`] from the stream and detect its format.
///
/// Returns the format together with the consumed head so the caller can put it
/// back in front of the remaining stream.
pub async fn probe(stream: &mut MediaStream) -> Result<(StreamFormat, Vec<u8>), MaterializeError> {
    let head = read_head(stream).await?;
    let format = detect(&head)?;
    Ok((format, head))
}

/// Chain an already-consumed head back in front of the rest of the stream.
pub fn replay_head(head: Vec<u8>, rest: MediaStream) -> MediaStream {
    Box::pin(Cursor::new(head).chain(rest))
}

async fn read_head(stream: &mut MediaStream) -> Result<Vec<u8>, MaterializeError> {
    let mut head = Vec::with_capacity(PROBE_HEAD_BYTES);
    (&mut *stream)
        .take(PROBE_HEAD_BYTES as u64)
        .read_to_end(&mut head)
        .await
        .map_err(MaterializeError::Read)?;
    if head.is_empty() {
        return Err(MaterializeError::EmptyStream);
    }
    Ok(head)
}

pub fn detect(head: &[u8]) -> Result<StreamFormat, MaterializeError> {
    let container = Container::sniff(head).ok_or_else(|| {
        let preview: String = head
            .iter()
            .take(8)
            .map(|byte| format!("{byte:02x}"))
            .collect();
        MaterializeError::Probe(format!("unknown container (head {preview})"))
    })?;
    Ok(StreamFormat {
        container,
        codec: probe_codec(container, head),
    })
}

fn probe_codec(container: Container, head: &[u8]) -> Option<&'static str> {
    let mut hint = Hint::new();
    hint.with_extension(container.extension());
    let source = MediaSourceStream::new(Box::new(Cursor::new(head.to_vec())), Default::default());
    match symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => {
            let codec = probed.format.default_track()?.codec_params.codec;
            CODEC_NAMES
                .iter()
                .find(|(known, _)| *known == codec)
                .map(|(_, name)| *name)
        }
        Err(err) => {
            tracing::debug!(container = ?container, error = %err, "codec probe failed");
            None
        }
    }
}

/// A track bound to a live stream, ready to hand to a player.
///
/// Dropping the resource kills the fetch process behind it.
pub struct AudioResource {
    track: Arc<Track>,
    format: StreamFormat,
    stream: MediaStream,
    control: Box<dyn ProcessControl>,
}

impl AudioResource {
    pub fn new(
        track: Arc<Track>,
        format: StreamFormat,
        stream: MediaStream,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            track,
            format,
            stream,
            control,
        }
    }

    pub fn track(&self) -> &Arc<Track> {
        &self.track
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }
}

impl fmt::Debug for AudioResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioResource")
            .field("track", &self.track.title())
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for AudioResource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl Drop for AudioResource {
    fn drop(&mut self) {
        self.control.kill();
    }
}
