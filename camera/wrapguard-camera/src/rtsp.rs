use std::time::Duration;

use image::RgbImage;
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use retina::client::{Credentials, Demuxed, Session, SessionOptions, SetupOptions};
use retina::codec::CodecItem;
use retina::StreamContext;
use tracing::{debug, warn};
use url::Url;

use crate::error::CameraError;
use crate::source::FrameSource;

/// Live RTSP/H.264 source. Opens one TCP session, negotiates the first
/// advertised video stream, and decodes each access unit with `openh264`.
pub struct RtspSource {
    url: String,
    session: Option<Demuxed>,
    decoder: Decoder,
}

impl RtspSource {
    pub fn new(url: String) -> Result<Self, CameraError> {
        let decoder = Decoder::new().map_err(|e| CameraError::Decode(e.to_string()))?;
        Ok(RtspSource {
            url,
            session: None,
            decoder,
        })
    }

    async fn open(&mut self) -> Result<(), CameraError> {
        let parsed = Url::parse(&self.url).map_err(|e| CameraError::Describe {
            url: self.url.clone(),
            source: anyhow::Error::new(e),
        })?;

        let creds = if !parsed.username().is_empty() {
            Some(Credentials {
                username: parsed.username().to_string(),
                password: parsed.password().unwrap_or_default().to_string(),
            })
        } else {
            None
        };

        let mut options = SessionOptions::default().user_agent("wrapguard".to_owned());
        if let Some(creds) = creds {
            options = options.creds(Some(creds));
        }

        let mut session = Session::describe(parsed, options)
            .await
            .map_err(|e| CameraError::Describe {
                url: self.url.clone(),
                source: anyhow::Error::new(e),
            })?;

        let video_stream_i = session
            .streams()
            .iter()
            .position(|s| s.media() == "video" && s.encoding_name() == "h264")
            .ok_or_else(|| CameraError::NoVideoStream {
                url: self.url.clone(),
            })?;

        session
            .setup(video_stream_i, SetupOptions::default())
            .await
            .map_err(|e| CameraError::Describe {
                url: self.url.clone(),
                source: anyhow::Error::new(e),
            })?;

        let playing = session
            .play(Default::default())
            .await
            .map_err(|e| CameraError::Describe {
                url: self.url.clone(),
                source: anyhow::Error::new(e),
            })?;

        self.session = Some(
            playing
                .demuxed()
                .map_err(|e| CameraError::Stream(e.to_string()))?,
        );
        Ok(())
    }

    fn decode_frame(&mut self, data: &[u8]) -> Result<Option<RgbImage>, CameraError> {
        let yuv = self
            .decoder
            .decode(data)
            .map_err(|e| CameraError::Decode(e.to_string()))?;
        let Some(yuv) = yuv else {
            return Ok(None);
        };

        let (w, h) = yuv.dimensions();
        if w == 0 || h == 0 {
            return Err(CameraError::Decode("decoder reported zero-sized frame".to_string()));
        }
        let mut rgb = vec![0u8; w * h * 3];
        yuv.write_rgb8(&mut rgb);

        RgbImage::from_raw(w as u32, h as u32, rgb)
            .map(Some)
            .ok_or_else(|| CameraError::Decode("decoded buffer size mismatch".to_string()))
    }
}

impl FrameSource for RtspSource {
    async fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
        if self.session.is_none() {
            self.open().await?;
        }

        loop {
            use futures::StreamExt;
            let session = self.session.as_mut().expect("opened above");
            let item = tokio::time::timeout(Duration::from_secs(10), session.next())
                .await
                .map_err(|_| CameraError::Stream("no data for 10s".to_string()))?;

            let Some(item) = item else {
                self.session = None;
                return Err(CameraError::Stream("stream ended".to_string()));
            };

            match item.map_err(|e| CameraError::Stream(e.to_string()))? {
                CodecItem::VideoFrame(frame) => {
                    if let Some(rgb) = self.decode_frame(frame.data())? {
                        return Ok(rgb);
                    }
                    debug!("decoder buffered a frame, waiting for more data");
                }
                CodecItem::Rtcp(_) | CodecItem::MessageFrame(_) => continue,
                _ => {
                    warn!("ignoring non-video codec item");
                    continue;
                }
            }
        }
    }
}

#[allow(dead_code)]
fn stream_context_description(ctx: &StreamContext) -> String {
    format!("{ctx:?}")
}
