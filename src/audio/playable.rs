use std::sync::Arc;

use crate::audio::resource::{create_audio_resource, AudioResource, ResourceInput, ResourceOptions};
use crate::audio::AudioContext;
use crate::config::VOLUME_MULTIPLIER;
use crate::error::AudioError;
use crate::notify::RequestContext;

/// Miniatura por defecto para archivos sin carátula.
const FILE_THUMBNAIL: &str =
    "https://cdn.discordapp.com/attachments/692211326503616594/702426388573061150/file_icon.jpg";

/// Clase de fuente de un elemento de la cola.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayableKind {
    /// URL o ruta directa a un archivo de audio.
    File,
    /// Vídeo remoto cuyo audio se descarga vía el colaborador de descargas.
    Video,
}

/// Metadatos de un vídeo remoto, pre-consultados por la capa de comandos.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub title: String,
    pub thumbnail: Option<String>,
    pub channel: Option<String>,
    pub length_seconds: u64,
}

/// Metadatos de un archivo, según el colaborador de sondeo.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub duration_seconds: u64,
}

/// Metadatos opcionales de un Playable.
#[derive(Debug, Clone, Default)]
pub struct ExtraInfo {
    pub video: Option<VideoInfo>,
    pub file: Option<FileInfo>,
}

/// Un elemento de la cola: la referencia al medio más su recurso de
/// reproducción vigente.
///
/// El recurso se regenera en cada seek y en cada repetición de bucle; la
/// regeneración es una transición explícita del player, no un listener
/// escondido en el recurso.
pub struct Playable {
    pub request: RequestContext,
    pub kind: PlayableKind,
    pub url: String,
    pub extra_info: Option<ExtraInfo>,
    /// Suprime el aviso de "en cola" (altas masivas de playlists).
    pub add_silent: bool,
    resource: AudioResource,
    started_time_seconds: u64,
    ctx: Arc<AudioContext>,
}

impl Playable {
    pub async fn new(
        ctx: Arc<AudioContext>,
        request: RequestContext,
        kind: PlayableKind,
        url: impl Into<String>,
        extra_info: Option<ExtraInfo>,
        add_silent: bool,
        seek_seconds: u64,
    ) -> Result<Self, AudioError> {
        let url = url.into();
        let resource = Self::build_resource(&ctx, kind, &url, seek_seconds).await?;

        Ok(Self {
            request,
            kind,
            url,
            extra_info,
            add_silent,
            resource,
            started_time_seconds: seek_seconds,
            ctx,
        })
    }

    /// Recurso de reproducción vigente (handle barato de clonar).
    pub fn resource(&self) -> AudioResource {
        self.resource.clone()
    }

    /// Destruye el recurso actual y crea uno nuevo desde el offset dado.
    /// Es la ruta compartida de seek y de repetición en modo bucle.
    pub async fn rebuild_resource(&mut self, seek_seconds: u64) -> Result<(), AudioError> {
        self.resource.destroy();
        self.resource = Self::build_resource(&self.ctx, self.kind, &self.url, seek_seconds).await?;
        self.started_time_seconds = seek_seconds;
        Ok(())
    }

    async fn build_resource(
        ctx: &AudioContext,
        kind: PlayableKind,
        url: &str,
        seek_seconds: u64,
    ) -> Result<AudioResource, AudioError> {
        let input = match kind {
            PlayableKind::Video => {
                let stream = ctx
                    .downloader
                    .open(url)
                    .await
                    .map_err(AudioError::Source)?;
                ResourceInput::Stream(stream)
            }
            PlayableKind::File => ResourceInput::Locator(url.to_string()),
        };

        let resource = create_audio_resource(
            &ctx.graph,
            input,
            ResourceOptions {
                input_type: None,
                // Toda fuente recibe corrección de volumen; a 100% hay clipping
                inline_volume: true,
                silence_padding_frames: Some(ctx.config.silence_padding_frames),
                seek_seconds: seek_seconds as f64,
            },
        )?;

        if let Some(volume) = resource.volume() {
            volume.set(VOLUME_MULTIPLIER);
        }

        Ok(resource)
    }

    /// Título a mostrar, con degradado elegante si faltan metadatos.
    pub fn title(&self) -> String {
        if let Some(info) = &self.extra_info {
            if let Some(video) = &info.video {
                return video.title.clone();
            }
            if let Some(file) = &info.file {
                return file.name.clone();
            }
        }
        "Unknown Title".to_string()
    }

    /// Segundos ya reproducidos, contando el offset del último seek.
    pub fn current_duration(&self) -> u64 {
        self.resource.playback_duration_ms() / 1000 + self.started_time_seconds
    }

    /// Duración total en segundos; 0 si el sondeo de metadatos no la resolvió.
    pub fn total_duration(&self) -> u64 {
        if let Some(info) = &self.extra_info {
            if let Some(video) = &info.video {
                return video.length_seconds;
            }
            if let Some(file) = &info.file {
                return file.duration_seconds;
            }
        }
        0
    }

    pub fn thumbnail(&self) -> String {
        self.extra_info
            .as_ref()
            .and_then(|info| info.video.as_ref())
            .and_then(|video| video.thumbnail.clone())
            .unwrap_or_else(|| FILE_THUMBNAIL.to_string())
    }

    pub fn channel(&self) -> String {
        self.extra_info
            .as_ref()
            .and_then(|info| info.video.as_ref())
            .and_then(|video| video.channel.clone())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

impl std::fmt::Debug for Playable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playable")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("title", &self.title())
            .field("add_silent", &self.add_silent)
            .field("started_time_seconds", &self.started_time_seconds)
            .finish_non_exhaustive()
    }
}
