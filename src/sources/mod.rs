//! Fuentes de audio: abren una URL como stream etiquetado listo para el grafo.

pub mod ytdlp;

use async_trait::async_trait;

use crate::audio::playable::FileInfo;
use crate::audio::stages::TypedStream;

pub use ytdlp::YtDlpDownloader;

/// Abre medios remotos como streams de bytes etiquetados.
///
/// La implementación decide el formato de salida vía el descriptor del
/// stream; el grafo de transcodificación se encarga del resto.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn open(&self, url: &str) -> anyhow::Result<TypedStream>;
}

/// Resuelve los metadatos de un fichero de audio directo.
#[async_trait]
pub trait FileProbe: Send + Sync {
    async fn probe(&self, url: &str) -> anyhow::Result<FileInfo>;
}
