//! Descarga de audio vía yt-dlp, emitiendo el contenedor tal cual llega.

use async_trait::async_trait;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::audio::graph::StreamType;
use crate::audio::stages::{ProcessStream, StreamDescriptor, TypedStream};
use crate::sources::MediaDownloader;

/// Descargador basado en el binario `yt-dlp`.
///
/// Vuelca el mejor stream de solo audio por stdout sin recodificarlo, por lo
/// que el formato del contenedor es desconocido de antemano y el stream sale
/// etiquetado como arbitrario.
pub struct YtDlpDownloader {
    binary: String,
}

impl YtDlpDownloader {
    pub fn new() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    async fn open(&self, url: &str) -> anyhow::Result<TypedStream> {
        debug!("🎬 Descargando audio con yt-dlp: {}", url);

        let mut command = Command::new(&self.binary);
        command
            .arg("-f")
            .arg("bestaudio")
            .arg("-o")
            .arg("-")
            .arg("--no-playlist")
            .arg("--quiet")
            .arg(url)
            .stdin(Stdio::null())
            .stderr(Stdio::null());

        let stream = ProcessStream::spawn(command, None)?;
        Ok(TypedStream::new(
            Box::new(stream),
            StreamDescriptor::new(StreamType::Arbitrary),
        ))
    }
}

/// Comprueba que los binarios externos necesarios estén disponibles.
pub async fn verify_dependencies() -> anyhow::Result<()> {
    for (binary, flag) in [("yt-dlp", "--version"), ("ffmpeg", "-version")] {
        let output = tokio::process::Command::new(binary)
            .arg(flag)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout);
                info!(
                    "✅ {} disponible: {}",
                    binary,
                    version.lines().next().unwrap_or("?")
                );
            }
            _ => anyhow::bail!("{binary} no está instalado o no responde"),
        }
    }
    Ok(())
}
