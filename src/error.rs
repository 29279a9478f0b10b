use thiserror::Error;

use crate::audio::graph::StreamType;

/// Errores del núcleo de audio.
///
/// Solo los fallos de construcción de pipelines/recursos se propagan como
/// `Err` al llamador inmediato (capa de comandos). Los errores de
/// reproducción llegan como eventos del transporte y nunca tumban al player.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No existe un camino de transcodificación dentro de la profundidad de búsqueda.
    #[error("no hay pipeline de transcodificación desde {from:?} hacia opus")]
    NoPipeline { from: StreamType },

    /// Un localizador (URL/ruta) produjo un pipeline vacío: sin transcodificador
    /// externo no hay forma de leerlo como stream.
    #[error("pipeline inválido para el recurso '{0}'")]
    InvalidPipeline(String),

    /// Falló el arranque o la lectura de una etapa del pipeline.
    #[error("etapa del pipeline falló: {0}")]
    Stage(#[from] std::io::Error),

    /// Error del códec Opus.
    #[error("error del códec opus: {0}")]
    Opus(#[from] audiopus::Error),

    /// El colaborador de descarga de medios no pudo abrir la fuente.
    #[error("fuente de audio no disponible: {0}")]
    Source(#[source] anyhow::Error),
}
