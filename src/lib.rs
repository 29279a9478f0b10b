//! # Cadenza
//!
//! Motor de reproducción de audio para bots de chat, independiente del
//! transporte de voz.
//!
//! El crate expone un [`audio::registry::PlayerRegistry`] por proceso: cada
//! guild obtiene su [`audio::player::MusicPlayer`], que encadena recursos de
//! audio ya transcodificados a opus hacia un [`transport::VoiceSink`]
//! inyectado por la aplicación anfitriona.

pub mod audio;
pub mod config;
pub mod error;
pub mod notify;
pub mod sources;
pub mod transport;

pub use audio::graph::{StreamType, TransformerGraph, TransformerType};
pub use audio::playable::{ExtraInfo, FileInfo, Playable, PlayableKind, VideoInfo};
pub use audio::player::MusicPlayer;
pub use audio::registry::PlayerRegistry;
pub use audio::resource::{create_audio_resource, AudioResource, ResourceInput, ResourceOptions};
pub use audio::AudioContext;
pub use config::PlayerConfig;
pub use error::AudioError;
pub use notify::{Notice, Notifier, RequestContext};
pub use transport::{
    Playback, PlayerStatus, TransportEvent, VoiceConnection, VoiceConnector, VoicePlayer, VoiceSink,
};
