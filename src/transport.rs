use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::audio::resource::AudioResource;

/// Estado observable del reproductor de transporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
    Paused,
    Buffering,
}

/// Eventos que el transporte emite hacia la máquina de estados del player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Idle,
    Error(String),
}

/// Consumidor de paquetes Opus: el colaborador que mueve los frames por la
/// red de voz. Este núcleo no transporta paquetes, solo los entrega.
pub trait VoiceSink: Send + Sync {
    fn send_frame(&self, frame: Bytes) -> anyhow::Result<()>;
}

/// Conexión de voz activa en un canal.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn sink(&self) -> Arc<dyn VoiceSink>;

    /// Cierra la conexión; error si ya estaba destruida.
    async fn destroy(&self) -> anyhow::Result<()>;
}

/// Fábrica de conexiones de voz (el gateway del bot anfitrión).
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> anyhow::Result<Arc<dyn VoiceConnection>>;
}

/// Operaciones de reproducción que consume la máquina de estados.
///
/// `VoicePlayer` es la implementación real; los tests usan dobles.
pub trait Playback: Send + Sync {
    fn play(&self, resource: AudioResource);
    fn pause(&self);
    fn unpause(&self);
    fn stop(&self);
    fn status(&self) -> PlayerStatus;
}

struct DriverInner {
    sink: Arc<dyn VoiceSink>,
    status: Mutex<PlayerStatus>,
    current: Mutex<Option<AudioResource>>,
    events: flume::Sender<TransportEvent>,
    shutdown: AtomicBool,
}

/// Reproductor por demanda: un bucle de 20ms tira frames del recurso actual y
/// los entrega al sink. Emite `Idle` al agotarse el recurso (o al pararlo) y
/// `Error` si el sink falla.
pub struct VoicePlayer {
    inner: Arc<DriverInner>,
}

impl VoicePlayer {
    /// Arranca el bucle de reproducción sobre un sink. Devuelve el player y el
    /// receptor de eventos que debe consumir la máquina de estados.
    pub fn spawn(sink: Arc<dyn VoiceSink>) -> (Self, flume::Receiver<TransportEvent>) {
        let (tx, rx) = flume::unbounded();
        let inner = Arc::new(DriverInner {
            sink,
            status: Mutex::new(PlayerStatus::Idle),
            current: Mutex::new(None),
            events: tx,
            shutdown: AtomicBool::new(false),
        });

        let driver = inner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(20));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if driver.shutdown.load(Ordering::Acquire) {
                    break;
                }
                if *driver.status.lock() == PlayerStatus::Paused {
                    continue;
                }

                let resource = match driver.current.lock().clone() {
                    Some(resource) => resource,
                    None => continue,
                };

                if resource.readable() {
                    if let Some(frame) = resource.read() {
                        {
                            let mut status = driver.status.lock();
                            if *status == PlayerStatus::Buffering {
                                *status = PlayerStatus::Playing;
                            }
                        }
                        if let Err(e) = driver.sink.send_frame(frame) {
                            error!("❌ El sink de voz rechazó un frame: {e:?}");
                            let _ = driver.events.send(TransportEvent::Error(e.to_string()));
                        }
                    }
                } else if resource.ended() {
                    debug!("Recurso agotado, emitiendo Idle");
                    resource.destroy();
                    *driver.current.lock() = None;
                    *driver.status.lock() = PlayerStatus::Idle;
                    let _ = driver.events.send(TransportEvent::Idle);
                }
            }
        });

        (Self { inner }, rx)
    }
}

impl Playback for VoicePlayer {
    /// Sustituye el recurso actual (sin emitir `Idle`: es la ruta de seek y de
    /// arranque de pista, no un final de reproducción).
    fn play(&self, resource: AudioResource) {
        if let Some(old) = self.inner.current.lock().replace(resource) {
            old.destroy();
        }
        *self.inner.status.lock() = PlayerStatus::Buffering;
    }

    fn pause(&self) {
        let mut status = self.inner.status.lock();
        if *status == PlayerStatus::Playing || *status == PlayerStatus::Buffering {
            *status = PlayerStatus::Paused;
        }
    }

    fn unpause(&self) {
        let mut status = self.inner.status.lock();
        if *status == PlayerStatus::Paused {
            *status = PlayerStatus::Playing;
        }
    }

    /// Para la reproducción. Si había recurso en marcha lo destruye y emite
    /// `Idle`, que es lo que encadena la siguiente transición del player.
    fn stop(&self) {
        let had_resource = {
            let mut current = self.inner.current.lock();
            match current.take() {
                Some(resource) => {
                    resource.destroy();
                    true
                }
                None => false,
            }
        };
        let was_active = {
            let mut status = self.inner.status.lock();
            let active = *status != PlayerStatus::Idle;
            *status = PlayerStatus::Idle;
            active
        };

        if had_resource || was_active {
            let _ = self.inner.events.send(TransportEvent::Idle);
        }
    }

    fn status(&self) -> PlayerStatus {
        *self.inner.status.lock()
    }
}

impl Drop for VoicePlayer {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(resource) = self.inner.current.lock().take() {
            resource.destroy();
        }
    }
}
