use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::playable::Playable;
use crate::audio::AudioContext;
use crate::error::AudioError;
use crate::notify::{Notice, Notifier};
use crate::transport::{Playback, PlayerStatus, TransportEvent, VoiceConnection};

/// Entrada de la cola para mostrar al usuario.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub title: String,
    pub url: String,
    pub requested_by: UserId,
    pub total_duration: u64,
}

/// Estado del elemento en reproducción, para el comando now-playing.
#[derive(Debug, Clone)]
pub struct CurrentInfo {
    pub title: String,
    pub url: String,
    pub thumbnail: String,
    pub channel: String,
    pub current_duration: u64,
    pub total_duration: u64,
}

struct PlayerState {
    queue: VecDeque<Playable>,
    current: Option<Playable>,
    loop_mode: bool,
    silent_mode: bool,
    skipping: bool,
    idle_timer: Option<JoinHandle<()>>,
}

enum Step {
    Finished { silent: bool },
    Replay,
    Next(Playable),
}

/// Máquina de estados de reproducción, una por guild.
///
/// Invariante: en cada momento o hay un elemento en reproducción, o se está
/// avanzando la cola, o el player espera inactivo a desconectarse. Las
/// transiciones (avance de cola, alta, seek) se serializan completas detrás
/// de `transition`: un evento idle del transporte nunca se intercala en
/// mitad de un seek o de un alta en curso.
pub struct MusicPlayer {
    guild_id: GuildId,
    voice_channel_name: String,
    ctx: Arc<AudioContext>,
    playback: Arc<dyn Playback>,
    connection: Arc<dyn VoiceConnection>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<PlayerState>,
    // Serializa las transiciones completas, incluidos sus awaits
    transition: tokio::sync::Mutex<()>,
    torn_down: AtomicBool,
    weak: Mutex<Weak<MusicPlayer>>,
}

impl MusicPlayer {
    /// Crea el player y arranca su bomba de eventos del transporte.
    pub fn spawn(
        guild_id: GuildId,
        voice_channel_name: impl Into<String>,
        ctx: Arc<AudioContext>,
        playback: Arc<dyn Playback>,
        connection: Arc<dyn VoiceConnection>,
        notifier: Arc<dyn Notifier>,
        events: flume::Receiver<TransportEvent>,
    ) -> Arc<Self> {
        let player = Arc::new(Self {
            guild_id,
            voice_channel_name: voice_channel_name.into(),
            ctx,
            playback,
            connection,
            notifier,
            state: Mutex::new(PlayerState {
                queue: VecDeque::new(),
                current: None,
                loop_mode: false,
                silent_mode: false,
                skipping: false,
                idle_timer: None,
            }),
            transition: tokio::sync::Mutex::new(()),
            torn_down: AtomicBool::new(false),
            weak: Mutex::new(Weak::new()),
        });
        *player.weak.lock() = Arc::downgrade(&player);

        // La bomba solo retiene un Weak: al retirar el player del registro se
        // suelta el transporte, el canal se cierra y la tarea termina sola.
        let weak = Arc::downgrade(&player);
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let Some(player) = weak.upgrade() else { break };
                player.handle_transport_event(event).await;
            }
            debug!("Bomba de eventos del player terminada");
        });

        player
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Reacciona a un evento del transporte de voz.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        // El stop de teardown emite un último idle; ya no hay cola que avanzar
        if self.torn_down.load(Ordering::Acquire) {
            debug!("Evento del transporte tras el teardown, ignorado: {event:?}");
            return;
        }
        match event {
            TransportEvent::Idle => self.play_next_in_queue().await,
            TransportEvent::Error(message) => {
                error!(
                    "❌ Error de reproducción en guild {}: {}",
                    self.guild_id, message
                );
                self.notify(Notice::text(format!(
                    ":x: `An error occurred while playing audio: {message}`"
                )))
                .await;
            }
        }
    }

    /// Añade un Playable a la cola; si no hay nada sonando, lo reproduce ya.
    pub async fn add_playable(&self, playable: Playable) {
        let _transition = self.transition.lock().await;

        if self.ctx.config.log_songs {
            info!(
                "🎵 {} en guild {} añadió a la cola: {} ({})",
                playable.request.username,
                self.guild_id,
                playable.title(),
                playable.url
            );
        }

        let queued = {
            let mut state = self.state.lock();
            let announce = state.current.is_some();
            let info = (
                playable.title(),
                playable.url.clone(),
                playable.add_silent,
                playable.request.clone(),
            );
            state.queue.push_back(playable);
            if announce {
                Some((state.queue.len(), state.silent_mode, state.loop_mode, info))
            } else {
                None
            }
        };

        let Some((position, silent_mode, loop_mode, (title, url, add_silent, request))) = queued
        else {
            return self.play_next_locked().await;
        };

        // Ya hay algo sonando: avisa de la posición en cola
        if add_silent || silent_mode {
            return;
        }
        request
            .reply(Notice::embed(
                self.ctx.config.embed_color_1,
                format!(
                    ":track_next: {} in queue: [{}]({})",
                    ordinal(position),
                    title,
                    url
                ),
            ))
            .await;
        if loop_mode {
            request
                .reply(Notice::text(
                    ":warning: `Warn: This item will not play until Loop Mode is disabled, or the current item is skipped.`",
                ))
                .await;
        }
    }

    /// Salta al siguiente elemento: fuerza la parada del transporte, cuyo
    /// evento idle encadena la transición real.
    pub fn skip(&self) {
        self.state.lock().skipping = true;
        self.unpause();
        self.playback.stop();
    }

    /// Pausa el elemento actual; no-op si no está exactamente reproduciendo.
    pub fn pause(&self) {
        if self.playback.status() != PlayerStatus::Playing {
            return;
        }
        self.playback.pause();
    }

    /// Reanuda el elemento actual; no-op si no está exactamente en pausa.
    pub fn unpause(&self) {
        if self.playback.status() != PlayerStatus::Paused {
            return;
        }
        self.playback.unpause();
    }

    /// Busca una posición en el elemento actual; sin elemento actual no hace
    /// nada.
    pub async fn seek(&self, seconds: u64) -> Result<(), AudioError> {
        // Transición completa: un idle del transporte durante la regeneración
        // del recurso esperará a que el elemento actual vuelva a su sitio
        let _transition = self.transition.lock().await;

        let Some(mut playable) = self.state.lock().current.take() else {
            return Ok(());
        };

        match playable.rebuild_resource(seconds).await {
            Ok(()) => {
                let resource = playable.resource();
                self.state.lock().current = Some(playable);
                self.playback.play(resource);
                Ok(())
            }
            Err(e) => {
                self.state.lock().current = Some(playable);
                Err(e)
            }
        }
    }

    /// Cierra la conexión de voz; `true` si estaba conectada y se cerró bien.
    pub async fn disconnect(&self) -> bool {
        match self.connection.destroy().await {
            Ok(()) => true,
            Err(e) => {
                debug!("La conexión de voz ya estaba cerrada: {e:?}");
                false
            }
        }
    }

    pub fn is_loop_mode(&self) -> bool {
        self.state.lock().loop_mode
    }

    pub fn toggle_loop_mode(&self) -> bool {
        let mut state = self.state.lock();
        state.loop_mode = !state.loop_mode;
        state.loop_mode
    }

    pub fn is_silent_mode(&self) -> bool {
        self.state.lock().silent_mode
    }

    /// Si la configuración del despliegue permite el modo silencioso.
    pub fn silent_mode_allowed(&self) -> bool {
        !self.ctx.config.disallow_silent_mode
    }

    /// Conmuta el modo silencioso; no-op si la configuración lo prohíbe.
    pub fn toggle_silent_mode(&self) -> bool {
        if !self.silent_mode_allowed() {
            return false;
        }
        let mut state = self.state.lock();
        state.silent_mode = !state.silent_mode;
        state.silent_mode
    }

    pub fn has_current(&self) -> bool {
        self.state.lock().current.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Si hay un temporizador de desconexión por inactividad armado.
    pub fn is_idle_pending(&self) -> bool {
        self.state.lock().idle_timer.is_some()
    }

    /// Instantánea de la cola para mostrarla al usuario.
    pub fn queue_snapshot(&self) -> Vec<QueueEntry> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|playable| QueueEntry {
                title: playable.title(),
                url: playable.url.clone(),
                requested_by: playable.request.user_id,
                total_duration: playable.total_duration(),
            })
            .collect()
    }

    /// Estado del elemento en reproducción, si lo hay.
    pub fn current_info(&self) -> Option<CurrentInfo> {
        let state = self.state.lock();
        state.current.as_ref().map(|playable| CurrentInfo {
            title: playable.title(),
            url: playable.url.clone(),
            thumbnail: playable.thumbnail(),
            channel: playable.channel(),
            current_duration: playable.current_duration(),
            total_duration: playable.total_duration(),
        })
    }

    /// Retira un elemento pendiente por índice; devuelve su título.
    pub fn remove(&self, index: usize) -> Option<String> {
        let mut state = self.state.lock();
        let title = state.queue.get(index).map(Playable::title)?;
        state.queue.remove(index);
        Some(title)
    }

    /// Libera todos los recursos del player; lo llama el registro al retirarlo.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::Release);
        self.playback.stop();
        let mut state = self.state.lock();
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        if let Some(current) = state.current.take() {
            current.resource().destroy();
        }
        for playable in state.queue.drain(..) {
            playable.resource().destroy();
        }
    }

    /// La transición central: selecciona y reproduce el siguiente elemento.
    /// Se invoca desde el evento idle del transporte y desde skip.
    async fn play_next_in_queue(&self) {
        let _transition = self.transition.lock().await;
        self.play_next_locked().await;
    }

    async fn play_next_locked(&self) {
        loop {
            let step = {
                let mut state = self.state.lock();
                if let Some(timer) = state.idle_timer.take() {
                    timer.abort();
                }

                let looping = state.loop_mode && !state.skipping && state.current.is_some();
                state.skipping = false;

                if looping {
                    Step::Replay
                } else {
                    if let Some(old) = state.current.take() {
                        old.resource().destroy();
                    }
                    match state.queue.pop_front() {
                        Some(playable) => Step::Next(playable),
                        None => {
                            state.loop_mode = false;
                            Step::Finished {
                                silent: state.silent_mode,
                            }
                        }
                    }
                }
            };

            match step {
                Step::Finished { silent } => {
                    if !silent {
                        self.notify(Notice::text(
                            ":white_check_mark: `Everything in the queue has been played.`",
                        ))
                        .await;
                    }
                    self.arm_idle_timer();
                    return;
                }

                Step::Replay => {
                    let Some(mut playable) = self.state.lock().current.take() else {
                        continue;
                    };
                    match playable.rebuild_resource(0).await {
                        Ok(()) => {
                            let resource = playable.resource();
                            self.state.lock().current = Some(playable);
                            self.playback.play(resource);
                            // En modo bucle no se repite el aviso de now-playing
                            return;
                        }
                        Err(e) => {
                            error!(
                                "❌ No se pudo regenerar el recurso en modo bucle: {e}"
                            );
                            playable
                                .request
                                .reply(Notice::text(
                                    ":x: `An error occurred in the audio resource, please try to play it again.`",
                                ))
                                .await;
                            self.state.lock().loop_mode = false;
                            continue;
                        }
                    }
                }

                Step::Next(playable) => {
                    // En casos raros el recurso llega ya "terminado"
                    if playable.resource().ended() {
                        warn!(
                            "⚠️ El recurso ya había terminado antes de reproducirse, saltando al siguiente..."
                        );
                        playable
                            .request
                            .reply(Notice::text(
                                ":x: `An error occurred in the audio resource, please try to play it again.`",
                            ))
                            .await;
                        self.state.lock().loop_mode = false;
                        continue;
                    }

                    let resource = playable.resource();
                    let (title, url, request, suppress) = {
                        let mut state = self.state.lock();
                        let suppress = state.loop_mode || state.silent_mode;
                        let info = (
                            playable.title(),
                            playable.url.clone(),
                            playable.request.clone(),
                        );
                        state.current = Some(playable);
                        (info.0, info.1, info.2, suppress)
                    };

                    self.playback.play(resource);

                    if !suppress {
                        request
                            .reply(Notice::embed(
                                self.ctx.config.embed_color_2,
                                format!(
                                    ":musical_note: Now playing in {}: [{}]({})",
                                    self.voice_channel_name, title, url
                                ),
                            ))
                            .await;
                    }
                    return;
                }
            }
        }
    }

    /// Arma la desconexión por inactividad; cualquier transición nueva la
    /// cancela antes de que dispare.
    fn arm_idle_timer(&self) {
        let weak = self.weak.lock().clone();
        let seconds = self.ctx.config.idle_disconnect_secs;
        let guild_id = self.guild_id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            if let Some(player) = weak.upgrade() {
                info!(
                    "⏱️ {}s sin reproducir nada en guild {}, desconectando del canal de voz",
                    seconds, guild_id
                );
                player.disconnect().await;
            }
        });
        self.state.lock().idle_timer = Some(handle);
    }

    async fn notify(&self, notice: Notice) {
        if let Err(e) = self.notifier.reply(notice).await {
            warn!("⚠️ No se pudo enviar el aviso al canal de texto: {e:?}");
        }
    }
}

impl Drop for MusicPlayer {
    fn drop(&mut self) {
        if let Some(timer) = self.state.lock().idle_timer.take() {
            timer.abort();
        }
    }
}

/// Posición ordinal legible para los avisos de cola.
fn ordinal(position: usize) -> String {
    let suffix = match (position % 10, position % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{position}{suffix}")
}
