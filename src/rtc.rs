//! Broker that carries calls over WebRTC, negotiated through the signaling
//! relay. One `RTCPeerConnection` per call.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::media::codec::{decode_pcmu, PcmuEncoder, PCMU_RATE};
use crate::media::{LocalMediaStream, MediaChunk, MediaFormat, RemoteStream, TrackKind};
use crate::peer::{
    BrokerEvent, CallControl, CallEvent, MediaCall, Registration, SignalingBroker,
    SignalingChannel, SignalingIdentity,
};
use crate::signaling::{SignalingClient, SignalingMessage};

const VIDEO_CLOCK_RATE: u32 = 90_000;
const VIDEO_FRAME: Duration = Duration::from_millis(33);

pub struct WebRtcBroker {
    signaling_url: String,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcBroker {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            signaling_url: config.signaling_url.clone(),
            ice_servers: config.rtc_ice_servers(),
        }
    }
}

fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

#[async_trait]
impl SignalingBroker for WebRtcBroker {
    async fn register(&self) -> Result<Registration> {
        let client = SignalingClient::connect(&self.signaling_url)
            .await
            .map_err(|e| Error::Signaling(format!("cannot reach {}: {}", self.signaling_url, e)))?;
        let (outgoing, mut incoming) = client.split();

        let identity = match incoming.recv().await {
            Some(SignalingMessage::Registered { peer_id }) => peer_id,
            Some(other) => {
                return Err(Error::Signaling(format!(
                    "expected registration, relay sent {:?}",
                    other
                )))
            }
            None => return Err(Error::Signaling("relay closed the connection".to_string())),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ChannelShared {
            identity: identity.clone(),
            api: build_api()?,
            ice_servers: self.ice_servers.clone(),
            outgoing: Mutex::new(Some(outgoing)),
            calls: Mutex::new(HashMap::new()),
            events: events_tx,
            dispatch: Mutex::new(None),
        });
        let dispatch = tokio::spawn(Arc::clone(&shared).dispatch(incoming));
        *shared.dispatch.lock() = Some(dispatch);

        info!("registered with relay as {}", identity);
        Ok(Registration {
            identity,
            channel: Arc::new(RtcChannel { shared }),
            events: events_rx,
        })
    }
}

struct ChannelShared {
    identity: SignalingIdentity,
    api: API,
    ice_servers: Vec<RTCIceServer>,
    outgoing: Mutex<Option<mpsc::Sender<SignalingMessage>>>,
    calls: Mutex<HashMap<String, Arc<RtcCall>>>,
    events: mpsc::UnboundedSender<BrokerEvent>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelShared {
    fn sender(&self) -> Result<mpsc::Sender<SignalingMessage>> {
        self.outgoing
            .lock()
            .clone()
            .ok_or_else(|| Error::Signaling("signaling channel destroyed".to_string()))
    }

    fn insert(&self, call: Arc<RtcCall>) {
        let mut calls = self.calls.lock();
        calls.retain(|_, c| !c.is_closed());
        calls.insert(call.call_id.clone(), call);
    }

    fn find(&self, call_id: &str) -> Option<Arc<RtcCall>> {
        self.calls.lock().get(call_id).cloned()
    }

    fn remove(&self, call_id: &str) -> Option<Arc<RtcCall>> {
        self.calls.lock().remove(call_id)
    }

    async fn open_call(
        &self,
        call_id: String,
        peer: SignalingIdentity,
    ) -> Result<(Arc<RtcCall>, mpsc::UnboundedReceiver<CallEvent>)> {
        let outgoing = self.sender()?;
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let call = Arc::new(RtcCall {
            call_id,
            local_id: self.identity.clone(),
            peer,
            pc,
            outgoing,
            events: events_tx,
            offer: Mutex::new(None),
            local_candidates: Arc::new(Mutex::new(Vec::new())),
            remote_candidates: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
            pumps: Mutex::new(Vec::new()),
        });
        call.install_handlers();
        Ok((call, events_rx))
    }

    async fn dispatch(self: Arc<Self>, mut incoming: mpsc::Receiver<SignalingMessage>) {
        while let Some(msg) = incoming.recv().await {
            if let Err(e) = self.handle(msg).await {
                warn!("signaling message failed: {}", e);
            }
        }

        warn!("relay connection for {} lost", self.identity);
        self.close_calls(false).await;
        let _ = self.events.send(BrokerEvent::Disconnected);
    }

    async fn handle(&self, msg: SignalingMessage) -> Result<()> {
        match msg {
            SignalingMessage::Offer {
                call_id,
                from_peer,
                sdp,
                ..
            } => {
                let offer: RTCSessionDescription = serde_json::from_str(&sdp)?;
                let (call, events) = self.open_call(call_id.clone(), from_peer.clone()).await?;
                *call.offer.lock() = Some(offer);
                self.insert(Arc::clone(&call));
                info!("incoming call {} from {}", call_id, from_peer);
                let _ = self.events.send(BrokerEvent::Incoming(MediaCall {
                    peer: from_peer,
                    control: call,
                    events,
                }));
            }
            SignalingMessage::Answer { call_id, sdp, .. } => {
                let Some(call) = self.find(&call_id) else {
                    debug!("answer for unknown call {}", call_id);
                    return Ok(());
                };
                call.accept_answer(serde_json::from_str(&sdp)?).await?;
            }
            SignalingMessage::IceCandidate {
                call_id, candidate, ..
            } => {
                let Some(call) = self.find(&call_id) else {
                    debug!("candidate for unknown call {}", call_id);
                    return Ok(());
                };
                call.add_remote_candidate(serde_json::from_str(&candidate)?).await?;
            }
            SignalingMessage::Hangup { call_id, from_peer, .. } => {
                if let Some(call) = self.remove(&call_id) {
                    info!("{} hung up call {}", from_peer, call_id);
                    call.shutdown(false).await;
                }
            }
            SignalingMessage::PeerUnavailable { call_id, peer_id } => {
                warn!("{} is not reachable through the relay", peer_id);
                if let Some(call) = self.remove(&call_id) {
                    call.shutdown(false).await;
                }
            }
            SignalingMessage::Error { message } => {
                let _ = self.events.send(BrokerEvent::Error(message));
            }
            SignalingMessage::Registered { peer_id } => {
                debug!("ignoring repeated registration as {}", peer_id);
            }
        }
        Ok(())
    }

    async fn close_calls(&self, notify_peers: bool) {
        let calls: Vec<Arc<RtcCall>> = self.calls.lock().drain().map(|(_, c)| c).collect();
        for call in calls {
            call.shutdown(notify_peers).await;
        }
    }
}

struct RtcChannel {
    shared: Arc<ChannelShared>,
}

#[async_trait]
impl SignalingChannel for RtcChannel {
    fn identity(&self) -> &SignalingIdentity {
        &self.shared.identity
    }

    async fn dial(&self, remote: &SignalingIdentity, local: &LocalMediaStream) -> Result<MediaCall> {
        if remote == &self.shared.identity {
            return Err(Error::Signaling("cannot dial own identity".to_string()));
        }
        let call_id = format!("{}-{:08x}", self.shared.identity, rand::random::<u32>());
        let (call, events) = self.shared.open_call(call_id.clone(), remote.clone()).await?;

        let offer = match call.create_offer(local).await {
            Ok(offer) => offer,
            Err(e) => {
                call.shutdown(false).await;
                return Err(e);
            }
        };
        self.shared.insert(Arc::clone(&call));
        call.send(SignalingMessage::Offer {
            call_id,
            from_peer: self.shared.identity.clone(),
            to_peer: remote.clone(),
            sdp: serde_json::to_string(&offer)?,
        })
        .await?;

        Ok(MediaCall {
            peer: remote.clone(),
            control: call,
            events,
        })
    }

    async fn destroy(&self) {
        if let Some(dispatch) = self.shared.dispatch.lock().take() {
            dispatch.abort();
        }
        self.shared.close_calls(true).await;
        // Dropping the last sender closes the socket.
        self.shared.outgoing.lock().take();
        info!("left relay as {}", self.shared.identity);
    }
}

struct RtcCall {
    call_id: String,
    local_id: SignalingIdentity,
    peer: SignalingIdentity,
    pc: Arc<RTCPeerConnection>,
    outgoing: mpsc::Sender<SignalingMessage>,
    events: mpsc::UnboundedSender<CallEvent>,
    /// Inbound offer, held until the call is answered
    offer: Mutex<Option<RTCSessionDescription>>,
    /// Our candidates gathered before the remote description was set
    local_candidates: Arc<Mutex<Vec<RTCIceCandidateInit>>>,
    /// Their candidates received before the remote description was set
    remote_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    closed: Arc<AtomicBool>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl RtcCall {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.outgoing
            .send(msg)
            .await
            .map_err(|_| Error::Signaling("relay connection closed".to_string()))
    }

    fn install_handlers(&self) {
        let pc = Arc::downgrade(&self.pc);
        let cache = Arc::clone(&self.local_candidates);
        let outgoing = self.outgoing.clone();
        let (call_id, from, to) = (self.call_id.clone(), self.local_id.clone(), self.peer.clone());
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let pc = pc.clone();
                let cache = Arc::clone(&cache);
                let outgoing = outgoing.clone();
                let (call_id, from, to) = (call_id.clone(), from.clone(), to.clone());
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!("unusable local candidate: {}", e);
                            return;
                        }
                    };
                    let Some(pc) = pc.upgrade() else {
                        return;
                    };
                    if pc.remote_description().await.is_none() {
                        cache.lock().push(init);
                        return;
                    }
                    match candidate_message(&call_id, &from, &to, &init) {
                        Ok(msg) => {
                            let _ = outgoing.send(msg).await;
                        }
                        Err(e) => warn!("could not encode candidate: {}", e),
                    }
                })
            }));

        let remote = RemoteStream::new(self.peer.as_str());
        let announced = Arc::new(AtomicBool::new(false));
        let events = self.events.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let remote = remote.clone();
                if !announced.swap(true, Ordering::SeqCst) {
                    let _ = events.send(CallEvent::Stream(remote.clone()));
                }
                Box::pin(async move {
                    tokio::spawn(read_remote_track(track, remote));
                })
            },
        ));

        let events = self.events.clone();
        let closed = Arc::clone(&self.closed);
        let peer = self.peer.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!("connection with {} is {}", peer, state);
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) && !closed.swap(true, Ordering::SeqCst)
                {
                    warn!("connection with {} {}", peer, state);
                    let _ = events.send(CallEvent::Closed);
                }
                Box::pin(async {})
            }));
    }

    /// Add a sending track for each local track the wire can carry.
    async fn attach(&self, local: &LocalMediaStream) -> Result<()> {
        if local.has_kind(TrackKind::Audio) {
            let capability = RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_RATE,
                channels: 1,
                ..Default::default()
            };
            self.add_sending_track(local, TrackKind::Audio, capability).await?;
        }
        if let Some(video) = local.track(TrackKind::Video) {
            if *video.format() == MediaFormat::Vp8 {
                let capability = RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: VIDEO_CLOCK_RATE,
                    ..Default::default()
                };
                self.add_sending_track(local, TrackKind::Video, capability).await?;
            } else {
                debug!("{} video stays local", video.format().mime_type());
            }
        }
        Ok(())
    }

    async fn add_sending_track(
        &self,
        local: &LocalMediaStream,
        kind: TrackKind,
        capability: RTCRtpCodecCapability,
    ) -> Result<()> {
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            kind.to_string(),
            local.id().to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let mut pumps = self.pumps.lock();
        pumps.push(tokio::spawn(drain_rtcp(sender)));
        pumps.push(tokio::spawn(pump_local_track(local.subscribe(), kind, track)));
        Ok(())
    }

    async fn create_offer(&self, local: &LocalMediaStream) -> Result<RTCSessionDescription> {
        self.attach(local).await?;
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    async fn accept_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        self.pc.set_remote_description(answer).await?;
        self.apply_remote_candidates().await?;
        self.flush_local_candidates().await;
        debug!("call {} negotiated", self.call_id);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        if self.pc.remote_description().await.is_none() {
            self.remote_candidates.lock().push(candidate);
            return Ok(());
        }
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn apply_remote_candidates(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.remote_candidates.lock());
        for candidate in pending {
            self.pc.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn flush_local_candidates(&self) {
        let cached = std::mem::take(&mut *self.local_candidates.lock());
        for init in cached {
            match candidate_message(&self.call_id, &self.local_id, &self.peer, &init) {
                Ok(msg) => {
                    if self.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("could not encode candidate: {}", e),
            }
        }
    }

    async fn shutdown(&self, notify_peer: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if notify_peer {
            let _ = self
                .send(SignalingMessage::Hangup {
                    call_id: self.call_id.clone(),
                    from_peer: self.local_id.clone(),
                    to_peer: self.peer.clone(),
                })
                .await;
        }
        let pumps: Vec<JoinHandle<()>> = self.pumps.lock().drain(..).collect();
        for pump in pumps {
            pump.abort();
        }
        if let Err(e) = self.pc.close().await {
            debug!("closing peer connection: {}", e);
        }
        let _ = self.events.send(CallEvent::Closed);
        info!("call {} with {} closed", self.call_id, self.peer);
    }
}

#[async_trait]
impl CallControl for RtcCall {
    async fn answer(&self, local: &LocalMediaStream) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Signaling("call already closed".to_string()));
        }
        let offer = self
            .offer
            .lock()
            .take()
            .ok_or_else(|| Error::Signaling("no offer to answer".to_string()))?;

        self.attach(local).await?;
        self.pc.set_remote_description(offer).await?;
        self.apply_remote_candidates().await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        self.send(SignalingMessage::Answer {
            call_id: self.call_id.clone(),
            from_peer: self.local_id.clone(),
            to_peer: self.peer.clone(),
            sdp: serde_json::to_string(&answer)?,
        })
        .await?;
        self.flush_local_candidates().await;
        Ok(())
    }

    async fn close(&self) {
        self.shutdown(true).await;
    }
}

fn candidate_message(
    call_id: &str,
    from: &SignalingIdentity,
    to: &SignalingIdentity,
    init: &RTCIceCandidateInit,
) -> Result<SignalingMessage> {
    Ok(SignalingMessage::IceCandidate {
        call_id: call_id.to_string(),
        from_peer: from.clone(),
        to_peer: to.clone(),
        candidate: serde_json::to_string(init)?,
    })
}

/// RTCP has to be read for interceptors to run.
async fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    let mut buf = vec![0u8; 1500];
    while sender.read(&mut buf).await.is_ok() {}
}

/// Convert one payload to its wire form and duration, or `None` when there
/// is nothing to send. PCM16 goes through `encoder`, which is replaced if the
/// track's format changes.
fn wire_sample(chunk: &MediaChunk, encoder: &mut Option<PcmuEncoder>) -> Option<Sample> {
    let (data, duration) = match &chunk.format {
        MediaFormat::Pcm16 {
            sample_rate,
            channels,
        } => {
            if *sample_rate == 0 || *channels == 0 {
                return None;
            }
            if !encoder
                .as_ref()
                .map_or(false, |e| e.accepts(*sample_rate, *channels))
            {
                *encoder = Some(PcmuEncoder::new(*sample_rate, *channels));
            }
            let data = encoder.as_mut()?.encode(&chunk.data);
            if data.is_empty() {
                return None;
            }
            let duration = pcmu_duration(data.len());
            (data, duration)
        }
        MediaFormat::Pcmu => (chunk.data.clone(), pcmu_duration(chunk.data.len())),
        MediaFormat::Vp8 => (chunk.data.clone(), VIDEO_FRAME),
        MediaFormat::Opaque(_) => return None,
    };
    Some(Sample {
        data,
        duration,
        ..Default::default()
    })
}

fn pcmu_duration(len: usize) -> Duration {
    Duration::from_secs_f64(len as f64 / PCMU_RATE as f64)
}

async fn pump_local_track(
    mut feed: broadcast::Receiver<MediaChunk>,
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
) {
    let mut encoder = None;
    loop {
        let chunk = match feed.recv().await {
            Ok(chunk) => chunk,
            Err(RecvError::Lagged(skipped)) => {
                debug!("{} sender skipped {} chunks", kind, skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if chunk.kind != kind {
            continue;
        }
        let Some(sample) = wire_sample(&chunk, &mut encoder) else {
            continue;
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!("{} sample not written: {}", kind, e);
        }
    }
}

async fn read_remote_track(track: Arc<TrackRemote>, remote: RemoteStream) {
    let (kind, format) = match track.kind() {
        RTPCodecType::Audio => (
            TrackKind::Audio,
            MediaFormat::Pcm16 {
                sample_rate: PCMU_RATE,
                channels: 1,
            },
        ),
        _ => (TrackKind::Video, MediaFormat::Vp8),
    };
    let track_id = format!("{}-{}", remote.id(), kind);
    info!("receiving {} from {}", kind, remote.id());

    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if packet.payload.is_empty() {
                    continue;
                }
                let data = match kind {
                    TrackKind::Audio => decode_pcmu(&packet.payload),
                    TrackKind::Video => packet.payload.clone(),
                };
                remote.publish(MediaChunk {
                    track_id: track_id.clone(),
                    kind,
                    format: format.clone(),
                    captured_at: Utc::now(),
                    data,
                });
            }
            Err(e) => {
                debug!("remote {} track from {} ended: {}", kind, remote.id(), e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(format: MediaFormat, data: Vec<u8>) -> MediaChunk {
        MediaChunk {
            track_id: "t".to_string(),
            kind: TrackKind::Audio,
            format,
            captured_at: Utc::now(),
            data: Bytes::from(data),
        }
    }

    #[test]
    fn pcm16_is_sent_as_pcmu() {
        // 20 ms of 48 kHz mono
        let pcm = chunk(
            MediaFormat::Pcm16 {
                sample_rate: 48_000,
                channels: 1,
            },
            vec![0u8; 960 * 2],
        );
        let sample = wire_sample(&pcm, &mut None).unwrap();
        assert_eq!(sample.data.len(), 160);
        assert_eq!(sample.duration, Duration::from_millis(20));
    }

    #[test]
    fn sample_duration_follows_the_encoded_length() {
        // 10 ms chunks at 44.1 kHz: 441 frames is 80 output samples exactly,
        // 440 leaves a remainder that the next chunk picks up
        let mut encoder = None;
        let mut total = Duration::ZERO;
        let mut bytes = 0;
        for _ in 0..20 {
            let pcm = chunk(
                MediaFormat::Pcm16 {
                    sample_rate: 44_100,
                    channels: 1,
                },
                vec![0u8; 440 * 2],
            );
            if let Some(sample) = wire_sample(&pcm, &mut encoder) {
                assert_eq!(sample.duration, pcmu_duration(sample.data.len()));
                total += sample.duration;
                bytes += sample.data.len();
            }
        }
        assert_eq!(bytes, 20 * 440 * 8_000 / 44_100);
        assert_eq!(total.as_millis(), (bytes as u128 * 1_000) / 8_000);
    }

    #[test]
    fn opaque_payloads_are_not_sent() {
        let raw = chunk(MediaFormat::Opaque("video/x-raw-gray".to_string()), vec![1, 2, 3]);
        assert!(wire_sample(&raw, &mut None).is_none());
        let broken = chunk(
            MediaFormat::Pcm16 {
                sample_rate: 0,
                channels: 1,
            },
            vec![0; 4],
        );
        assert!(wire_sample(&broken, &mut None).is_none());
    }

    #[test]
    fn api_builds_with_default_codecs() {
        assert!(build_api().is_ok());
    }
}
