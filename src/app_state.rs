//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::domain::{
    ChangeEventSource, MachineCommands, MachineModel, ModelStatusProjector, StatusProjector,
};
use crate::service::dispatcher::BroadcastSink;
use crate::service::stream::FrameEncoder;
use crate::service::{
    ChangeDetectionDispatcher, ConnectionRegistry, StreamSessionManager, StreamSettings,
};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Query surface of the machine.
    pub model: Arc<dyn MachineModel>,
    /// Command surface of the machine.
    pub commands: Arc<dyn MachineCommands>,
    /// Status snapshot builder.
    pub projector: Arc<dyn StatusProjector>,
    /// Status subscribers.
    pub registry: Arc<ConnectionRegistry>,
    /// Turns machine changes into registry broadcasts.
    pub dispatcher: ChangeDetectionDispatcher,
    /// Camera stream sessions.
    pub streams: StreamSessionManager,
    /// Frame encoder shared with the REST snapshot endpoint.
    pub encoder: Arc<FrameEncoder>,
    /// Loaded configuration.
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    /// Wires every service around one machine implementation.
    ///
    /// The dispatcher is created but not initialized; call
    /// [`ChangeDetectionDispatcher::initialize`] once a runtime is running.
    #[must_use]
    pub fn new<M>(machine: Arc<M>, config: GatewayConfig) -> Self
    where
        M: MachineModel + MachineCommands + ChangeEventSource + 'static,
    {
        let model = Arc::clone(&machine) as Arc<dyn MachineModel>;
        let projector: Arc<dyn StatusProjector> =
            Arc::new(ModelStatusProjector::new(Arc::clone(&model)));
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&projector)));
        let dispatcher = ChangeDetectionDispatcher::new(
            Arc::clone(&machine) as Arc<dyn ChangeEventSource>,
            Arc::clone(&registry) as Arc<dyn BroadcastSink>,
            config.status_debounce,
        );
        let encoder = Arc::new(FrameEncoder::new());
        let streams = StreamSessionManager::new(
            Arc::clone(&model),
            Arc::clone(&encoder),
            StreamSettings {
                workers: config.stream_workers,
                error_throttle: config.stream_error_throttle,
            },
        );

        Self {
            model,
            commands: machine,
            projector,
            registry,
            dispatcher,
            streams,
            encoder,
            config: Arc::new(config),
        }
    }
}
