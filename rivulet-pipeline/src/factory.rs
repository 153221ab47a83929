//! Pipeline factory
//!
//! Front door for callers: holds the engine and the current settings, fixes
//! up URLs, and creates pipelines that already carry the factory-wide buffer
//! consumers and publish on the shared event bus.

use crate::config::{PipelineConfig, SettingsSource};
use crate::consumers::{BufferConsumer, ConsumerRegistry};
use crate::engine::EngineBackend;
use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::pipeline::Pipeline;
use crate::url::fixup_url;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct PipelineFactory {
    engine: Arc<dyn EngineBackend>,
    settings: Arc<dyn SettingsSource>,
    config: RwLock<PipelineConfig>,
    consumers: ConsumerRegistry,
    events: EventBus,
}

impl PipelineFactory {
    /// Create a factory; settings are read immediately
    pub fn new(engine: Arc<dyn EngineBackend>, settings: Arc<dyn SettingsSource>) -> Result<Self> {
        let config = settings.load()?;
        Ok(Self {
            engine,
            settings,
            config: RwLock::new(config),
            consumers: ConsumerRegistry::new(),
            events: EventBus::default(),
        })
    }

    /// Read the settings again
    ///
    /// Only pipelines created afterwards see the new values. On error the
    /// previous settings stay in effect.
    pub fn reload_settings(&self) -> Result<()> {
        let config = self.settings.load()?;
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        info!("Pipeline settings reloaded");
        Ok(())
    }

    /// Settings used for the next pipeline
    pub fn config(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Events of every pipeline created by this factory
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Register a consumer on every pipeline created from now on
    pub fn add_buffer_consumer(&self, consumer: Arc<dyn BufferConsumer>) {
        self.consumers.add(consumer);
    }

    pub fn remove_buffer_consumer(&self, consumer: &Arc<dyn BufferConsumer>) {
        self.consumers.remove(consumer);
    }

    /// Unbound pipeline with the factory consumers attached
    pub fn create_pipeline(&self) -> Result<Pipeline> {
        let pipeline = Pipeline::new(self.engine.clone(), self.config(), self.events.clone())?;
        for consumer in self.consumers.snapshot() {
            pipeline.add_buffer_consumer(consumer);
        }
        Ok(pipeline)
    }

    /// Create a pipeline and bind it to `url`
    ///
    /// `end_offset` in nanoseconds; 0 plays to the end.
    pub fn load(&self, url: &str, original_url: &str, end_offset: i64) -> Result<Pipeline> {
        let fixed = fixup_url(url)?;
        let pipeline = self.create_pipeline()?;
        if let Some(device) = fixed.source_device {
            pipeline.set_source_device(device);
        }
        pipeline.init_from_url(&fixed.uri, original_url, end_offset)?;
        debug!("Pipeline {} loaded {}", pipeline.id(), fixed.uri);
        Ok(pipeline)
    }

    /// Stage the next track on `pipeline` for gapless playback
    pub fn stage_next(
        &self,
        pipeline: &Pipeline,
        url: &str,
        original_url: &str,
        begin_offset: i64,
        end_offset: i64,
    ) -> Result<()> {
        let fixed = fixup_url(url)?;
        if let Some(device) = fixed.source_device {
            pipeline.set_source_device(device);
        }
        pipeline.set_next_url(&fixed.uri, original_url, begin_offset, end_offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StaticSettings, TomlSettings};
    use crate::engine::sim::SimEngine;
    use crate::error::Error;
    use crate::format::AudioBuffer;
    use crate::events::PipelineId;
    use std::io::Write;

    struct Nop;

    impl BufferConsumer for Nop {
        fn consume_buffer(&self, _buffer: &AudioBuffer, _pipeline: PipelineId, _format: &str) {}
    }

    fn factory(engine: &SimEngine) -> PipelineFactory {
        PipelineFactory::new(
            Arc::new(engine.clone()),
            Arc::new(StaticSettings(PipelineConfig::default())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_fixes_up_cd_urls() {
        let engine = SimEngine::new();
        let factory = factory(&engine);

        let pipeline = factory.load("cdda:///dev/sr0/2", "cdda:///dev/sr0/2", 0).unwrap();
        assert_eq!(pipeline.url(), "cdda://2");
        assert_eq!(pipeline.original_url(), "cdda:///dev/sr0/2");

        let player = engine.last_player().unwrap();
        let source = player.setup_source(&["device"]);
        assert_eq!(
            source.property("device"),
            Some(crate::engine::PropValue::Str("/dev/sr0".into()))
        );
    }

    #[tokio::test]
    async fn test_build_failure_returned() {
        let engine = SimEngine::new();
        engine.fail_factory("queue2");
        let factory = factory(&engine);

        let result = factory.load("file:///a.flac", "file:///a.flac", 0);
        assert!(matches!(result, Err(Error::GraphBuildFailed(_))));
    }

    #[tokio::test]
    async fn test_factory_consumers_attached() {
        let engine = SimEngine::new();
        let factory = factory(&engine);
        let consumer: Arc<dyn BufferConsumer> = Arc::new(Nop);
        factory.add_buffer_consumer(consumer.clone());

        let pipeline = factory.load("file:///a.flac", "file:///a.flac", 0).unwrap();
        pipeline.remove_buffer_consumer(&consumer);
        factory.remove_buffer_consumer(&consumer);
        assert_eq!(Arc::strong_count(&consumer), 1);
    }

    #[tokio::test]
    async fn test_reload_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "volume_enabled = false").unwrap();

        let engine = SimEngine::new();
        let factory = PipelineFactory::new(
            Arc::new(engine),
            Arc::new(TomlSettings::new(file.path())),
        )
        .unwrap();
        assert!(!factory.config().volume_enabled);

        let mut file = std::fs::File::create(file.path()).unwrap();
        writeln!(file, "volume_enabled = true").unwrap();
        factory.reload_settings().unwrap();
        assert!(factory.config().volume_enabled);
    }
}
