//! Codec registry implementation

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::codec::{CODEC_H264, CODEC_H265};
use crate::core::Codec;
use crate::error::{Error, Result};
use crate::media::h264::{is_keyframe_h264, is_keyframe_h265};
use crate::media::CodecHandler;

/// Builds a handler for one produced track of a codec
pub type CodecHandlerFactory = Arc<dyn Fn(&Codec) -> CodecHandler + Send + Sync>;

/// Codec name to handler factory map
///
/// Names are matched case-insensitively. Thread-safe via `RwLock`: lookups
/// happen per track, registration usually once at startup.
#[derive(Default)]
pub struct CodecRegistry {
    factories: RwLock<HashMap<String, CodecHandlerFactory>>,
}

impl CodecRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with keyframe-aware handlers for H.264 and H.265
    ///
    /// The default entries expect reassembled AVCC frames. Register a factory
    /// that adds an RTP depayloader to cache RTP-framed tracks.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            CODEC_H264,
            Arc::new(|codec: &Codec| {
                CodecHandler::builder(codec.clone(), Arc::new(is_keyframe_h264)).build()
            }),
        );
        registry.register(
            CODEC_H265,
            Arc::new(|codec: &Codec| {
                CodecHandler::builder(codec.clone(), Arc::new(is_keyframe_h265)).build()
            }),
        );
        registry
    }

    /// Register a factory, replacing any previous one for the same name
    pub fn register(&self, name: &str, factory: CodecHandlerFactory) {
        let key = name.to_ascii_uppercase();
        let replaced = self.factories.write().insert(key, factory).is_some();
        tracing::debug!(codec = %name, replaced, "Codec handler registered");
    }

    /// Remove a factory, returning whether one was registered
    pub fn unregister(&self, name: &str) -> bool {
        self.factories
            .write()
            .remove(&name.to_ascii_uppercase())
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .contains_key(&name.to_ascii_uppercase())
    }

    /// Build a handler for `codec`
    ///
    /// Fails with [`Error::UnknownCodec`] when nothing is registered for
    /// the codec's name.
    pub fn create(&self, codec: &Codec) -> Result<CodecHandler> {
        let factory = self
            .factories
            .read()
            .get(&codec.name.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| Error::UnknownCodec(codec.name.clone()))?;

        tracing::trace!(codec = %codec, "Creating codec handler");
        Ok(factory(codec))
    }

    /// Registered codec names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}
