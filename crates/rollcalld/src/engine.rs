//! Inference engine thread.
//!
//! ONNX sessions are mutable and not shareable across async tasks, so the
//! extractor lives on one dedicated OS thread behind an mpsc request
//! channel. Handlers send an image and await the reply on a oneshot.

use image::RgbImage;
use rollcall_core::{DetectedFace, ExtractError, FaceExtractor};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),
    #[error("engine thread exited")]
    ChannelClosed,
}

enum EngineRequest {
    Extract {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect and encode all faces in the image.
    pub async fn extract(&self, image: RgbImage) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The extractor is already loaded (model loading fails fast in `main`
/// before anything is served); the thread just drains the request queue.
pub fn spawn_engine(mut extractor: Box<dyn FaceExtractor>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::Extract { image, reply } => {
                        let result = extractor.extract(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{BoundingBox, Encoding};

    struct FixedExtractor {
        faces: usize,
    }

    impl FaceExtractor for FixedExtractor {
        fn extract(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
            Ok((0..self.faces)
                .map(|i| DetectedFace {
                    bbox: BoundingBox {
                        x: 0.0,
                        y: 0.0,
                        width: 10.0,
                        height: 10.0,
                        confidence: 0.9,
                        landmarks: None,
                    },
                    encoding: Encoding::new(vec![i as f32; 4]),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn round_trip_through_engine_thread() {
        let handle = spawn_engine(Box::new(FixedExtractor { faces: 2 }));
        let image = RgbImage::new(4, 4);

        let faces = handle.extract(image).await.unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1].encoding, Encoding::new(vec![1.0; 4]));
    }

    #[tokio::test]
    async fn extraction_errors_propagate() {
        struct FailingExtractor;
        impl FaceExtractor for FailingExtractor {
            fn extract(&mut self, _: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
                Err(ExtractError::Inference("synthetic failure".into()))
            }
        }

        let handle = spawn_engine(Box::new(FailingExtractor));
        let err = handle.extract(RgbImage::new(4, 4)).await.unwrap_err();
        assert!(matches!(err, EngineError::Extract(_)));
    }
}
